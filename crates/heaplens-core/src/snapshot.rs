use std::fmt;
use std::io;
use std::sync::Mutex;

use anyhow::Result;
use tracing::debug;

use heaplens_dump::builder::SnapshotIndex;
use heaplens_dump::class::ClassRecord;
use heaplens_dump::reader::PagedReader;
use heaplens_dump::record::{self, DumpRecord};
use heaplens_dump::roots::GcRoot;
use heaplens_dump::IndexBuilder;

/// Snapshot-level schema versions, detected once per snapshot from
/// marker classes and matched against extractor descriptors as a bitmask.
pub mod schema {
    pub type VersionFlags = u32;

    pub const UNKNOWN: VersionFlags = 1 << 0;
    pub const CRUBY: VersionFlags = 1 << 1;
    pub const JRUBY: VersionFlags = 1 << 2;
    pub const TRUFFLE: VersionFlags = 1 << 3;
    pub const ALL: VersionFlags = !0;
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    Record(anyhow::Error),
    Inconsistent(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "snapshot read failed: {}", e),
            SnapshotError::Record(e) => write!(f, "snapshot record unreadable: {}", e),
            SnapshotError::Inconsistent(msg) => write!(f, "snapshot inconsistent: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

/// Read-only view over a finished index. Shared, immutable data after the
/// build; the only interior state is the paged reader used to re-read raw
/// records at their indexed positions.
pub struct Snapshot {
    index: SnapshotIndex,
    reader: Mutex<PagedReader>,
    schema_version: schema::VersionFlags,
}

impl Snapshot {
    /// Wraps a built index, reopening the dump for record access.
    pub fn open(index: SnapshotIndex) -> Result<Self> {
        let reader = PagedReader::open(&index.dump_path)?;
        let schema_version = detect_schema(&index);
        debug!(domain = "core.snapshot", schema_version, "Opened snapshot");
        Ok(Self { index, reader: Mutex::new(reader), schema_version })
    }

    /// Builds the index for `path` and opens the result.
    pub fn from_dump(path: &std::path::Path) -> Result<Self> {
        let index = IndexBuilder::new(path).build()?;
        Self::open(index)
    }

    pub fn index(&self) -> &SnapshotIndex {
        &self.index
    }

    pub fn object_count(&self) -> u32 {
        self.index.object_count()
    }

    pub fn stats(&self) -> &heaplens_dump::BuildStats {
        &self.index.stats
    }

    pub fn schema_version(&self) -> schema::VersionFlags {
        self.schema_version
    }

    pub fn address_of(&self, id: u32) -> Option<u64> {
        self.index.identifiers.address_of(id)
    }

    pub fn id_of(&self, address: u64) -> Option<u32> {
        self.index.identifiers.id_of(address)
    }

    pub fn object(&self, id: u32) -> Option<HeapObject<'_>> {
        if id < self.object_count() {
            Some(HeapObject { snapshot: self, id })
        } else {
            None
        }
    }

    pub fn class_of(&self, id: u32) -> Result<&ClassRecord, SnapshotError> {
        self.index.class_of(id).ok_or_else(|| {
            SnapshotError::Inconsistent(format!("object {} has no class record", id))
        })
    }

    pub fn class_by_id(&self, class_id: u32) -> Option<&ClassRecord> {
        self.index.classes_by_id.get(&class_id)
    }

    pub fn class_by_address(&self, address: u64) -> Option<&ClassRecord> {
        self.id_of(address).and_then(|id| self.class_by_id(id))
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassRecord> {
        self.classes().find(|c| c.name == name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassRecord> {
        self.index.classes_by_id.values()
    }

    pub fn is_class(&self, id: u32) -> bool {
        self.index.is_class(id)
    }

    pub fn gc_roots(&self) -> &[GcRoot] {
        &self.index.gc_roots
    }

    pub fn outbound_refs(&self, id: u32) -> &[u32] {
        self.index.outbound.refs_for(id)
    }

    pub fn size_of(&self, id: u32) -> u64 {
        self.index.object_to_size.get(id)
    }

    pub fn position_of(&self, id: u32) -> u64 {
        self.index.object_to_position.get(id)
    }

    /// Re-reads the raw dump record for an object at its indexed file
    /// position.
    pub fn read_record(&self, id: u32) -> Result<DumpRecord, SnapshotError> {
        let position = self.position_of(id);
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| SnapshotError::Inconsistent("record reader poisoned".to_string()))?;
        let mut line: Vec<u8> = Vec::new();
        let mut at = position;
        loop {
            let mut chunk = [0u8; 4096];
            let n = reader.read_at(at, &mut chunk)?;
            if n == 0 {
                break;
            }
            match memchr_newline(&chunk[..n]) {
                Some(end) => {
                    line.extend_from_slice(&chunk[..end]);
                    break;
                }
                None => {
                    line.extend_from_slice(&chunk[..n]);
                    at += n as u64;
                }
            }
        }
        record::parse_record(&line).map_err(SnapshotError::Record)
    }
}

fn memchr_newline(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|b| *b == b'\n')
}

fn detect_schema(index: &SnapshotIndex) -> schema::VersionFlags {
    for class in index.classes_by_id.values() {
        if class.name == "RubyVM" {
            return schema::CRUBY;
        }
        if class.name.starts_with("Java::") {
            return schema::JRUBY;
        }
        if class.name.starts_with("Truffle::") {
            return schema::TRUFFLE;
        }
    }
    schema::UNKNOWN
}

/// Lightweight handle to one object in a snapshot. Only constructed for
/// ids inside `[0, object_count)`.
#[derive(Clone, Copy)]
pub struct HeapObject<'s> {
    snapshot: &'s Snapshot,
    id: u32,
}

impl<'s> HeapObject<'s> {
    pub fn snapshot(&self) -> &'s Snapshot {
        self.snapshot
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> u64 {
        self.snapshot.address_of(self.id).expect("handle ids are validated")
    }

    pub fn class(&self) -> Result<&'s ClassRecord, SnapshotError> {
        self.snapshot.class_of(self.id)
    }

    pub fn size(&self) -> u64 {
        self.snapshot.size_of(self.id)
    }

    /// All outbound references, the class pseudo-reference first.
    pub fn outbound(&self) -> &'s [u32] {
        self.snapshot.outbound_refs(self.id)
    }

    /// Outbound references without the leading class pseudo-reference.
    pub fn data_refs(&self) -> &'s [u32] {
        let refs = self.outbound();
        if refs.is_empty() {
            refs
        } else {
            &refs[1..]
        }
    }

    pub fn record(&self) -> Result<DumpRecord, SnapshotError> {
        self.snapshot.read_record(self.id)
    }

    /// Resolves a declared field by name through the owning class's field
    /// list to the matching reference slot.
    pub fn field(&self, name: &str) -> Result<Option<HeapObject<'s>>, SnapshotError> {
        let class = self.class()?;
        let slot = match class.field_slot(name) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        Ok(self.data_refs().get(slot).and_then(|id| self.snapshot.object(*id)))
    }
}

impl fmt::Debug for HeapObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapObject#{}", self.id)
    }
}
