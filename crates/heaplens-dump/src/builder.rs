use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::class::ClassRecord;
use crate::ident::IdentifierTable;
use crate::index::{ArtifactPaths, OutboundTable, UIntTable};
use crate::reader::{PagedReader, DEFAULT_PAGE_BUDGET, DEFAULT_PAGE_SIZE};
use crate::record::{self, DumpRecord};
use crate::roots::{GcRoot, GcRootEntry, GcRootKind};
use crate::strings::StringSink;

/// Gap between manufactured addresses; keeps synthetic classes clear of
/// every real address and of each other.
pub const SYNTHETIC_STRIDE: u64 = 16;

const READ_CHUNK: usize = 4096;

/// Cooperative cancellation flag, checked between records. A cancelled
/// build aborts with [`Cancelled`] and its partial output is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("index build cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub page_size: usize,
    pub page_budget: usize,
    /// Hard cap on records per pass; 0 means unlimited. Exceeding it
    /// aborts the build rather than truncating, since a partial pass
    /// would desynchronize the id assignment.
    pub max_records: u64,
    pub cancel: CancelToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_budget: DEFAULT_PAGE_BUDGET,
            max_records: 0,
            cancel: CancelToken::new(),
        }
    }
}

/// Counters surfaced with the finished index so callers can judge how
/// trustworthy it is.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct BuildStats {
    pub records: u64,
    pub objects: u64,
    pub classes: u64,
    pub parse_errors: u64,
    pub synthetic_classes: u64,
    pub dropped_roots: u64,
    pub dropped_references: u64,
}

/// Streams line-delimited records through the paged reader, yielding the
/// byte offset each record starts at.
pub struct RecordReader {
    reader: PagedReader,
    pos: u64,
}

impl RecordReader {
    pub fn open(path: &Path, page_size: usize, page_budget: usize) -> Result<Self> {
        let reader = PagedReader::with_page_size(path, page_size, page_budget)
            .with_context(|| format!("opening dump {}", path.display()))?;
        Ok(Self { reader, pos: 0 })
    }

    /// Next non-blank line and its starting offset, or `None` at EOF.
    pub fn next_line(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        loop {
            let start = self.pos;
            let mut line: Vec<u8> = Vec::new();
            loop {
                let mut chunk = [0u8; READ_CHUNK];
                let n = self.reader.read_at(self.pos, &mut chunk)?;
                if n == 0 {
                    if line.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                match memchr::memchr(b'\n', &chunk[..n]) {
                    Some(end) => {
                        line.extend_from_slice(&chunk[..end]);
                        self.pos += end as u64 + 1;
                        break;
                    }
                    None => {
                        line.extend_from_slice(&chunk[..n]);
                        self.pos += n as u64;
                    }
                }
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(Some((start, line)));
        }
    }
}

/// All mutable ingestion state, owned by one build and threaded through
/// the passes explicitly.
#[derive(Default)]
struct Ingest {
    identifiers: IdentifierTable,
    classes_by_address: HashMap<u64, ClassRecord>,
    class_of_class: HashMap<u64, u64>,
    missing_classes: HashSet<u64>,
    typeless: BTreeSet<String>,
    synthetic_for_address: HashMap<u64, u64>,
    synthetic_for_type: HashMap<String, u64>,
    unknown_class_of_class: u64,
    roots_raw: Vec<GcRootEntry>,
    max_address: u64,
    stats: BuildStats,
    object_to_class: UIntTable,
    object_to_position: UIntTable,
    object_to_size: UIntTable,
    outbound: OutboundTable,
}

/// Builds the snapshot index from a dump file in two sequential passes:
/// discover identifiers and classes, heal unresolved class references
/// with synthetic records, sort to fix the id assignment, then re-stream
/// to materialize the per-object tables.
pub struct IndexBuilder {
    path: PathBuf,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), options: BuildOptions::default() }
    }

    pub fn with_options(path: impl Into<PathBuf>, options: BuildOptions) -> Self {
        Self { path: path.into(), options }
    }

    pub fn build(&self) -> Result<SnapshotIndex> {
        let mut ingest = Ingest::default();
        self.pass_one(&mut ingest)?;
        ingest.fixup();
        ingest.sort_and_allocate();
        let strings_path = PathBuf::from(format!("{}.strings", self.path.display()));
        self.pass_two(&mut ingest, &strings_path)?;
        ingest.materialize_synthetics();
        let index = ingest.finalize(self.path.clone(), strings_path);
        info!(
            domain = "dump.builder",
            objects = index.stats.objects,
            classes = index.stats.classes,
            synthetic = index.stats.synthetic_classes,
            parse_errors = index.stats.parse_errors,
            dropped_roots = index.stats.dropped_roots,
            gc_roots = index.gc_roots.len(),
            "Built snapshot index"
        );
        Ok(index)
    }

    fn pass_one(&self, ingest: &mut Ingest) -> Result<()> {
        let mut records =
            RecordReader::open(&self.path, self.options.page_size, self.options.page_budget)?;
        while let Some((offset, line)) = records.next_line()? {
            self.check_limits(ingest.stats.records)?;
            ingest.stats.records += 1;
            let record = match record::parse_record(&line) {
                Ok(record) => record,
                Err(e) => {
                    ingest.note_parse_error(offset, &e);
                    continue;
                }
            };
            if record.is_skipped() {
                continue;
            }
            if let Err(e) = ingest.discover(&record) {
                ingest.note_parse_error(offset, &e);
            }
        }
        info!(
            domain = "dump.builder",
            records = ingest.stats.records,
            identifiers = ingest.identifiers.len(),
            classes = ingest.classes_by_address.len(),
            parse_errors = ingest.stats.parse_errors,
            "Completed discovery pass"
        );
        Ok(())
    }

    fn pass_two(&self, ingest: &mut Ingest, strings_path: &Path) -> Result<()> {
        let mut records =
            RecordReader::open(&self.path, self.options.page_size, self.options.page_budget)?;
        let mut strings = StringSink::create(strings_path)?;
        let mut seen = 0u64;
        while let Some((offset, line)) = records.next_line()? {
            self.check_limits(seen)?;
            seen += 1;
            // Malformed records were already counted during discovery.
            let record = match record::parse_record(&line) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if record.is_skipped() || record.is_root() {
                continue;
            }
            if let Err(e) = ingest.materialize(&record, offset, &mut strings) {
                debug!(
                    domain = "dump.builder",
                    offset,
                    error = %e,
                    "Skipping record in materialize pass"
                );
            }
        }
        strings.finish()?;
        Ok(())
    }

    fn check_limits(&self, seen: u64) -> Result<()> {
        if self.options.cancel.is_cancelled() {
            return Err(anyhow::Error::new(Cancelled));
        }
        if self.options.max_records > 0 && seen >= self.options.max_records {
            return Err(anyhow!(
                "dump exceeds record cap of {}; raise BuildOptions::max_records",
                self.options.max_records
            ));
        }
        Ok(())
    }
}

impl Ingest {
    fn note_parse_error(&mut self, offset: u64, error: &anyhow::Error) {
        self.stats.parse_errors += 1;
        warn!(
            domain = "dump.parser",
            kind = "record_parse_error",
            offset,
            error = %error,
            "Skipping malformed record"
        );
    }

    fn discover(&mut self, record: &DumpRecord) -> Result<()> {
        if record.is_root() {
            return self.discover_root(record);
        }
        let address = record.address()?;
        self.identifiers.add(address);
        self.max_address = self.max_address.max(address);
        if record.is_class_like() {
            self.discover_class(record, address)?;
        } else {
            self.note_class_reference(record)?;
        }
        Ok(())
    }

    fn discover_root(&mut self, record: &DumpRecord) -> Result<()> {
        let kind = record.root.as_deref().map(GcRootKind::parse).unwrap_or(GcRootKind::Unknown);
        let context = record.context_address()?;
        for target in record.reference_addresses()? {
            self.roots_raw.push(GcRootEntry { target, context, kind });
        }
        Ok(())
    }

    fn discover_class(&mut self, record: &DumpRecord, address: u64) -> Result<()> {
        let name = record.name.clone().unwrap_or_else(|| format!("Class-0x{:x}", address));
        let mut class = ClassRecord::new(address, name);
        class.fields = record.fields.clone();
        if let Some(meta) = record.class_address()? {
            // Classes may appear before their own meta-class record.
            self.class_of_class.insert(address, meta);
        }
        self.classes_by_address.insert(address, class);
        self.stats.classes += 1;
        self.note_class_reference(record)
    }

    fn note_class_reference(&mut self, record: &DumpRecord) -> Result<()> {
        match record.class_address()? {
            Some(class_address) => {
                if !self.classes_by_address.contains_key(&class_address) {
                    self.missing_classes.insert(class_address);
                }
            }
            None if !record.is_class_like() => {
                self.typeless.insert(record.kind.clone());
            }
            None => {}
        }
        Ok(())
    }

    /// Manufactures a class for every reference that never resolved, so
    /// that after this point every object maps to some class record.
    fn fixup(&mut self) {
        let mut next = self.max_address + SYNTHETIC_STRIDE;
        self.unknown_class_of_class = next;
        let mut unknown = ClassRecord::synthetic(next, "Type-Unknown".to_string());
        unknown.class_address = Some(next);
        self.register_synthetic(unknown);
        next += SYNTHETIC_STRIDE;

        // A class record seen anywhere in pass 1 wins over a fixup; the
        // missing set is only consulted now, after the full pass.
        let mut missing: Vec<u64> = self
            .missing_classes
            .iter()
            .copied()
            .filter(|address| !self.classes_by_address.contains_key(address))
            .collect();
        missing.sort_unstable();
        for address in missing {
            let mut class =
                ClassRecord::synthetic(next, format!("Class-0x{:x}", address));
            class.class_address = Some(self.unknown_class_of_class);
            self.synthetic_for_address.insert(address, next);
            self.register_synthetic(class);
            next += SYNTHETIC_STRIDE;
        }

        let typeless: Vec<String> = self.typeless.iter().cloned().collect();
        for tag in typeless {
            let mut class = ClassRecord::synthetic(next, format!("Type-{}", tag));
            class.class_address = Some(self.unknown_class_of_class);
            self.synthetic_for_type.insert(tag, next);
            self.register_synthetic(class);
            next += SYNTHETIC_STRIDE;
        }
        info!(
            domain = "dump.builder",
            synthetic = self.stats.synthetic_classes,
            "Synthesized classes for unresolved references"
        );
    }

    fn register_synthetic(&mut self, class: ClassRecord) {
        debug!(
            domain = "dump.builder",
            name = %class.name,
            address = class.address,
            "Creating synthetic class"
        );
        self.identifiers.add(class.address);
        self.classes_by_address.insert(class.address, class);
        self.stats.synthetic_classes += 1;
    }

    fn sort_and_allocate(&mut self) {
        self.identifiers.sort();
        let count = self.identifiers.len();
        let resolved: Vec<(u64, u64)> = self
            .classes_by_address
            .keys()
            .map(|address| (*address, self.class_of_address_for_class(*address)))
            .collect();
        for (address, class_of) in resolved {
            let class = self.classes_by_address.get_mut(&address).expect("key just listed");
            class.class_address = Some(class_of);
        }
        for class in self.classes_by_address.values_mut() {
            let id = self
                .identifiers
                .id_of(class.address)
                .expect("every class address is registered");
            class.object_id = Some(id);
        }
        self.object_to_class = UIntTable::new(count);
        self.object_to_position = UIntTable::new(count);
        self.object_to_size = UIntTable::new(count);
        self.outbound = OutboundTable::new(count);
    }

    /// The class-of address for a class record: its declared meta-class
    /// if one exists (real or healed), the unknown class-of-class
    /// otherwise.
    fn class_of_address_for_class(&self, class_address: u64) -> u64 {
        match self.class_of_class.get(&class_address) {
            Some(meta) if self.classes_by_address.contains_key(meta) => *meta,
            Some(meta) => self.synthetic_for_address[meta],
            None => self.unknown_class_of_class,
        }
    }

    fn owning_class_address(&self, record: &DumpRecord) -> Result<u64> {
        match record.class_address()? {
            Some(address) => {
                if self.classes_by_address.contains_key(&address) {
                    Ok(address)
                } else {
                    self.synthetic_for_address
                        .get(&address)
                        .copied()
                        .ok_or_else(|| anyhow!("class 0x{:x} missing after fixup", address))
                }
            }
            None => self
                .synthetic_for_type
                .get(&record.kind)
                .copied()
                .ok_or_else(|| anyhow!("no synthetic class for type {:?}", record.kind)),
        }
    }

    fn materialize(
        &mut self,
        record: &DumpRecord,
        offset: u64,
        strings: &mut StringSink,
    ) -> Result<()> {
        let address = record.address()?;
        let id = self
            .identifiers
            .id_of(address)
            .ok_or_else(|| anyhow!("address 0x{:x} not registered in pass 1", address))?;
        let size = record.memsize.unwrap_or(0);

        let class_address = if record.is_class_like() {
            self.class_of_address_for_class(address)
        } else {
            self.owning_class_address(record)?
        };
        let class_id = self.classes_by_address[&class_address]
            .object_id
            .expect("class ids assigned after sort");

        let mut references = Vec::with_capacity(record.references.len() + 1);
        references.push(class_address);
        references.extend(record.reference_addresses()?);
        let outcome = self.outbound.log(&self.identifiers, id, &references);
        self.stats.dropped_references += outcome.dropped as u64;

        self.object_to_class.set(id, u64::from(class_id));
        self.object_to_position.set(id, offset);
        self.object_to_size.set(id, size);

        if !record.is_class_like() {
            self.classes_by_address
                .get_mut(&class_address)
                .expect("owning class resolved above")
                .add_instance(size);
            self.stats.objects += 1;
            if record.kind == "STRING" {
                if let Some(value) = record.value.as_deref() {
                    strings.append(address, value)?;
                }
            }
        }
        Ok(())
    }

    /// Synthetic classes have no backing record, so the materialize pass
    /// never reaches them; their class reference and table rows are
    /// emitted here to keep every id's outbound list non-empty.
    fn materialize_synthetics(&mut self) {
        let synthetic: Vec<u64> = self
            .classes_by_address
            .values()
            .filter(|class| class.synthetic)
            .map(|class| class.address)
            .collect();
        for address in synthetic {
            let id = self.identifiers.id_of(address).expect("synthetic address registered");
            let class_of = self.class_of_address_for_class(address);
            let class_id = self.classes_by_address[&class_of]
                .object_id
                .expect("class ids assigned after sort");
            let outcome = self.outbound.log(&self.identifiers, id, &[class_of]);
            debug_assert_eq!(outcome.dropped, 0);
            self.object_to_class.set(id, u64::from(class_id));
        }
    }

    fn finalize(mut self, dump_path: PathBuf, strings_path: PathBuf) -> SnapshotIndex {
        let mut gc_roots = Vec::with_capacity(self.roots_raw.len());
        for entry in &self.roots_raw {
            let object_id = match self.identifiers.id_of(entry.target) {
                Some(id) => id,
                None => {
                    self.stats.dropped_roots += 1;
                    continue;
                }
            };
            let context_id = match entry.context {
                None => None,
                Some(context) => match self.identifiers.id_of(context) {
                    Some(id) => Some(id),
                    None => {
                        self.stats.dropped_roots += 1;
                        continue;
                    }
                },
            };
            gc_roots.push(GcRoot { object_id, context_id, kind: entry.kind });
        }

        let mut classes_by_id = BTreeMap::new();
        for class in self.classes_by_address.into_values() {
            let id = class.object_id.expect("class ids assigned after sort");
            classes_by_id.insert(id, class);
        }

        SnapshotIndex {
            identifiers: self.identifiers,
            classes_by_id,
            gc_roots,
            object_to_class: self.object_to_class,
            object_to_position: self.object_to_position,
            object_to_size: self.object_to_size,
            outbound: self.outbound,
            stats: self.stats,
            dump_path,
            strings_path,
        }
    }
}

/// The finished, immutable output of a build: the identifier bijection,
/// the class table, the resolved GC roots and the four per-object
/// tables, plus the build counters.
#[derive(Debug)]
pub struct SnapshotIndex {
    pub identifiers: IdentifierTable,
    pub classes_by_id: BTreeMap<u32, ClassRecord>,
    pub gc_roots: Vec<GcRoot>,
    pub object_to_class: UIntTable,
    pub object_to_position: UIntTable,
    pub object_to_size: UIntTable,
    pub outbound: OutboundTable,
    pub stats: BuildStats,
    pub dump_path: PathBuf,
    pub strings_path: PathBuf,
}

impl SnapshotIndex {
    pub fn object_count(&self) -> u32 {
        self.identifiers.len()
    }

    pub fn class_of(&self, id: u32) -> Option<&ClassRecord> {
        self.classes_by_id.get(&(self.object_to_class.get(id) as u32))
    }

    pub fn is_class(&self, id: u32) -> bool {
        self.classes_by_id.contains_key(&id)
    }

    /// Persists every artifact under the given prefix and returns their
    /// locations.
    pub fn write_to(&self, prefix: &Path) -> Result<ArtifactPaths> {
        let paths = ArtifactPaths::for_prefix(prefix);
        crate::index::write_uint_file(&paths.identifiers, self.identifiers.iter())?;
        self.object_to_class.write_to(&paths.object_to_class)?;
        self.object_to_position.write_to(&paths.object_to_position)?;
        self.object_to_size.write_to(&paths.object_to_size)?;
        self.outbound.write_to(&paths.outbound)?;
        let classes = serde_json::to_vec(&self.classes_by_id)?;
        fs::write(&paths.classes, classes)
            .with_context(|| format!("writing {}", paths.classes.display()))?;
        let roots = serde_json::to_vec(&self.gc_roots)?;
        fs::write(&paths.gc_roots, roots)
            .with_context(|| format!("writing {}", paths.gc_roots.display()))?;
        if self.strings_path != paths.strings {
            fs::copy(&self.strings_path, &paths.strings)
                .with_context(|| format!("writing {}", paths.strings.display()))?;
        }
        Ok(paths)
    }
}
