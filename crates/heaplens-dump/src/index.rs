use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::ident::IdentifierTable;
use crate::reader::PagedReader;

/// Bytes needed to hold `max` in a fixed-width big-endian record.
pub fn byte_width_for(max: u64) -> usize {
    let bits = 64 - max.leading_zeros() as usize;
    ((bits + 7) / 8).max(1)
}

/// Dense ObjectId-indexed table of unsigned values. Rows live as plain
/// u64 in memory; the persisted file is width-packed from the maximum
/// value actually observed.
#[derive(Debug, Clone)]
pub struct UIntTable {
    values: Vec<u64>,
}

impl Default for UIntTable {
    fn default() -> Self {
        Self::new(0)
    }
}

impl UIntTable {
    pub fn new(count: u32) -> Self {
        Self { values: vec![0; count as usize] }
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set(&mut self, id: u32, value: u64) {
        self.values[id as usize] = value;
    }

    pub fn get(&self, id: u32) -> u64 {
        self.values[id as usize]
    }

    pub fn max_value(&self) -> u64 {
        self.values.iter().copied().max().unwrap_or(0)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_uint_file(path, self.values.iter().copied())
    }
}

/// Outcome of resolving one outbound-reference list against the
/// identifier table.
#[derive(Debug, Clone, Copy)]
pub struct LogOutcome {
    pub resolved: usize,
    pub dropped: usize,
}

/// Per-object 1-to-N outbound reference lists. Lists arrive in file
/// order during pass 2 and are appended to a flat body; the per-id
/// header records where each list landed. Each id is written once.
#[derive(Debug, Clone)]
pub struct OutboundTable {
    body: Vec<u32>,
    starts: Vec<u64>,
    lens: Vec<u32>,
}

const UNWRITTEN: u64 = u64::MAX;

impl Default for OutboundTable {
    fn default() -> Self {
        Self::new(0)
    }
}

impl OutboundTable {
    pub fn new(count: u32) -> Self {
        Self {
            body: Vec::new(),
            starts: vec![UNWRITTEN; count as usize],
            lens: vec![0; count as usize],
        }
    }

    pub fn len(&self) -> u32 {
        self.starts.len() as u32
    }

    /// Resolves `addresses` through the identifier table and records the
    /// list for `id`. Unresolvable addresses are dropped and counted.
    pub fn log(&mut self, identifiers: &IdentifierTable, id: u32, addresses: &[u64]) -> LogOutcome {
        debug_assert_eq!(self.starts[id as usize], UNWRITTEN, "outbound list written twice");
        let start = self.body.len() as u64;
        let mut dropped = 0;
        for address in addresses {
            match identifiers.id_of(*address) {
                Some(target) => self.body.push(target),
                None => dropped += 1,
            }
        }
        let resolved = self.body.len() - start as usize;
        self.starts[id as usize] = start;
        self.lens[id as usize] = resolved as u32;
        LogOutcome { resolved, dropped }
    }

    pub fn refs_for(&self, id: u32) -> &[u32] {
        let start = self.starts[id as usize];
        if start == UNWRITTEN {
            return &[];
        }
        let len = self.lens[id as usize] as usize;
        &self.body[start as usize..start as usize + len]
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let max_id = self.body.iter().copied().max().unwrap_or(0);
        let id_width = byte_width_for(u64::from(max_id));
        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        );
        out.write_all(&[id_width as u8])?;
        out.write_all(&(self.starts.len() as u64).to_be_bytes())?;
        // Header entries carry absolute body offsets so the reader can
        // seek without replaying lengths.
        let body_base = 9 + self.starts.len() as u64 * 12;
        for (start, len) in self.starts.iter().zip(&self.lens) {
            let offset = if *start == UNWRITTEN {
                body_base
            } else {
                body_base + start * id_width as u64
            };
            out.write_all(&offset.to_be_bytes())?;
            out.write_all(&len.to_be_bytes())?;
        }
        for id in &self.body {
            write_uint(&mut out, u64::from(*id), id_width)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn write_uint(out: &mut impl Write, value: u64, width: usize) -> Result<()> {
    let bytes = value.to_be_bytes();
    out.write_all(&bytes[8 - width..])?;
    Ok(())
}

pub fn write_uint_file(path: &Path, values: impl Iterator<Item = u64> + Clone) -> Result<()> {
    let max = values.clone().max().unwrap_or(0);
    let width = byte_width_for(max);
    let count = values.clone().count() as u64;
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    out.write_all(&[width as u8])?;
    out.write_all(&count.to_be_bytes())?;
    for value in values {
        write_uint(&mut out, value, width)?;
    }
    out.flush()?;
    Ok(())
}

/// Locations of all persisted artifacts for one index prefix.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub identifiers: PathBuf,
    pub object_to_class: PathBuf,
    pub object_to_position: PathBuf,
    pub object_to_size: PathBuf,
    pub outbound: PathBuf,
    pub classes: PathBuf,
    pub gc_roots: PathBuf,
    pub strings: PathBuf,
}

impl ArtifactPaths {
    pub fn for_prefix(prefix: &Path) -> Self {
        let base = prefix.display();
        Self {
            identifiers: PathBuf::from(format!("{}.idents", base)),
            object_to_class: PathBuf::from(format!("{}.o2class", base)),
            object_to_position: PathBuf::from(format!("{}.o2pos", base)),
            object_to_size: PathBuf::from(format!("{}.o2size", base)),
            outbound: PathBuf::from(format!("{}.outbound", base)),
            classes: PathBuf::from(format!("{}.classes", base)),
            gc_roots: PathBuf::from(format!("{}.roots", base)),
            strings: PathBuf::from(format!("{}.strings", base)),
        }
    }
}

const TABLE_HEADER: u64 = 9;

/// One persisted fixed-width table, read back through the paged reader.
pub struct TableFile {
    reader: PagedReader,
    width: usize,
    count: u64,
}

impl TableFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = PagedReader::open(path)
            .with_context(|| format!("opening index file {}", path.display()))?;
        let width = reader.read_uint(0, 1)? as usize;
        if width == 0 || width > 8 {
            bail!("corrupt index file {}: width {}", path.display(), width);
        }
        let count = reader.read_u64(1)?;
        Ok(Self { reader, width, count })
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&mut self, index: u64) -> Result<u64> {
        if index >= self.count {
            bail!("row {} out of range, table has {}", index, self.count);
        }
        Ok(self.reader.read_uint(TABLE_HEADER + index * self.width as u64, self.width)?)
    }
}

/// The persisted outbound 1-to-N index.
pub struct OutboundFile {
    reader: PagedReader,
    id_width: usize,
    count: u64,
}

impl OutboundFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = PagedReader::open(path)
            .with_context(|| format!("opening outbound index {}", path.display()))?;
        let id_width = reader.read_uint(0, 1)? as usize;
        if id_width == 0 || id_width > 8 {
            bail!("corrupt outbound index {}: id width {}", path.display(), id_width);
        }
        let count = reader.read_u64(1)?;
        Ok(Self { reader, id_width, count })
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn refs_for(&mut self, id: u64) -> Result<Vec<u32>> {
        if id >= self.count {
            bail!("object id {} out of range, index has {}", id, self.count);
        }
        let header = TABLE_HEADER + id * 12;
        let offset = self.reader.read_u64(header)?;
        let len = self.reader.read_u32(header + 8)?;
        let mut refs = Vec::with_capacity(len as usize);
        for i in 0..u64::from(len) {
            refs.push(self.reader.read_uint(offset + i * self.id_width as u64, self.id_width)? as u32);
        }
        Ok(refs)
    }
}

/// Reopens the persisted per-object artifacts of a finished build.
pub struct IndexReader {
    pub identifiers: TableFile,
    pub object_to_class: TableFile,
    pub object_to_position: TableFile,
    pub object_to_size: TableFile,
    pub outbound: OutboundFile,
}

impl IndexReader {
    pub fn open(prefix: &Path) -> Result<Self> {
        let paths = ArtifactPaths::for_prefix(prefix);
        Ok(Self {
            identifiers: TableFile::open(&paths.identifiers)?,
            object_to_class: TableFile::open(&paths.object_to_class)?,
            object_to_position: TableFile::open(&paths.object_to_position)?,
            object_to_size: TableFile::open(&paths.object_to_size)?,
            outbound: OutboundFile::open(&paths.outbound)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_track_observed_maximum() {
        assert_eq!(byte_width_for(0), 1);
        assert_eq!(byte_width_for(0xff), 1);
        assert_eq!(byte_width_for(0x100), 2);
        assert_eq!(byte_width_for(u64::MAX), 8);
    }
}
