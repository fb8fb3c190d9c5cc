use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;

pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;
pub const DEFAULT_PAGE_BUDGET: usize = 64;

struct Page {
    start: u64,
    // Valid prefix of the page; may grow forward, never shrinks.
    data: Vec<u8>,
}

/// Random access over a dump file through fixed-size cached pages.
///
/// Pages are keyed by `position / page_size` and evicted with a bounded
/// LRU budget; a miss reloads transparently from the backing file. End of
/// file is sticky: once a short read is observed the logical length is
/// lowered and reads at or past it return zero bytes rather than an error.
pub struct PagedReader {
    file: File,
    page_size: usize,
    logical_len: u64,
    pages: LruCache<u64, Page>,
}

impl PagedReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_page_size(path, DEFAULT_PAGE_SIZE, DEFAULT_PAGE_BUDGET)
    }

    pub fn with_page_size(path: &Path, page_size: usize, page_budget: usize) -> io::Result<Self> {
        if page_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "page size must be non-zero"));
        }
        let file = File::open(path)?;
        let logical_len = file.metadata()?.len();
        let budget = NonZeroUsize::new(page_budget).unwrap_or(NonZeroUsize::MIN);
        Ok(Self { file, page_size, logical_len, pages: LruCache::new(budget) })
    }

    /// Logical file length, lowered if a short read was observed.
    pub fn len(&self) -> u64 {
        self.logical_len
    }

    pub fn is_empty(&self) -> bool {
        self.logical_len == 0
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn clear_pages(&mut self) {
        self.pages.clear();
    }

    /// Fills `buf` from `pos`, returning the number of bytes copied.
    /// Returns 0 at or past end of file.
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            let at = pos + copied as u64;
            if at >= self.logical_len {
                break;
            }
            let key = at / self.page_size as u64;
            self.ensure_page(key, at)?;
            let page = match self.pages.get(&key) {
                Some(p) => p,
                None => break,
            };
            let off = (at - page.start) as usize;
            if off >= page.data.len() {
                // Short page: EOF was observed while filling it.
                break;
            }
            let n = (buf.len() - copied).min(page.data.len() - off);
            buf[copied..copied + n].copy_from_slice(&page.data[off..off + n]);
            copied += n;
        }
        Ok(copied)
    }

    /// Like [`read_at`](Self::read_at) but errors with `UnexpectedEof`
    /// instead of returning short.
    pub fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let n = self.read_at(pos, buf)?;
        if n < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {} bytes at {}, file ends after {}", buf.len(), pos, n),
            ));
        }
        Ok(())
    }

    /// Big-endian unsigned decode of `width` bytes (1..=8). A width
    /// outside that range is an invalid argument, not a read error.
    pub fn read_uint(&mut self, pos: u64, width: usize) -> io::Result<u64> {
        if width == 0 || width > 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("field width {} out of range 1..=8", width),
            ));
        }
        let mut buf = [0u8; 8];
        self.read_exact_at(pos, &mut buf[..width])?;
        let mut value = 0u64;
        for b in &buf[..width] {
            value = (value << 8) | u64::from(*b);
        }
        Ok(value)
    }

    pub fn read_u16(&mut self, pos: u64) -> io::Result<u16> {
        Ok(self.read_uint(pos, 2)? as u16)
    }

    pub fn read_u32(&mut self, pos: u64) -> io::Result<u32> {
        Ok(self.read_uint(pos, 4)? as u32)
    }

    pub fn read_u64(&mut self, pos: u64) -> io::Result<u64> {
        self.read_uint(pos, 8)
    }

    fn ensure_page(&mut self, key: u64, pos: u64) -> io::Result<()> {
        let page_start = key * self.page_size as u64;
        if !self.pages.contains(&key) {
            let mut data = Vec::with_capacity(self.page_size);
            self.fill_forward(page_start, &mut data, pos)?;
            self.pages.put(key, Page { start: page_start, data });
            return Ok(());
        }
        let (valid_end, full) = {
            let page = self.pages.peek(&key).expect("page present");
            (page.start + page.data.len() as u64, page.data.len() >= self.page_size)
        };
        if pos >= valid_end && !full && valid_end < self.logical_len {
            // Extend the page forward; existing bytes are never rewritten.
            let mut data = self.pages.pop(&key).expect("page present").data;
            self.fill_forward(valid_end, &mut data, pos)?;
            self.pages.put(key, Page { start: page_start, data });
        } else {
            self.pages.promote(&key);
        }
        Ok(())
    }

    fn fill_forward(&mut self, from: u64, data: &mut Vec<u8>, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(from))?;
        let mut cursor = from;
        while data.len() < self.page_size && cursor <= pos {
            let want = self.page_size - data.len();
            let mut chunk = vec![0u8; want];
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                if cursor < self.logical_len {
                    self.logical_len = cursor;
                }
                break;
            }
            data.extend_from_slice(&chunk[..n]);
            cursor += n as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn width_bounds_are_invalid_input() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[1, 2, 3, 4]).unwrap();
        let mut r = PagedReader::open(f.path()).unwrap();
        assert_eq!(r.read_uint(0, 0).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(r.read_uint(0, 9).unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }
}
