use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

// String payloads are held out-of-band, one `0xADDR encoded-value` line
// per string, so the index tables stay fixed-width.

pub struct StringSink {
    out: BufWriter<File>,
}

impl StringSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating string side-file {}", path.display()))?;
        Ok(Self { out: BufWriter::new(file) })
    }

    pub fn append(&mut self, address: u64, value: &str) -> Result<()> {
        writeln!(self.out, "0x{:x} {}", address, percent_encode(value))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

pub fn load_strings(path: &Path) -> Result<HashMap<u64, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading string side-file {}", path.display()))?;
    let mut strings = HashMap::new();
    for line in text.lines() {
        let (addr, encoded) = line
            .split_once(' ')
            .ok_or_else(|| anyhow!("malformed string side-file line: {:?}", line))?;
        let addr = crate::record::parse_address(addr)?;
        let value = percent_decode(encoded)
            .ok_or_else(|| anyhow!("malformed percent encoding: {:?}", encoded))?;
        strings.insert(addr, value);
    }
    Ok(strings)
}

pub fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_round_trips() {
        let raw = "hello world / 100% däta";
        assert_eq!(percent_decode(&percent_encode(raw)).as_deref(), Some(raw));
    }

    #[test]
    fn truncated_escape_is_rejected() {
        assert_eq!(percent_decode("%4"), None);
    }
}
