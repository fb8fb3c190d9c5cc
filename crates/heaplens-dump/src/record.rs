use anyhow::{anyhow, Result};
use serde::Deserialize;

/// One self-describing record from the dump stream. The stream is
/// line-delimited JSON; unknown keys are ignored so newer dump writers
/// keep parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct DumpRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: Option<String>,
    pub class: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub memsize: Option<u64>,
    pub value: Option<String>,
    pub length: Option<u64>,
    #[serde(default)]
    pub fields: Vec<String>,
    pub root: Option<String>,
    pub context: Option<String>,
}

pub fn parse_record(line: &[u8]) -> Result<DumpRecord> {
    let record: DumpRecord = serde_json::from_slice(line)?;
    Ok(record)
}

pub fn parse_address(text: &str) -> Result<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("address without 0x prefix: {:?}", text))?;
    u64::from_str_radix(digits, 16).map_err(|e| anyhow!("bad address {:?}: {}", text, e))
}

impl DumpRecord {
    pub fn is_root(&self) -> bool {
        self.kind == "ROOT"
    }

    pub fn is_class_like(&self) -> bool {
        self.kind == "CLASS" || self.kind == "MODULE"
    }

    // IMEMO records carry interpreter-internal bookkeeping, not heap objects.
    pub fn is_skipped(&self) -> bool {
        self.kind == "IMEMO"
    }

    pub fn address(&self) -> Result<u64> {
        let text = self
            .address
            .as_deref()
            .ok_or_else(|| anyhow!("{} record without address", self.kind))?;
        parse_address(text)
    }

    pub fn class_address(&self) -> Result<Option<u64>> {
        self.class.as_deref().map(parse_address).transpose()
    }

    pub fn context_address(&self) -> Result<Option<u64>> {
        self.context.as_deref().map(parse_address).transpose()
    }

    pub fn reference_addresses(&self) -> Result<Vec<u64>> {
        self.references.iter().map(|r| parse_address(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_record() {
        let line = br#"{"type":"STRING","address":"0x7f1200","class":"0x7f10c0","memsize":40,"value":"hi","references":["0x7f1080"]}"#;
        let r = parse_record(line).unwrap();
        assert_eq!(r.kind, "STRING");
        assert_eq!(r.address().unwrap(), 0x7f1200);
        assert_eq!(r.class_address().unwrap(), Some(0x7f10c0));
        assert_eq!(r.reference_addresses().unwrap(), vec![0x7f1080]);
    }

    #[test]
    fn rejects_bare_address() {
        assert!(parse_address("7f1200").is_err());
        assert!(parse_address("0xzz").is_err());
    }
}
