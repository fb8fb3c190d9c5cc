use serde::{Deserialize, Serialize};

/// One class or module from the dump, or a synthetic record manufactured
/// during fixup for a class address that never resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRecord {
    pub address: u64,
    pub name: String,
    pub synthetic: bool,
    /// The class's own class-of address. Filled with the synthetic
    /// "unknown class-of-class" during fixup when the dump never says.
    pub class_address: Option<u64>,
    /// Declared field names, in reference-slot order.
    pub fields: Vec<String>,
    pub object_id: Option<u32>,
    pub instance_count: u64,
    pub total_size: u64,
}

impl ClassRecord {
    pub fn new(address: u64, name: String) -> Self {
        Self {
            address,
            name,
            synthetic: false,
            class_address: None,
            fields: Vec::new(),
            object_id: None,
            instance_count: 0,
            total_size: 0,
        }
    }

    pub fn synthetic(address: u64, name: String) -> Self {
        Self { synthetic: true, ..Self::new(address, name) }
    }

    pub fn add_instance(&mut self, size: u64) {
        self.instance_count += 1;
        self.total_size += size;
    }

    /// Reference-slot index of a declared field, counted after the
    /// class pseudo-reference.
    pub fn field_slot(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}
