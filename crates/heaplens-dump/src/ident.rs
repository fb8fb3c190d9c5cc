/// The address↔ObjectId bijection. Addresses are registered during
/// pass 1; [`sort`](Self::sort) freezes rank order as the id assignment.
#[derive(Debug, Default, Clone)]
pub struct IdentifierTable {
    addresses: Vec<u64>,
    sorted: bool,
}

impl IdentifierTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, address: u64) {
        debug_assert!(!self.sorted, "identifier table already frozen");
        self.addresses.push(address);
    }

    pub fn sort(&mut self) {
        self.addresses.sort_unstable();
        self.addresses.dedup();
        self.sorted = true;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn len(&self) -> u32 {
        self.addresses.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn address_of(&self, id: u32) -> Option<u64> {
        self.addresses.get(id as usize).copied()
    }

    pub fn id_of(&self, address: u64) -> Option<u32> {
        debug_assert!(self.sorted, "identifier table not yet sorted");
        self.addresses.binary_search(&address).ok().map(|i| i as u32)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + Clone + '_ {
        self.addresses.iter().copied()
    }

    pub fn max_address(&self) -> u64 {
        self.addresses.last().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_lookup_is_a_bijection() {
        let mut t = IdentifierTable::new();
        for a in [0x300u64, 0x100, 0x200] {
            t.add(a);
        }
        t.sort();
        assert_eq!(t.len(), 3);
        for id in 0..t.len() {
            let addr = t.address_of(id).unwrap();
            assert_eq!(t.id_of(addr), Some(id));
        }
        assert_eq!(t.id_of(0x150), None);
    }
}
