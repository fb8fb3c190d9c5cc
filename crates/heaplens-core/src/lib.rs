pub mod extract;
pub mod quantize;
pub mod snapshot;

pub use crate::snapshot::{schema, HeapObject, Snapshot, SnapshotError};
