pub mod builder;
pub mod class;
pub mod ident;
pub mod index;
pub mod reader;
pub mod record;
pub mod roots;
pub mod strings;

pub use crate::builder::{
    BuildOptions, BuildStats, CancelToken, Cancelled, IndexBuilder, SnapshotIndex,
};
pub use crate::reader::PagedReader;
