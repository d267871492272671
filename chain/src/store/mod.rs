//! Persistence: append-only block files and the key/value index store.

pub mod blockfile;
pub mod indexdb;

pub use blockfile::BlockFileStore;
pub use indexdb::{IndexBatch, IndexStore};
