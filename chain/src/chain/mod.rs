//! Chain management: the orphan pool, the locator, and the manager that
//! owns the only mutable paths into the tree and the stores.

pub mod locator;
pub mod manager;
pub mod orphan;

pub use locator::BlockLocator;
pub use manager::{Accepted, ChainCore, TipInfo};
pub use orphan::OrphanPool;
