//! tutti storage backends.
//!
//! The [`Storage`] trait is the persistence boundary of the dispatch engine.
//! Everything the engine needs from a backend is expressed as per-entity
//! loads/saves plus a small set of conditional (compare-and-set) operations;
//! backends guarantee those are atomic.

mod json_storage;
mod memory;
mod trait_;

pub use json_storage::JsonStorage;
pub use memory::MemoryStorage;
pub use trait_::{DispatchCommit, Result, SkippedConflict, Storage, StorageError};
