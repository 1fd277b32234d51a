//! User store implementations backed by process memory

mod memory;

pub use memory::{BoundedMemoryStore, DEFAULT_WORKERS};
