//! Message broker implementations

mod memory;

pub use memory::InMemoryBroker;
