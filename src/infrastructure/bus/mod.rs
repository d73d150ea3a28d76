//! Bus infrastructure: the correlated-call client and a reference
//! in-memory bus implementation.

pub mod client;
pub mod memory;

pub use client::BusClient;
pub use memory::{InMemoryBus, InMemoryBusConfig};
