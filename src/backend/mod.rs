//! Backend implementations.

mod memory;

pub use memory::{Gate, MemoryBackend, Operation};
