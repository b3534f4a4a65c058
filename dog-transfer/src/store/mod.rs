//! Built-in storage adapters.
//!
//! The disk adapter is the default when no adapter is configured; the memory
//! adapter backs tests and embedded use.

mod disk;
mod memory;

pub use disk::DiskAdapter;
pub use memory::MemoryAdapter;
