//! Platform-specific shared memory operations

pub mod linux;

pub use linux::*;
