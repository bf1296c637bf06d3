//! # shmrt
//!
//! Operator tool for the shared memory runtime: create, attach to, inspect
//! and destroy named segments, and run cross-process mutex stress tests.

pub mod commands;
pub mod config;

pub use commands::CommandError;
pub use config::CliConfig;
