//! shmrt Common Library
//!
//! This crate provides shared constants, configuration loading utilities
//! and the child-harness contract for all shmrt workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Segment size limits and OS naming constants
//! - [`config`] - Configuration loading traits and types
//! - [`harness`] - Contract for spawning and supervising verification children
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! shmrt_common = { path = "../shmrt_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use shmrt_common::consts::*;
//! use shmrt_common::config::{ConfigLoader, ShmConfig};
//! ```

pub mod config;
pub mod consts;
pub mod harness;
