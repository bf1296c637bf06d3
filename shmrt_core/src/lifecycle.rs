//! Process-wide registry of segments created by this process
//!
//! The registry is explicit process state: an entry is added by every
//! successful create and removed by destroy. Nothing is collected
//! implicitly; [`ShmRuntime::destroy_owned`](crate::ShmRuntime::destroy_owned)
//! is the teardown hook. A forked child starts with a copy of its parent's
//! registry but does not own those segments: [`SegmentRegistry::owned`]
//! only reports entries created by the calling process.

use crate::platform::get_current_pid;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::SystemTime;

/// Metadata for tracking segment lifecycle
#[derive(Debug, Clone)]
pub struct SegmentMetadata {
    /// Object name prefix of the creating runtime
    pub prefix: String,
    /// Logical segment name
    pub name: String,
    /// Generation created
    pub generation: u64,
    /// Size in bytes
    pub size: usize,
    /// Creator process ID
    pub creator_pid: u32,
    /// Creation time
    pub created_at: SystemTime,
}

/// Segments created and not yet destroyed by this process.
#[derive(Debug, Default)]
pub struct SegmentRegistry {
    owned: HashMap<(String, String), SegmentMetadata>,
}

impl SegmentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created segment, replacing any earlier generation of it
    pub fn register(&mut self, metadata: SegmentMetadata) {
        self.owned
            .insert((metadata.prefix.clone(), metadata.name.clone()), metadata);
    }

    /// Forget a segment
    pub fn unregister(&mut self, prefix: &str, name: &str) -> Option<SegmentMetadata> {
        self.owned.remove(&(prefix.to_string(), name.to_string()))
    }

    /// Whether this process created `name` and has not destroyed it
    pub fn is_registered(&self, prefix: &str, name: &str) -> bool {
        self.owned
            .contains_key(&(prefix.to_string(), name.to_string()))
    }

    /// Segments the calling process created under `prefix`, oldest first
    pub fn owned(&self, prefix: &str) -> Vec<SegmentMetadata> {
        let pid = get_current_pid();
        let mut owned: Vec<_> = self
            .owned
            .values()
            .filter(|m| m.prefix == prefix && m.creator_pid == pid)
            .cloned()
            .collect();
        owned.sort_by_key(|m| m.created_at);
        owned
    }

    /// Number of owned segments across all prefixes
    pub fn len(&self) -> usize {
        self.owned.len()
    }

    /// Whether no segments are owned
    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }
}

static GLOBAL_REGISTRY: LazyLock<Mutex<SegmentRegistry>> =
    LazyLock::new(|| Mutex::new(SegmentRegistry::new()));

/// Lock the process-wide registry
pub fn registry() -> MutexGuard<'static, SegmentRegistry> {
    GLOBAL_REGISTRY.lock()
}
