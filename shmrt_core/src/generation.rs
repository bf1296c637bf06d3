//! Name records and generation counters
//!
//! A logical segment name maps to a small shared *name record* and to one
//! backing object per generation:
//!
//! ```text
//! /<prefix>r.<name>        name record (NameRecord, 64 bytes)
//! /<prefix>d<gen>.<name>   backing object of generation <gen>
//! ```
//!
//! The `r.` / `d<digits>.` tags keep the two families disjoint for any name.
//! Every create bumps `next_generation` and publishes the new generation in
//! `live_generation`; attach always resolves the live one. Older
//! generations lose their OS name but stay mapped (and independent) for
//! whoever still holds them.

use crate::error::{ShmError, ShmResult};
use memmap2::MmapMut;
use shmrt_common::consts::SHM_NAME_MAX;
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Longest decimal rendering of a `u64` generation.
const GENERATION_DIGITS: usize = 20;

/// Shared per-name bookkeeping, stored in its own shm object.
///
/// All-zero is the valid initial state: no generation created, none live.
#[repr(C, align(64))]
pub struct NameRecord {
    /// Last generation handed out
    next_generation: AtomicU64,
    /// Generation attach resolves to; 0 when none is live
    live_generation: AtomicU64,
    /// Size in bytes of the live generation
    live_size: AtomicU64,
    /// Process that created the live generation
    creator_pid: AtomicU32,
    _reserved: [u8; 36],
}

const_assert_eq!(core::mem::size_of::<NameRecord>(), 64);

/// Size of the name record object in bytes.
pub const NAME_RECORD_SIZE: usize = core::mem::size_of::<NameRecord>();

/// Snapshot of the live generation published in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveGeneration {
    /// Generation number (never 0)
    pub generation: u64,
    /// Size in bytes
    pub size: usize,
    /// Creator process ID
    pub creator_pid: u32,
}

impl NameRecord {
    /// Reserve the next generation number.
    pub fn allocate(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Make `generation` the one attach resolves to.
    ///
    /// Returns the previously live generation, if any.
    pub fn publish(&self, generation: u64, size: usize, creator_pid: u32) -> Option<u64> {
        self.live_size.store(size as u64, Ordering::Relaxed);
        self.creator_pid.store(creator_pid, Ordering::Relaxed);
        let previous = self.live_generation.swap(generation, Ordering::AcqRel);
        (previous != 0).then_some(previous)
    }

    /// Clear the live generation. Returns what was live.
    pub fn retire(&self) -> Option<u64> {
        let previous = self.live_generation.swap(0, Ordering::AcqRel);
        (previous != 0).then_some(previous)
    }

    /// Currently live generation, if any.
    pub fn live(&self) -> Option<LiveGeneration> {
        let generation = self.live_generation.load(Ordering::Acquire);
        if generation == 0 {
            return None;
        }
        Some(LiveGeneration {
            generation,
            size: self.live_size.load(Ordering::Relaxed) as usize,
            creator_pid: self.creator_pid.load(Ordering::Relaxed),
        })
    }
}

/// A name record mapped into this process.
pub struct MappedRecord {
    mmap: MmapMut,
}

impl MappedRecord {
    /// Wrap a mapping of at least `NAME_RECORD_SIZE` bytes.
    pub fn new(mmap: MmapMut) -> Self {
        debug_assert!(mmap.len() >= NAME_RECORD_SIZE);
        Self { mmap }
    }

    /// Access the shared record.
    pub fn record(&self) -> &NameRecord {
        // SAFETY: the mapping is page-aligned, at least NAME_RECORD_SIZE long,
        // and every field is an atomic (or padding) for which all-zero is valid.
        unsafe { &*(self.mmap.as_ptr() as *const NameRecord) }
    }
}

/// OS object names derived from a prefix and a logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNames {
    prefix: String,
    name: String,
}

impl ObjectNames {
    /// Validate `name` and build the naming scheme for it.
    pub fn new(prefix: &str, name: &str) -> ShmResult<Self> {
        let longest = 1 + prefix.len() + 1 + GENERATION_DIGITS + 1 + name.len();
        if name.is_empty() || name.contains(['/', '\0']) || longest > SHM_NAME_MAX {
            return Err(ShmError::InvalidName {
                name: name.to_string(),
            });
        }

        Ok(Self {
            prefix: prefix.to_string(),
            name: name.to_string(),
        })
    }

    /// Logical name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS name of the name record
    pub fn record(&self) -> String {
        format!("/{}r.{}", self.prefix, self.name)
    }

    /// OS name of the backing object for `generation`
    pub fn backing(&self, generation: u64) -> String {
        format!("/{}d{}.{}", self.prefix, generation, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_record() -> Box<NameRecord> {
        Box::new(NameRecord {
            next_generation: AtomicU64::new(0),
            live_generation: AtomicU64::new(0),
            live_size: AtomicU64::new(0),
            creator_pid: AtomicU32::new(0),
            _reserved: [0; 36],
        })
    }

    #[test]
    fn test_fresh_record_has_nothing_live() {
        let record = zeroed_record();
        assert!(record.live().is_none());
        assert!(record.retire().is_none());
    }

    #[test]
    fn test_generations_are_monotonic() {
        let record = zeroed_record();
        assert_eq!(record.allocate(), 1);
        assert_eq!(record.allocate(), 2);
        assert_eq!(record.allocate(), 3);
    }

    #[test]
    fn test_publish_replaces_previous() {
        let record = zeroed_record();
        let g1 = record.allocate();
        assert_eq!(record.publish(g1, 4092, 10), None);

        let g2 = record.allocate();
        assert_eq!(record.publish(g2, 100, 11), Some(g1));

        let live = record.live().unwrap();
        assert_eq!(live.generation, g2);
        assert_eq!(live.size, 100);
        assert_eq!(live.creator_pid, 11);

        assert_eq!(record.retire(), Some(g2));
        assert!(record.live().is_none());
    }

    #[test]
    fn test_name_families_are_disjoint() {
        let names = ObjectNames::new("p_", "seg").unwrap();
        assert_eq!(names.record(), "/p_r.seg");
        assert_eq!(names.backing(7), "/p_d7.seg");

        // A name that looks like a backing object never maps onto one.
        let tricky = ObjectNames::new("p_", "d7.seg").unwrap();
        assert_ne!(tricky.record(), names.backing(7));
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(ObjectNames::new("p_", "").is_err());
        assert!(ObjectNames::new("p_", "a/b").is_err());
        assert!(ObjectNames::new("p_", "a\0b").is_err());
        assert!(ObjectNames::new("p_", &"n".repeat(SHM_NAME_MAX)).is_err());
        assert!(ObjectNames::new("p_", "fine-name_01").is_ok());
    }
}
