//! Mutex increment storm
//!
//! Layout shared by every participant:
//!
//! ```text
//! [0, mutex_size)                      lock state
//! [mutex_size, mutex_size + 4)         u32 counter
//! ```
//!
//! Each participant locks, increments the counter and unlocks `iterations`
//! times. With mutual exclusion the final counter equals the total number
//! of increments across all participants.

use crate::error::ShmResult;
use crate::mutex::ShmMutex;
use crate::runtime::ShmRuntime;
use crate::segment::Segment;
use tracing::debug;

/// Offset of the storm mutex.
pub const STORM_MUTEX_OFFSET: usize = 0;

/// Increments per participant used by the stock scenarios.
pub const DEFAULT_STORM_ITERATIONS: u32 = 0xF_FFFF;

/// Offset of the counter, directly behind the lock state.
pub fn counter_offset(runtime: &ShmRuntime) -> usize {
    STORM_MUTEX_OFFSET + runtime.mutex_size()
}

/// Smallest segment holding the storm layout.
pub fn storm_segment_size(runtime: &ShmRuntime) -> usize {
    counter_offset(runtime) + core::mem::size_of::<u32>()
}

/// Perform `iterations` locked increments of the counter.
pub fn increment_storm(
    segment: &Segment,
    mutex: &ShmMutex<'_>,
    counter_offset: usize,
    iterations: u32,
) -> ShmResult<()> {
    let view = segment.base();
    for _ in 0..iterations {
        let guard = mutex.lock()?;
        let value = view.read_u32(counter_offset);
        view.write_u32(counter_offset, value.wrapping_add(1));
        guard.unlock()?;
    }
    debug!(segment = segment.name(), iterations, "increment storm finished");
    Ok(())
}

/// Read the counter under the lock.
pub fn read_counter(
    segment: &Segment,
    mutex: &ShmMutex<'_>,
    counter_offset: usize,
) -> ShmResult<u32> {
    let guard = mutex.lock()?;
    let value = segment.base().read_u32(counter_offset);
    guard.unlock()?;
    Ok(value)
}
