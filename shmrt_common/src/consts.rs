//! SHM (Shared Memory) constants.
//!
//! These constants define the fundamental limits of the shmrt shared memory
//! runtime. They are the single source of truth - all other crates should
//! import from here.

/// Maximum shared memory segment size in bytes.
///
/// Set to 1GB as a reasonable upper limit to prevent excessive memory usage.
pub const SHM_MAX_SIZE: usize = 1_073_741_824; // 1GB

/// Default prefix prepended to every OS shared-memory object name.
pub const DEFAULT_NAME_PREFIX: &str = "shmrt_";

/// Longest accepted name prefix in bytes.
pub const MAX_PREFIX_LEN: usize = 32;

/// Longest OS object name accepted by `shm_open` (Linux `NAME_MAX`).
///
/// Includes the generation suffix appended to backing objects.
pub const SHM_NAME_MAX: usize = 255;

/// Default permission bits for created objects (owner read/write only).
pub const DEFAULT_SHM_MODE: u32 = 0o600;
