//! # Cross-Process Shared Memory Runtime
//!
//! Named shared memory segments and process-shared mutexes placed inside
//! them, for cooperating processes on one Linux host.
//!
//! ## Features
//!
//! - **Named Segments**: Fixed-size, zero-filled regions in the POSIX shm
//!   namespace, attachable by name from any process
//! - **Generations**: Re-creating a name yields fresh memory; older handles
//!   keep their own unaliased copy instead of silently sharing
//! - **Process-Shared Mutexes**: Robust pthread mutexes stored at an offset
//!   inside a segment; a holder that dies does not wedge the lock
//! - **Child Harnesses**: Fork- and thread-based runners for concurrent
//!   verification scenarios
//!
//! ## Object Layout
//!
//! ```text
//!   process A                   /dev/shm                    process B
//! ┌────────────┐        ┌──────────────────────┐        ┌────────────┐
//! │ ShmRuntime │──────► │ /shmrt_r.<name>      │ ◄──────│ ShmRuntime │
//! │            │        │   live generation    │        │            │
//! │  Segment ──┼──────► │ /shmrt_d<gen>.<name> │ ◄──────┼── Segment  │
//! │  ShmMutex  │        │  [mutex | payload]   │        │  ShmMutex  │
//! └────────────┘        └──────────────────────┘        └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shmrt_core::ShmRuntime;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = ShmRuntime::default();
//! let segment = runtime.create_segment("counters", 4096)?;
//! let mutex = runtime.create_mutex(&segment, 0)?;
//!
//! let counter = runtime.mutex_size();
//! {
//!     let _guard = mutex.lock()?;
//!     let view = segment.base();
//!     view.write_u32(counter, view.read_u32(counter) + 1);
//! }
//!
//! // Elsewhere, with the same name and size:
//! let other = runtime.attach_segment("counters", 4096)?;
//! let _shared = runtime.attach_mutex(&other, 0)?;
//!
//! runtime.destroy_segment("counters")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use shmrt_core::{ShmError, ShmRuntime};
//!
//! let runtime = ShmRuntime::default();
//! match runtime.attach_segment("missing_segment", 4096) {
//!     Ok(_segment) => {}
//!     Err(ShmError::NotFound { name }) => eprintln!("Segment '{name}' not created yet"),
//!     Err(ShmError::SizeMismatch { actual, .. }) => eprintln!("Segment holds {actual} bytes"),
//!     Err(e) => eprintln!("Unexpected error: {e}"),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! - **ShmRuntime**: Stateless apart from configuration; share freely
//! - **Segment**: `Send + Sync`; byte access is volatile and unordered
//! - **ShmMutex**: `Send + Sync`; orders access across threads and processes

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod generation;
pub mod harness;
pub mod lifecycle;
pub mod mutex;
pub mod platform;
pub mod runtime;
pub mod segment;
pub mod storm;

pub use error::{ShmError, ShmErrorKind, ShmResult};
pub use harness::{ForkHarness, ThreadHarness};
pub use lifecycle::{SegmentMetadata, SegmentRegistry, registry};
pub use mutex::{MUTEX_STATE_SIZE, ShmMutex, ShmMutexGuard};
pub use runtime::{SegmentInfo, ShmRuntime};
pub use segment::{Segment, SharedView};
pub use shmrt_common::harness::{ChildContext, ChildHarness, HarnessError};

/// Initialize compact tracing for tests and embedding binaries.
///
/// Honors `RUST_LOG`; calling it more than once is harmless.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
