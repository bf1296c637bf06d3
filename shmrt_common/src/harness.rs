//! # Child Harness Trait
//!
//! Defines the contract used by verification scenarios to run code in
//! concurrent children (processes or threads) and collect their outcome.
//! `shmrt_core::harness` provides fork- and thread-based implementations.
//!
//! # Design
//!
//! The trait is thin: spawn a child running a callback, wait for every
//! child spawned so far, and sleep briefly. A child reports a logic
//! failure through its [`ChildContext`]; a child that panics is treated the
//! same way. Environment failures (the child could not be started at all)
//! surface as [`HarnessError::SpawnFailed`] from `spawn_child` and never mix
//! with child failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The environment could not start a child.
    #[error("failed to spawn child: {source}")]
    SpawnFailed {
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// One or more children signalled failure, panicked or died abnormally.
    #[error("{failed} of {total} children failed")]
    ChildrenFailed {
        /// Number of failed children.
        failed: usize,
        /// Number of children waited for.
        total: usize,
    },

    /// Waiting for a child failed at the OS level.
    #[error("failed to wait for child: {source}")]
    WaitFailed {
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Whether this error was caused by child logic rather than the environment.
    pub fn is_child_failure(&self) -> bool {
        matches!(self, HarnessError::ChildrenFailed { .. })
    }
}

/// Handle given to every child callback.
///
/// Cloning shares the failure flag, so a thread harness can observe
/// failures from the parent. In a forked child the flag is simply private
/// to that process and converted into an exit status by the harness.
#[derive(Debug, Clone, Default)]
pub struct ChildContext {
    failed: Arc<AtomicBool>,
}

impl ChildContext {
    /// Create a context with a cleared failure flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this child as failed. Execution continues; the harness reports
    /// the failure once the child returns.
    pub fn signal_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Whether `signal_failed` has been called.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Signal failure unless `condition` holds. Returns `condition`.
    pub fn check(&self, condition: bool) -> bool {
        if !condition {
            self.signal_failed();
        }
        condition
    }
}

/// Supervisor contract for verification children.
///
/// # Example
///
/// ```rust,ignore
/// fn run<H: ChildHarness>(harness: &mut H) -> Result<(), HarnessError> {
///     harness.spawn_child(|ctx| {
///         ctx.check(1 + 1 == 2);
///     })?;
///     harness.wait_for_children()
/// }
/// ```
pub trait ChildHarness {
    /// Start a new child running `callback`.
    ///
    /// Returns `HarnessError::SpawnFailed` if the child could not be started.
    fn spawn_child<F>(&mut self, callback: F) -> Result<(), HarnessError>
    where
        F: FnOnce(&ChildContext) + Send + 'static;

    /// Block until every child spawned so far has exited.
    ///
    /// Returns `HarnessError::ChildrenFailed` if any of them failed.
    fn wait_for_children(&mut self) -> Result<(), HarnessError>;

    /// Runtime-specific short sleep used while polling shared state.
    fn short_sleep(&self);
}
