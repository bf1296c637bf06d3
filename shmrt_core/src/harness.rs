//! Process and thread implementations of [`ChildHarness`]
//!
//! [`ForkHarness`] runs each child in a forked process, which is the mode the
//! runtime exists for: segments and mutexes created before the fork are
//! inherited, and anything else is reached by name. [`ThreadHarness`] runs
//! the same callbacks on threads of the current process.

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use shmrt_common::harness::{ChildContext, ChildHarness, HarnessError};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay used by [`ChildHarness::short_sleep`] in both harnesses.
pub const SHORT_SLEEP: Duration = Duration::from_millis(1);

const CHILD_OK: i32 = 0;
const CHILD_FAILED: i32 = 1;

/// Runs children as forked processes.
///
/// Only waits for the PIDs it forked itself, so several harnesses can run
/// side by side in one test binary.
#[derive(Debug, Default)]
pub struct ForkHarness {
    children: Vec<Pid>,
}

impl ForkHarness {
    /// Create a harness with no children
    pub fn new() -> Self {
        Self::default()
    }

    /// Children spawned and not yet waited for
    pub fn pending(&self) -> usize {
        self.children.len()
    }

    fn run_child<F>(callback: F) -> !
    where
        F: FnOnce(&ChildContext),
    {
        let ctx = ChildContext::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&ctx)));
        let code = match outcome {
            Ok(()) if !ctx.has_failed() => CHILD_OK,
            _ => CHILD_FAILED,
        };
        // SAFETY: _exit only terminates the process; skipping atexit handlers
        // and destructors inherited from the parent is the intent.
        unsafe { libc::_exit(code) }
    }

    /// Wait for `pid`, returning whether it exited cleanly.
    fn reap(pid: Pid) -> Result<bool, Errno> {
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code == CHILD_OK),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    warn!(pid = pid.as_raw(), ?signal, "child killed by signal");
                    return Ok(false);
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl ChildHarness for ForkHarness {
    fn spawn_child<F>(&mut self, callback: F) -> Result<(), HarnessError>
    where
        F: FnOnce(&ChildContext) + Send + 'static,
    {
        // SAFETY: the child only runs `callback` and then calls _exit; it
        // never returns into the caller's stack.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => Self::run_child(callback),
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), "forked child");
                self.children.push(child);
                Ok(())
            }
            Err(e) => Err(HarnessError::SpawnFailed { source: e.into() }),
        }
    }

    fn wait_for_children(&mut self) -> Result<(), HarnessError> {
        let total = self.children.len();
        let mut failed = 0;
        let mut wait_error = None;

        for pid in self.children.drain(..) {
            match Self::reap(pid) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(pid = pid.as_raw(), "child failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(pid = pid.as_raw(), "waitpid failed: {e}");
                    wait_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = wait_error {
            return Err(HarnessError::WaitFailed { source: e.into() });
        }
        if failed > 0 {
            return Err(HarnessError::ChildrenFailed { failed, total });
        }
        Ok(())
    }

    fn short_sleep(&self) {
        std::thread::sleep(SHORT_SLEEP);
    }
}

impl Drop for ForkHarness {
    fn drop(&mut self) {
        if self.children.is_empty() {
            return;
        }
        warn!(
            count = self.children.len(),
            "harness dropped with unwaited children, reaping"
        );
        for pid in self.children.drain(..) {
            let _ = Self::reap(pid);
        }
    }
}

/// Runs children as threads of the current process.
#[derive(Debug, Default)]
pub struct ThreadHarness {
    children: Vec<(JoinHandle<()>, ChildContext)>,
    spawned: usize,
}

impl ThreadHarness {
    /// Create a harness with no children
    pub fn new() -> Self {
        Self::default()
    }

    /// Children spawned and not yet waited for
    pub fn pending(&self) -> usize {
        self.children.len()
    }
}

impl ChildHarness for ThreadHarness {
    fn spawn_child<F>(&mut self, callback: F) -> Result<(), HarnessError>
    where
        F: FnOnce(&ChildContext) + Send + 'static,
    {
        let ctx = ChildContext::new();
        let child_ctx = ctx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("shmrt-child-{}", self.spawned))
            .spawn(move || callback(&child_ctx))
            .map_err(|source| HarnessError::SpawnFailed { source })?;

        self.spawned += 1;
        self.children.push((handle, ctx));
        Ok(())
    }

    fn wait_for_children(&mut self) -> Result<(), HarnessError> {
        let total = self.children.len();
        let mut failed = 0;

        for (handle, ctx) in self.children.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            let panicked = handle.join().is_err();
            if panicked || ctx.has_failed() {
                warn!(thread = %name, panicked, "child failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(HarnessError::ChildrenFailed { failed, total });
        }
        Ok(())
    }

    fn short_sleep(&self) {
        std::thread::sleep(SHORT_SLEEP);
    }
}

impl Drop for ThreadHarness {
    fn drop(&mut self) {
        for (handle, _) in self.children.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<H: ChildHarness>(harness: &mut H) {
        harness.spawn_child(|ctx| {
            ctx.check(true);
        })
        .unwrap();
        harness.spawn_child(|_| {}).unwrap();
        assert!(harness.wait_for_children().is_ok());

        harness.spawn_child(|ctx| ctx.signal_failed()).unwrap();
        harness.spawn_child(|_| {}).unwrap();
        match harness.wait_for_children() {
            Err(HarnessError::ChildrenFailed { failed, total }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        harness.spawn_child(|_| panic!("child panic")).unwrap();
        let err = harness.wait_for_children().unwrap_err();
        assert!(err.is_child_failure());

        // Nothing pending: trivially successful.
        assert!(harness.wait_for_children().is_ok());
    }

    #[test]
    fn test_thread_harness_reports_outcomes() {
        let mut harness = ThreadHarness::new();
        exercise(&mut harness);
        assert_eq!(harness.pending(), 0);
    }

    #[test]
    fn test_fork_harness_reports_outcomes() {
        let mut harness = ForkHarness::new();
        exercise(&mut harness);
        assert_eq!(harness.pending(), 0);
    }

    #[test]
    fn test_short_sleep_returns() {
        let harness = ThreadHarness::new();
        let start = std::time::Instant::now();
        harness.short_sleep();
        assert!(start.elapsed() >= SHORT_SLEEP);
    }
}
