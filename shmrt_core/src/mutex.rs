//! Process-shared mutex living inside a segment
//!
//! The lock state is a `pthread_mutex_t` initialized with
//! `PTHREAD_PROCESS_SHARED` and `PTHREAD_MUTEX_ROBUST`. Contenders park in
//! the kernel (futex) instead of spinning, and a holder that dies leaves the
//! state recoverable for the next locker.

use crate::error::{ShmError, ShmResult};
use crate::segment::Segment;
use static_assertions::{assert_not_impl_any, const_assert};
use std::marker::PhantomData;
use std::ptr::NonNull;
use tracing::{error, warn};

/// Bytes of lock state a mutex occupies inside its segment.
pub const MUTEX_STATE_SIZE: usize = core::mem::size_of::<libc::pthread_mutex_t>();

/// Required alignment of the mutex offset.
pub const MUTEX_STATE_ALIGN: usize = core::mem::align_of::<libc::pthread_mutex_t>();

const_assert!(MUTEX_STATE_SIZE <= 64);
const_assert!(MUTEX_STATE_ALIGN <= 64);
// Unlock must run on the locking thread.
assert_not_impl_any!(ShmMutexGuard<'static, 'static>: Send);

/// Handle to lock state at a fixed offset of a [`Segment`].
///
/// Borrows the segment, so the handle can never outlive the mapping.
pub struct ShmMutex<'seg> {
    state: NonNull<libc::pthread_mutex_t>,
    offset: usize,
    _segment: PhantomData<&'seg Segment>,
}

// SAFETY: pthread mutexes are designed for concurrent use; the
// process-shared attribute additionally makes the state valid from any
// thread of any process mapping it.
unsafe impl Send for ShmMutex<'_> {}
unsafe impl Sync for ShmMutex<'_> {}

impl<'seg> ShmMutex<'seg> {
    /// Initialize fresh unlocked state at `offset` and bind to it.
    ///
    /// Must not be called while any party may be using state at that offset.
    pub(crate) fn create(segment: &'seg Segment, offset: usize) -> ShmResult<Self> {
        let mutex = Self::bind(segment, offset)?;
        mutex.init()?;
        Ok(mutex)
    }

    /// Bind to state previously initialized by [`create`](Self::create).
    pub(crate) fn attach(segment: &'seg Segment, offset: usize) -> ShmResult<Self> {
        Self::bind(segment, offset)
    }

    fn bind(segment: &'seg Segment, offset: usize) -> ShmResult<Self> {
        let fits = offset
            .checked_add(MUTEX_STATE_SIZE)
            .is_some_and(|end| end <= segment.size());
        if !fits {
            return Err(ShmError::OffsetOutOfRange {
                offset,
                required: MUTEX_STATE_SIZE,
                segment_size: segment.size(),
            });
        }
        if offset % MUTEX_STATE_ALIGN != 0 {
            return Err(ShmError::MisalignedOffset {
                offset,
                alignment: MUTEX_STATE_ALIGN,
            });
        }

        let state = NonNull::new(segment.state_ptr(offset) as *mut libc::pthread_mutex_t)
            .ok_or(ShmError::OffsetOutOfRange {
                offset,
                required: MUTEX_STATE_SIZE,
                segment_size: segment.size(),
            })?;

        Ok(Self {
            state,
            offset,
            _segment: PhantomData,
        })
    }

    fn init(&self) -> ShmResult<()> {
        let mut attr = core::mem::MaybeUninit::<libc::pthread_mutexattr_t>::uninit();

        // SAFETY: attr is initialized by pthread_mutexattr_init before use and
        // destroyed on every path; state points at MUTEX_STATE_SIZE bytes of
        // suitably aligned mapped memory.
        unsafe {
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(ShmError::lock("pthread_mutexattr_init", rc));
            }

            let result = (|| {
                let rc = libc::pthread_mutexattr_setpshared(
                    attr.as_mut_ptr(),
                    libc::PTHREAD_PROCESS_SHARED,
                );
                if rc != 0 {
                    return Err(ShmError::lock("pthread_mutexattr_setpshared", rc));
                }

                let rc =
                    libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST);
                if rc != 0 {
                    return Err(ShmError::lock("pthread_mutexattr_setrobust", rc));
                }

                let rc = libc::pthread_mutex_init(self.state.as_ptr(), attr.as_ptr());
                if rc != 0 {
                    return Err(ShmError::lock("pthread_mutex_init", rc));
                }
                Ok(())
            })();

            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            result
        }
    }

    /// Byte offset of the lock state inside the segment
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Block the calling thread until the lock is acquired.
    pub fn lock(&self) -> ShmResult<ShmMutexGuard<'_, 'seg>> {
        // SAFETY: state is valid, initialized lock state (create/attach contract).
        let rc = unsafe { libc::pthread_mutex_lock(self.state.as_ptr()) };
        self.acquired(rc, "pthread_mutex_lock")?
            .ok_or_else(|| ShmError::lock("pthread_mutex_lock", libc::EBUSY))
    }

    /// Acquire the lock if it is free; `Ok(None)` if someone else holds it.
    pub fn try_lock(&self) -> ShmResult<Option<ShmMutexGuard<'_, 'seg>>> {
        // SAFETY: as in lock().
        let rc = unsafe { libc::pthread_mutex_trylock(self.state.as_ptr()) };
        self.acquired(rc, "pthread_mutex_trylock")
    }

    fn acquired(
        &self,
        rc: libc::c_int,
        operation: &'static str,
    ) -> ShmResult<Option<ShmMutexGuard<'_, 'seg>>> {
        match rc {
            0 => Ok(Some(ShmMutexGuard {
                mutex: self,
                owner_died: false,
                _not_send: PhantomData,
            })),
            libc::EBUSY => Ok(None),
            libc::EOWNERDEAD => {
                warn!(
                    offset = self.offset,
                    "previous mutex holder died while locked, recovering state"
                );
                // SAFETY: we hold the lock after EOWNERDEAD.
                let rc = unsafe { libc::pthread_mutex_consistent(self.state.as_ptr()) };
                if rc != 0 {
                    return Err(ShmError::lock("pthread_mutex_consistent", rc));
                }
                Ok(Some(ShmMutexGuard {
                    mutex: self,
                    owner_died: true,
                    _not_send: PhantomData,
                }))
            }
            rc => Err(ShmError::lock(operation, rc)),
        }
    }

    fn unlock_raw(&self) -> ShmResult<()> {
        // SAFETY: only called by the guard, i.e. by the current holder.
        let rc = unsafe { libc::pthread_mutex_unlock(self.state.as_ptr()) };
        if rc != 0 {
            return Err(ShmError::lock("pthread_mutex_unlock", rc));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ShmMutex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmMutex")
            .field("offset", &self.offset)
            .finish()
    }
}

/// Held lock; unlocks on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ShmMutexGuard<'m, 'seg> {
    mutex: &'m ShmMutex<'seg>,
    owner_died: bool,
    _not_send: PhantomData<*const ()>,
}

impl ShmMutexGuard<'_, '_> {
    /// Whether the previous holder died while holding the lock.
    ///
    /// Data protected by the lock may be half-updated in that case.
    pub fn owner_died(&self) -> bool {
        self.owner_died
    }

    /// Release the lock, reporting failure instead of logging it.
    pub fn unlock(self) -> ShmResult<()> {
        let mutex = self.mutex;
        std::mem::forget(self);
        mutex.unlock_raw()
    }
}

impl Drop for ShmMutexGuard<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock_raw() {
            error!(offset = self.mutex.offset, "failed to release mutex: {e}");
        }
    }
}
