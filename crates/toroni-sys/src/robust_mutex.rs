//! A process-shared, owner-death-recoverable mutex.
//!
//! Wraps `pthread_mutex_t` configured with `PTHREAD_PROCESS_SHARED` and
//! `PTHREAD_MUTEX_ROBUST`. It is placement-constructed directly inside a
//! [`crate::shm::SharedRegion`] so every attached process shares the same
//! mutex state. If the process holding the lock dies, the next lock/trylock
//! observes `EOWNERDEAD`, marks the mutex consistent, and proceeds as though
//! it had acquired an uncontended lock — the data it protects may be
//! partially updated, which is exactly the case the ring's single-writer
//! design is built to tolerate (readers never observe bytes past the
//! writer's last published position).
//!
//! Any other failure from the underlying pthread calls is unrecoverable and
//! panics; there is no sensible way to continue running a shared-memory
//! transport whose locking primitive is broken.

use std::io;
use std::mem::MaybeUninit;

/// Must be placement-initialized with [`RobustProcMutex::init_in_place`]
/// before use; never construct one on the stack and move it, since
/// `pthread_mutex_t` is not relocatable once initialized.
#[repr(C)]
pub struct RobustProcMutex {
    inner: libc::pthread_mutex_t,
}

impl RobustProcMutex {
    /// Initializes a `RobustProcMutex` at `ptr`, which must point at `size_of::<Self>()`
    /// writable, zeroed bytes inside shared memory. Only the creator of the
    /// surrounding region should call this.
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `size_of::<Self>()` bytes and must
    /// outlive every process that later dereferences it.
    pub unsafe fn init_in_place(ptr: *mut Self) {
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::zeroed();
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            assert_eq!(rc, 0, "pthread_mutexattr_init failed");
            let mut attr = attr.assume_init();

            let rc = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            assert_eq!(rc, 0, "pthread_mutexattr_setpshared failed");
            let rc = libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST);
            assert_eq!(rc, 0, "pthread_mutexattr_setrobust failed");

            let mutex_ptr = &raw mut (*ptr).inner;
            let rc = libc::pthread_mutex_init(mutex_ptr, &attr);
            assert_eq!(rc, 0, "pthread_mutex_init failed");

            libc::pthread_mutexattr_destroy(&mut attr);
        }
    }

    #[inline]
    fn raw(&self) -> *mut libc::pthread_mutex_t {
        &self.inner as *const _ as *mut _
    }

    fn make_consistent(&self) {
        let rc = unsafe { libc::pthread_mutex_consistent(self.raw()) };
        if rc != 0 {
            panic!(
                "pthread_mutex_consistent failed: {}",
                io::Error::from_raw_os_error(rc)
            );
        }
        tracing::warn!("recovered robust mutex from a dead owner");
    }

    /// Blocks until the lock is acquired. Recovers silently from an owner
    /// death observed mid-wait.
    pub fn lock(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw()) };
        match rc {
            0 => {}
            libc::EOWNERDEAD => self.make_consistent(),
            other => panic!(
                "pthread_mutex_lock failed: {}",
                io::Error::from_raw_os_error(other)
            ),
        }
    }

    /// Attempts to acquire the lock without blocking. Returns `false` if
    /// another live owner currently holds it; recovers and returns `true` if
    /// the previous owner died while holding it.
    pub fn try_lock(&self) -> bool {
        let rc = unsafe { libc::pthread_mutex_trylock(self.raw()) };
        match rc {
            0 => true,
            libc::EBUSY => false,
            libc::EOWNERDEAD => {
                self.make_consistent();
                true
            }
            other => panic!(
                "pthread_mutex_trylock failed: {}",
                io::Error::from_raw_os_error(other)
            ),
        }
    }

    pub fn unlock(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw()) };
        if rc != 0 {
            panic!(
                "pthread_mutex_unlock failed: {}",
                io::Error::from_raw_os_error(rc)
            );
        }
    }

    /// Acquires the lock and returns an RAII guard that unlocks on drop,
    /// including on an unwinding panic.
    pub fn lock_guard(&self) -> RobustMutexGuard<'_> {
        self.lock();
        RobustMutexGuard { mutex: self }
    }
}

pub struct RobustMutexGuard<'a> {
    mutex: &'a RobustProcMutex,
}

impl Drop for RobustMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
