//! Linux futex-based parking
//!
//! Uses the futex syscall for efficient sleep/wake with minimal overhead.
//!
//! Futex word semantics:
//! - 0 = no wake pending
//! - 1 = wake pending (waiters should re-check their condition)
//!
//! When a thread parks:
//! 1. Increment parked count
//! 2. FUTEX_WAIT on futex word (blocks if word == 0)
//! 3. Decrement parked count on return
//!
//! When waking:
//! 1. Set futex word to 1 unconditionally, so a wake that races with a
//!    thread about to park is remembered, never lost
//! 2. FUTEX_WAKE if any waiters are parked

use super::Parking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    /// Futex word: 0 = sleep, 1 = wake pending
    futex: AtomicU32,

    /// Count of parked threads
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        // Consume a pending wake without sleeping
        if self.futex.swap(0, Ordering::AcqRel) != 0 {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as i64,
            tv_nsec: d.subsec_nanos() as i64,
        });

        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // FUTEX_WAIT: sleep if futex == 0
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,                    // Expected value (sleep if futex == 0)
                timespec_ptr,            // Timeout
                std::ptr::null::<u32>(), // uaddr2 (unused)
                0u32,                    // val3 (unused)
            )
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        // Consume the wake flag whether we were woken or raced with it
        let pending = self.futex.swap(0, Ordering::AcqRel) != 0;

        if result == 0 {
            true // Woken by FUTEX_WAKE
        } else {
            let errno = unsafe { *libc::__errno_location() };
            // ETIMEDOUT = timeout, EINTR = signal; EAGAIN = word already
            // changed, which means a wake landed before we slept
            if errno == libc::EAGAIN {
                pending
            } else {
                errno != libc::ETIMEDOUT && errno != libc::EINTR
            }
        }
    }

    fn wake_one(&self) {
        // Set the flag first so a racing parker sees it even if nobody
        // is parked yet
        self.futex.store(1, Ordering::Release);

        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }

        // FUTEX_WAKE: wake 1 waiter
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn wake_all(&self) {
        self.futex.store(1, Ordering::Release);

        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }

        // FUTEX_WAKE: wake all waiters
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}
