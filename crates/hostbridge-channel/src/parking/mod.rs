//! Channel parking mechanism
//!
//! Provides efficient sleep/wake for protocol waiters: the worker
//! parked on a response, the controller parked when no channel has
//! work, and both ends of the streaming mailbox.
//!
//! Platform-specific implementations use the most efficient primitive
//! available.

use std::time::Duration;

/// Platform-specific parking primitive for one wait site.
///
/// Waiters call `park()` inside a loop that re-checks the condition
/// they are waiting for. A wake that arrives while nobody is parked is
/// remembered by the pending word and consumed by the next `park()`
/// call, so the raise-flag-then-wake sequence on the other side never
/// loses a waiter.
pub trait Parking: Send + Sync {
    /// Park the current thread until signaled or timeout.
    ///
    /// Returns:
    /// - `true` if woken by a signal (or a signal was already pending)
    /// - `false` if timeout or spurious wakeup
    ///
    /// Callers must re-check their condition after returning regardless
    /// of the return value.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked thread, or leave the signal pending if none is
    /// parked.
    fn wake_one(&self);

    /// Wake all parked threads. Used for shutdown.
    fn wake_all(&self);
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn park_times_out() {
        let parking = PlatformParking::new();
        let start = std::time::Instant::now();
        let woken = parking.park(Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(!woken);
        assert!(elapsed >= Duration::from_millis(40)); // Allow some slack
    }

    #[test]
    fn wake_one_unparks() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || parking2.park(Some(Duration::from_secs(10))));

        // Give the thread time to park
        thread::sleep(Duration::from_millis(50));
        parking.wake_one();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn wake_before_park_is_not_lost() {
        let parking = PlatformParking::new();
        parking.wake_one();
        // The pending signal is consumed without sleeping.
        let start = std::time::Instant::now();
        assert!(parking.park(Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
