//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.
//! Less efficient but portable.

use super::Parking;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Condvar-based parking (fallback)
pub struct FallbackParking {
    /// Mutex for condvar; bool = wake pending
    mutex: Mutex<bool>,

    /// Condition variable
    condvar: Condvar,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut guard = match self.mutex.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Consume a pending wake without sleeping
        if *guard {
            *guard = false;
            return true;
        }

        let result = match timeout {
            Some(t) => {
                let (g, timeout_result) = match self.condvar.wait_timeout(guard, t) {
                    Ok(r) => r,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard = g;
                !timeout_result.timed_out()
            }
            None => {
                guard = match self.condvar.wait(guard) {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                true
            }
        };

        // A wake that landed during the wait leaves the flag set;
        // consume it so later parks sleep again
        let pending = *guard;
        *guard = false;

        result || pending
    }

    fn wake_one(&self) {
        {
            let mut guard = match self.mutex.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = true;
        }
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        {
            let mut guard = match self.mutex.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = true;
        }
        self.condvar.notify_all();
    }
}
