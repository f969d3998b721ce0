//! Pollable/blocking abstraction.
//!
//! A pollable represents "may become ready later". Readiness is
//! monotonic: once `ready()` has returned true it never reverts.
//! `block()` suspends the caller until ready, using whichever
//! mechanism fits the variant.
//!
//! Identity is structural, not nominal: call sites accept
//! `&dyn Pollable` and check the contract, never a concrete type, so
//! independently constructed instances of the same capability are
//! always interchangeable.
//!
//! # Implementors
//!
//! - [`ImmediatePollable`]: ready from birth.
//! - [`DeadlinePollable`]: ready once a captured deadline elapses;
//!   blocks with a native timed sleep.
//! - [`TaskPollable`]: ready once a spawned operation settles,
//!   including on failure (failure is still "ready", distinguished by
//!   the result).
//! - `RelayPollable` (in `hostbridge-guest`): ready once a paired
//!   protocol round trip completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub trait Pollable {
    /// Pure readiness query. Monotonic: false may become true, true
    /// never becomes false.
    fn ready(&self) -> bool;

    /// Suspend the caller until `ready()` would return true.
    fn block(&self);
}

/// Ready from the moment it is created.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediatePollable;

impl Pollable for ImmediatePollable {
    fn ready(&self) -> bool {
        true
    }

    fn block(&self) {}
}

/// Ready once a captured deadline elapses. No external wake signal is
/// involved; `block()` sleeps out the remainder.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePollable {
    deadline: Instant,
}

impl DeadlinePollable {
    pub fn after(d: Duration) -> Self {
        Self {
            deadline: Instant::now() + d,
        }
    }

    pub fn at(deadline: Instant) -> Self {
        Self { deadline }
    }
}

impl Pollable for DeadlinePollable {
    fn ready(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn block(&self) {
        // sleep can wake early; loop until the deadline has passed.
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return;
            }
            std::thread::sleep(self.deadline - now);
        }
    }
}

struct TaskState<T> {
    done: AtomicBool,
    slot: Mutex<Option<T>>,
    condvar: Condvar,
}

/// Marks the task settled when dropped, so unwinding out of the task
/// body still releases every waiter.
struct Settle<T>(Arc<TaskState<T>>);

impl<T> Drop for Settle<T> {
    fn drop(&mut self) {
        // Hold the slot lock while settling: a waiter between its done
        // check and the condvar wait holds this lock, so it cannot miss
        // the notification.
        let _slot = match self.0.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.0.done.store(true, Ordering::Release);
        self.0.condvar.notify_all();
    }
}

/// Ready once a spawned operation settles. Used on suspension-capable
/// hosts where the blocking call site can hand the real work to
/// another execution context and await its settlement.
pub struct TaskPollable<T> {
    state: Arc<TaskState<T>>,
}

impl<T: Send + 'static> TaskPollable<T> {
    /// Spawn `f` and return a pollable that becomes ready when it
    /// settles. A panicking or failing `f` still settles the pollable;
    /// the outcome is read from the result, not from readiness.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let state = Arc::new(TaskState {
            done: AtomicBool::new(false),
            slot: Mutex::new(None),
            condvar: Condvar::new(),
        });
        let settle = Settle(Arc::clone(&state));
        std::thread::spawn(move || {
            let value = f();
            if let Ok(mut slot) = settle.0.slot.lock() {
                *slot = Some(value);
            }
            // Settlement happens in the guard's drop, panic or not.
            drop(settle);
        });
        Self { state }
    }

    /// Take the settled value. `None` until ready, after the value has
    /// already been taken, and when the task panicked.
    pub fn take(&self) -> Option<T> {
        if !self.ready() {
            return None;
        }
        match self.state.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl<T> Pollable for TaskPollable<T> {
    fn ready(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    fn block(&self) {
        let mut slot = match self.state.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !self.state.done.load(Ordering::Acquire) {
            slot = match self.state.condvar.wait(slot) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_is_always_ready() {
        let p = ImmediatePollable;
        assert!(p.ready());
        p.block();
        assert!(p.ready());
    }

    #[test]
    fn deadline_becomes_ready_and_stays_ready() {
        let p = DeadlinePollable::after(Duration::from_millis(20));
        assert!(!p.ready());
        p.block();
        assert!(p.ready());
        // Monotonic: repeated queries stay true.
        for _ in 0..10 {
            assert!(p.ready());
        }
    }

    #[test]
    fn task_settles_with_value() {
        let p = TaskPollable::spawn(|| {
            std::thread::sleep(Duration::from_millis(10));
            42u32
        });
        p.block();
        assert!(p.ready());
        assert_eq!(p.take(), Some(42));
        assert_eq!(p.take(), None);
    }

    #[test]
    fn task_settles_on_failure_too() {
        let p: TaskPollable<Result<(), String>> =
            TaskPollable::spawn(|| Err("backend exploded".to_string()));
        p.block();
        assert!(p.ready());
        assert!(p.take().unwrap().is_err());
    }

    #[test]
    fn task_settles_even_when_the_body_panics() {
        let p: TaskPollable<u32> = TaskPollable::spawn(|| panic!("boom"));
        p.block();
        assert!(p.ready());
        assert_eq!(p.take(), None);
    }

    #[test]
    fn every_waiter_is_released_on_settlement() {
        // Tasks that settle immediately race the waiters into block();
        // none of the waiters may be left sleeping.
        for _ in 0..50 {
            let p = Arc::new(TaskPollable::spawn(|| 1u8));
            let waiters: Vec<_> = (0..2)
                .map(|_| {
                    let p = Arc::clone(&p);
                    std::thread::spawn(move || p.block())
                })
                .collect();
            p.block();
            for w in waiters {
                w.join().unwrap();
            }
            assert!(p.ready());
        }
    }

    #[test]
    fn pollables_share_one_interface() {
        let pollables: Vec<Box<dyn Pollable>> = vec![
            Box::new(ImmediatePollable),
            Box::new(DeadlinePollable::after(Duration::from_millis(5))),
        ];
        for p in &pollables {
            p.block();
            assert!(p.ready());
        }
    }
}
