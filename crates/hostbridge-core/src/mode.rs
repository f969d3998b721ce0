//! Execution-mode detection.
//!
//! Every thread participating in a bridge session resolves its mode
//! once and branches on it afterwards:
//!
//! - `Suspension`: the host can suspend the call stack around an
//!   asynchronous operation; blocking call sites resolve through
//!   promise-backed pollables.
//! - `WorkerBlocking`: the thread hosts the guest and may halt entirely
//!   on the wait primitive while the controller services it. Default
//!   for spawned guest threads.
//! - `MainBlocking`: the thread may block on deadline waits but must
//!   never issue a relay wait (it is the thread that would have to
//!   service it).
//!
//! Resolution order: explicit process-wide override, then the thread's
//! registered role, then the capability probe. A component re-hosted
//! into a worker calls [`set_mode_override`] before touching any
//! bridge.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Host supports stack suspension around asynchronous operations.
    Suspension,
    /// Worker thread that blocks on the wait primitive.
    WorkerBlocking,
    /// Main/controller thread: deadline waits only, no relay waits.
    MainBlocking,
}

/// What the current host can do. On native hosts threads can always
/// block on a wait primitive; the struct exists so the session setup
/// path has a single place to refuse an unusable host before any
/// bridge is constructed.
#[derive(Debug, Clone, Copy)]
pub struct HostCapabilities {
    /// A blocking wait/notify primitive is available to worker threads.
    pub atomics_wait: bool,
    /// The host can suspend a call stack around an async operation.
    pub can_suspend: bool,
}

impl HostCapabilities {
    /// Probe the current host.
    pub fn detect() -> Self {
        // Native OS threads always support parking. Suspension is an
        // embedder-provided capability, absent unless overridden.
        Self {
            atomics_wait: true,
            can_suspend: false,
        }
    }

    /// Fail fast when neither execution strategy is possible.
    pub fn require_usable(&self) -> BridgeResult<()> {
        if !self.atomics_wait && !self.can_suspend {
            log::error!("host supports neither blocking waits nor suspension");
            return Err(BridgeError::UnsupportedEnvironment(
                "host supports neither a blocking wait primitive nor stack suspension",
            ));
        }
        Ok(())
    }
}

// 0 = no override, else ExecutionMode discriminant + 1.
static MODE_OVERRIDE: AtomicU8 = AtomicU8::new(0);

thread_local! {
    static THREAD_ROLE: Cell<Option<ExecutionMode>> = const { Cell::new(None) };
}

fn encode(mode: ExecutionMode) -> u8 {
    match mode {
        ExecutionMode::Suspension => 1,
        ExecutionMode::WorkerBlocking => 2,
        ExecutionMode::MainBlocking => 3,
    }
}

fn decode(v: u8) -> Option<ExecutionMode> {
    match v {
        1 => Some(ExecutionMode::Suspension),
        2 => Some(ExecutionMode::WorkerBlocking),
        3 => Some(ExecutionMode::MainBlocking),
        _ => None,
    }
}

/// Force a mode for the whole process. Used when a component is
/// re-hosted (e.g. moved into a worker after capability detection ran
/// on the main thread). Passing `None` clears the override.
pub fn set_mode_override(mode: Option<ExecutionMode>) {
    MODE_OVERRIDE.store(mode.map(encode).unwrap_or(0), Ordering::Release);
}

/// Register the current thread as a guest worker.
pub fn enter_worker_role() {
    THREAD_ROLE.with(|r| r.set(Some(ExecutionMode::WorkerBlocking)));
}

/// Register the current thread as the controller.
pub fn enter_controller_role() {
    THREAD_ROLE.with(|r| r.set(Some(ExecutionMode::MainBlocking)));
}

impl ExecutionMode {
    /// Resolve the mode for the current thread.
    pub fn current() -> ExecutionMode {
        if let Some(mode) = decode(MODE_OVERRIDE.load(Ordering::Acquire)) {
            return mode;
        }
        if let Some(mode) = THREAD_ROLE.with(|r| r.get()) {
            return mode;
        }
        let caps = HostCapabilities::detect();
        if caps.can_suspend {
            ExecutionMode::Suspension
        } else {
            ExecutionMode::WorkerBlocking
        }
    }

    /// Whether a relay wait (halting this thread until the controller
    /// responds) is legal in this mode.
    pub fn may_relay_block(self) -> bool {
        !matches!(self, ExecutionMode::MainBlocking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_usable_on_native_hosts() {
        let caps = HostCapabilities::detect();
        assert!(caps.atomics_wait);
        assert!(caps.require_usable().is_ok());
    }

    #[test]
    fn unusable_host_is_fatal() {
        let caps = HostCapabilities {
            atomics_wait: false,
            can_suspend: false,
        };
        assert!(matches!(
            caps.require_usable(),
            Err(BridgeError::UnsupportedEnvironment(_))
        ));
    }

    // Role and override share process globals, so they are exercised
    // in one test to keep the harness's parallel runs deterministic.
    #[test]
    fn resolution_order() {
        std::thread::spawn(|| {
            enter_controller_role();
            assert_eq!(ExecutionMode::current(), ExecutionMode::MainBlocking);
            assert!(!ExecutionMode::current().may_relay_block());

            set_mode_override(Some(ExecutionMode::Suspension));
            assert_eq!(ExecutionMode::current(), ExecutionMode::Suspension);

            set_mode_override(None);
            assert_eq!(ExecutionMode::current(), ExecutionMode::MainBlocking);
        })
        .join()
        .unwrap();
    }
}
