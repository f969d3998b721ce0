//! Relay pollable: a protocol round trip as a pollable.
//!
//! Used on suspension-capable hosts, where the blocking call site
//! hands the relay wait to a helper context and suspends around its
//! settlement instead of halting on the wait primitive itself.
//! Readiness is monotonic and the pollable settles even when the
//! round trip fails; the outcome is read from the result.

use std::sync::Arc;
use std::time::Duration;

use hostbridge_channel::control::RawResponse;
use hostbridge_channel::SessionShared;
use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::pollable::{Pollable, TaskPollable};
use hostbridge_core::{mode, ChannelKind};

pub struct RelayPollable {
    kind: ChannelKind,
    inner: TaskPollable<BridgeResult<RawResponse>>,
}

impl RelayPollable {
    /// Start the round trip. The helper context registers as a worker
    /// so its wait is legal regardless of where `spawn` was called.
    pub fn spawn(
        shared: Arc<SessionShared>,
        kind: ChannelKind,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Self {
        let inner = TaskPollable::spawn(move || {
            mode::enter_worker_role();
            shared.channel(kind).exchange(&payload, timeout)
        });
        Self { kind, inner }
    }

    /// Block until settled and take the outcome.
    pub fn wait(self) -> BridgeResult<RawResponse> {
        self.inner.block();
        match self.inner.take() {
            Some(result) => result,
            None => Err(BridgeError::ProtocolViolation {
                channel: self.kind,
                detail: "relay outcome already taken".into(),
            }),
        }
    }
}

impl Pollable for RelayPollable {
    fn ready(&self) -> bool {
        self.inner.ready()
    }

    fn block(&self) {
        self.inner.block()
    }
}
