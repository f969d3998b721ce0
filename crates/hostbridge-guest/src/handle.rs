//! The guest's attachment to a session.

use std::sync::Arc;
use std::time::Duration;

use hostbridge_channel::control::RawResponse;
use hostbridge_channel::SessionShared;
use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::{BridgeConfig, ChannelKind, ExecutionMode};

use crate::relay::RelayPollable;
use crate::stdin::StdinBuffer;
use crate::tree::TreeCache;

/// Guest-side handle to a bridge session.
///
/// Cheap to share behind an `Arc`; all state is internally
/// synchronized. The blocking facades live in the `stdin`, `http`, and
/// `storage` modules as further `impl` blocks on this type.
pub struct BridgeHandle {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) config: BridgeConfig,
    pub(crate) stdin: StdinBuffer,
    pub(crate) tree: TreeCache,
}

impl BridgeHandle {
    /// Attach to a session with configuration read from the
    /// environment. Fails until the controller has marked the region
    /// ready.
    pub fn attach(shared: Arc<SessionShared>) -> BridgeResult<Self> {
        Self::attach_with(shared, BridgeConfig::from_env())
    }

    pub fn attach_with(shared: Arc<SessionShared>, config: BridgeConfig) -> BridgeResult<Self> {
        if !shared.is_ready() {
            return Err(BridgeError::BridgeNotInitialized);
        }
        Ok(Self {
            shared,
            config,
            stdin: StdinBuffer::new(),
            tree: TreeCache::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Queue display output for the controller's next flush. Returns
    /// without waiting; output is coalesced, not written per call.
    pub fn print(&self, text: impl Into<String>) {
        self.shared.push_display(text);
    }

    /// One protocol round trip on `kind`, routed per the current
    /// execution mode.
    pub(crate) fn exchange(
        &self,
        kind: ChannelKind,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> BridgeResult<RawResponse> {
        if !self.shared.is_ready() {
            return Err(BridgeError::BridgeNotInitialized);
        }
        match ExecutionMode::current() {
            ExecutionMode::WorkerBlocking => {
                self.shared.channel(kind).exchange(&payload, timeout)
            }
            ExecutionMode::Suspension => {
                // The call stack can be suspended: run the relay wait
                // on a helper context and settle through a pollable.
                let pollable =
                    RelayPollable::spawn(Arc::clone(&self.shared), kind, payload, timeout);
                pollable.wait()
            }
            ExecutionMode::MainBlocking => {
                log::warn!("{kind} relay wait refused on the servicing thread");
                Err(BridgeError::UnsupportedEnvironment(
                    "relay wait on the servicing thread would deadlock the bridge",
                ))
            }
        }
    }
}
