//! The shared region both sides of the bridge hold.
//!
//! One [`SessionShared`] per session: a request channel per resource,
//! the HTTP body mailbox, the controller's wake site, the readiness
//! and shutdown flags, and the coalescing display buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hostbridge_core::config::BridgeConfig;
use hostbridge_core::ChannelKind;

use crate::control::RequestChannel;
use crate::mailbox::ChunkMailbox;
use crate::parking::{Parking, PlatformParking};

pub struct SessionShared {
    stdin: RequestChannel,
    http: RequestChannel,
    storage: RequestChannel,
    /// Streams HTTP response bodies outside the request/response slot.
    http_body: ChunkMailbox,
    /// Wakes the controller's service loop; every channel publishes
    /// through this one site so the loop has a single idle wait.
    notifier: Arc<PlatformParking>,
    /// Set once by the controller after its service thread is live.
    ready: AtomicBool,
    shutdown: AtomicBool,
    /// Display output batches awaiting the next flush.
    display: Mutex<Vec<String>>,
}

impl SessionShared {
    pub fn new(config: &BridgeConfig) -> Arc<Self> {
        let notifier = Arc::new(PlatformParking::new());
        Arc::new(Self {
            stdin: RequestChannel::new(
                ChannelKind::Stdin,
                config.channel_capacity,
                Arc::clone(&notifier),
            ),
            http: RequestChannel::new(
                ChannelKind::Http,
                config.channel_capacity,
                Arc::clone(&notifier),
            ),
            storage: RequestChannel::new(
                ChannelKind::Storage,
                config.channel_capacity,
                Arc::clone(&notifier),
            ),
            http_body: ChunkMailbox::new(ChannelKind::Http),
            notifier,
            ready: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            display: Mutex::new(Vec::new()),
        })
    }

    pub fn channel(&self, kind: ChannelKind) -> &RequestChannel {
        match kind {
            ChannelKind::Stdin => &self.stdin,
            ChannelKind::Http => &self.http,
            ChannelKind::Storage => &self.storage,
        }
    }

    pub fn http_body(&self) -> &ChunkMailbox {
        &self.http_body
    }

    pub fn notifier(&self) -> &Arc<PlatformParking> {
        &self.notifier
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Begin teardown: closed channels release parked senders, the
    /// body stream aborts, and the service loop is woken to observe
    /// the flag.
    pub fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for kind in ChannelKind::ALL {
            self.channel(kind).close();
        }
        self.http_body.close("session shut down");
        self.notifier.wake_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue a display batch for the next flush.
    pub fn push_display(&self, batch: impl Into<String>) {
        match self.display.lock() {
            Ok(mut g) => g.push(batch.into()),
            Err(poisoned) => poisoned.into_inner().push(batch.into()),
        }
        self.notifier.wake_one();
    }

    /// Drain everything queued since the last flush.
    pub fn take_display(&self) -> Vec<String> {
        match self.display.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}
