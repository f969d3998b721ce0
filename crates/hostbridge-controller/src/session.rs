//! Session lifecycle.
//!
//! A [`Session`] owns the controller's service thread and the buffered
//! input queue. Interactive input is pushed here (from a terminal
//! reader, a test, the smoke binary) and drained by the service loop
//! one stdin poll at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use hostbridge_channel::parking::Parking;
use hostbridge_channel::SessionShared;
use hostbridge_core::config::ConfigError;
use hostbridge_core::host::{DisplaySink, HttpBackend, StoreBackend};
use hostbridge_core::mode::HostCapabilities;
use hostbridge_core::{BridgeConfig, BridgeError};

use crate::display::Flusher;
use crate::service::{self, ServiceContext};

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("failed to spawn service thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("service thread did not become ready within {0:?}")]
    ReadyTimeout(Duration),
}

/// Bounded queue of raw input chunks feeding the stdin channel.
pub struct InputQueue {
    queue: ArrayQueue<Vec<u8>>,
    eof: AtomicBool,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            eof: AtomicBool::new(false),
        }
    }

    /// Returns the chunk back when the queue is full.
    pub fn push(&self, chunk: Vec<u8>) -> Result<(), Vec<u8>> {
        self.queue.push(chunk)
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.queue.pop()
    }

    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }
}

/// One bridge session: shared region, service thread, input queue.
///
/// Dropping the session shuts it down.
pub struct Session {
    shared: Arc<SessionShared>,
    input: Arc<InputQueue>,
    service: Option<JoinHandle<()>>,
}

impl Session {
    /// Validate the configuration, probe the host, spawn the service
    /// thread, and wait for it to come up. Guest-side calls made
    /// against the shared region before this returns fail with
    /// `BridgeNotInitialized`.
    pub fn init(
        config: BridgeConfig,
        store: Box<dyn StoreBackend>,
        http: Arc<dyn HttpBackend + Sync>,
        sink: Box<dyn DisplaySink>,
    ) -> Result<Self, InitError> {
        config.validate()?;
        HostCapabilities::detect().require_usable()?;

        let shared = SessionShared::new(&config);
        let input = Arc::new(InputQueue::new(config.input_queue_capacity));
        let flusher = Flusher::new(sink, config.flush_interval);

        let ctx = ServiceContext {
            shared: Arc::clone(&shared),
            config,
            store,
            http,
            input: Arc::clone(&input),
            flusher,
        };
        let service = std::thread::Builder::new()
            .name("hostbridge-service".to_string())
            .spawn(move || service::run(ctx))?;

        let ready_bound = Duration::from_secs(5);
        let deadline = Instant::now() + ready_bound;
        while !shared.is_ready() {
            if Instant::now() >= deadline {
                shared.begin_shutdown();
                let _ = service.join();
                return Err(InitError::ReadyTimeout(ready_bound));
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        log::info!("bridge session ready");
        Ok(Self {
            shared,
            input: Arc::clone(&input),
            service: Some(service),
        })
    }

    /// Shorthand: defaults, in-memory store, real HTTP, stderr display.
    pub fn init_default() -> Result<Self, InitError> {
        let config = BridgeConfig::from_env();
        let http = Arc::new(crate::backends::http::UreqHttp::new(&config));
        Session::init(
            config,
            Box::new(crate::backends::store::MemStore::new()),
            http,
            Box::new(hostbridge_core::host::StderrSink),
        )
    }

    /// The shared region a guest attaches to.
    pub fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.shared)
    }

    /// True once the service thread has entered its loop.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Feed interactive input. Returns false when the bounded queue is
    /// full and the chunk was not accepted.
    pub fn push_input(&self, chunk: impl Into<Vec<u8>>) -> bool {
        let accepted = self.input.push(chunk.into()).is_ok();
        if accepted {
            self.shared.notifier().wake_one();
        } else {
            log::warn!("input queue full, chunk dropped by caller");
        }
        accepted
    }

    /// Signal end of interactive input. Subsequent stdin polls report
    /// the end-of-input latch once the queue drains.
    pub fn close_input(&self) {
        self.input.set_eof();
        self.shared.notifier().wake_one();
    }

    /// Tear the session down and join the service thread.
    pub fn shutdown(&mut self) {
        self.shared.begin_shutdown();
        if let Some(handle) = self.service.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
