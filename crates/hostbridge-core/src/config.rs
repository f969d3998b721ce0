//! Bridge configuration.
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods (programmatic)
//! 2. Environment variables (`HB_*`)
//! 3. Library defaults
//!
//! The stdin poll bound is deliberately a tuning parameter, not a
//! constant: it trades input latency against how long the guest's
//! render loop goes without control between keystrokes.

use std::time::Duration;

pub mod defaults {
    /// Stdin poll timeout in milliseconds (short, retryable).
    pub const STDIN_POLL_MS: u64 = 50;
    /// HTTP/storage exchange timeout in milliseconds (terminal).
    pub const IO_TIMEOUT_MS: u64 = 30_000;
    /// Payload region capacity per channel, bytes.
    pub const CHANNEL_CAPACITY: usize = 256 * 1024;
    /// HTTP body stream chunk size, bytes.
    pub const CHUNK_SIZE: usize = 64 * 1024;
    /// Display flush cadence in milliseconds (one repaint frame).
    pub const FLUSH_INTERVAL_MS: u64 = 16;
    /// Controller idle park timeout in milliseconds.
    pub const IDLE_PARK_MS: u64 = 5;
    /// Buffered input queue capacity (events).
    pub const INPUT_QUEUE_CAPACITY: usize = 256;
}

fn env_get<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Bridge configuration with builder pattern.
///
/// Use `from_env()` to start with compile-time defaults and apply any
/// environment variable overrides.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bound on a single stdin poll (retryable emptiness on expiry).
    pub stdin_poll: Duration,
    /// Bound on one HTTP/storage exchange (terminal error on expiry).
    pub io_timeout: Duration,
    /// Payload region capacity per channel.
    pub channel_capacity: usize,
    /// Chunk size for streamed HTTP bodies.
    pub chunk_size: usize,
    /// Display output flush cadence.
    pub flush_interval: Duration,
    /// Controller park timeout when no channel has work.
    pub idle_park: Duration,
    /// Capacity of the buffered interactive-input queue.
    pub input_queue_capacity: usize,
    /// Relay prefix for cross-origin HTTP rewriting, e.g.
    /// `https://relay.example/fetch?url=`.
    pub http_relay: Option<String>,
    /// Hosts whose requests are routed through the relay.
    pub relay_hosts: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BridgeConfig {
    /// Create config from compile-time defaults with environment
    /// overrides.
    ///
    /// Environment variables (all optional):
    /// - `HB_STDIN_POLL_MS` - stdin poll bound in milliseconds
    /// - `HB_IO_TIMEOUT_MS` - HTTP/storage exchange bound in milliseconds
    /// - `HB_CHANNEL_CAPACITY` - payload capacity per channel in bytes
    /// - `HB_CHUNK_SIZE` - HTTP stream chunk size in bytes
    /// - `HB_FLUSH_INTERVAL_MS` - display flush cadence in milliseconds
    /// - `HB_IDLE_PARK_MS` - controller idle park timeout in milliseconds
    /// - `HB_INPUT_QUEUE_CAPACITY` - buffered input queue capacity
    /// - `HB_HTTP_RELAY` - relay URL prefix for restricted hosts
    pub fn from_env() -> Self {
        Self {
            stdin_poll: Duration::from_millis(env_get("HB_STDIN_POLL_MS", defaults::STDIN_POLL_MS)),
            io_timeout: Duration::from_millis(env_get("HB_IO_TIMEOUT_MS", defaults::IO_TIMEOUT_MS)),
            channel_capacity: env_get("HB_CHANNEL_CAPACITY", defaults::CHANNEL_CAPACITY),
            chunk_size: env_get("HB_CHUNK_SIZE", defaults::CHUNK_SIZE),
            flush_interval: Duration::from_millis(env_get(
                "HB_FLUSH_INTERVAL_MS",
                defaults::FLUSH_INTERVAL_MS,
            )),
            idle_park: Duration::from_millis(env_get("HB_IDLE_PARK_MS", defaults::IDLE_PARK_MS)),
            input_queue_capacity: env_get(
                "HB_INPUT_QUEUE_CAPACITY",
                defaults::INPUT_QUEUE_CAPACITY,
            ),
            http_relay: std::env::var("HB_HTTP_RELAY").ok().filter(|s| !s.is_empty()),
            relay_hosts: Vec::new(),
        }
    }

    /// Create config with explicit defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            stdin_poll: Duration::from_millis(defaults::STDIN_POLL_MS),
            io_timeout: Duration::from_millis(defaults::IO_TIMEOUT_MS),
            channel_capacity: defaults::CHANNEL_CAPACITY,
            chunk_size: defaults::CHUNK_SIZE,
            flush_interval: Duration::from_millis(defaults::FLUSH_INTERVAL_MS),
            idle_park: Duration::from_millis(defaults::IDLE_PARK_MS),
            input_queue_capacity: defaults::INPUT_QUEUE_CAPACITY,
            http_relay: None,
            relay_hosts: Vec::new(),
        }
    }

    // Builder methods

    pub fn stdin_poll(mut self, d: Duration) -> Self {
        self.stdin_poll = d;
        self
    }

    pub fn io_timeout(mut self, d: Duration) -> Self {
        self.io_timeout = d;
        self
    }

    pub fn channel_capacity(mut self, bytes: usize) -> Self {
        self.channel_capacity = bytes;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn flush_interval(mut self, d: Duration) -> Self {
        self.flush_interval = d;
        self
    }

    pub fn idle_park(mut self, d: Duration) -> Self {
        self.idle_park = d;
        self
    }

    pub fn input_queue_capacity(mut self, cap: usize) -> Self {
        self.input_queue_capacity = cap;
        self
    }

    pub fn http_relay(mut self, prefix: impl Into<String>) -> Self {
        self.http_relay = Some(prefix.into());
        self
    }

    pub fn relay_host(mut self, host: impl Into<String>) -> Self {
        self.relay_hosts.push(host.into());
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity < 4096 {
            return Err(ConfigError::InvalidValue("channel_capacity must be >= 4096"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("chunk_size must be > 0"));
        }
        if self.chunk_size > self.channel_capacity {
            return Err(ConfigError::InvalidValue(
                "chunk_size must be <= channel_capacity",
            ));
        }
        if self.stdin_poll.is_zero() {
            return Err(ConfigError::InvalidValue("stdin_poll must be > 0"));
        }
        if self.io_timeout < self.stdin_poll {
            return Err(ConfigError::InvalidValue("io_timeout must be >= stdin_poll"));
        }
        if self.input_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "input_queue_capacity must be > 0",
            ));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}
