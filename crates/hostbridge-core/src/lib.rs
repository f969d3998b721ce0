//! # hostbridge-core — Trait seams for the blocking bridge
//!
//! This crate defines the boundary types shared by every other
//! hostbridge crate: the execution-mode detector, the error taxonomy,
//! the wire vocabulary for the three resource channels, the pollable
//! abstraction, and the host-capability traits the controller services
//! requests with.
//!
//! ## Design principle
//!
//! > "Program to the interface. The real host operation lives behind a
//! >  trait; the bridge owns only its synchronization."
//!
//! Components depend on traits from this crate, never on each other's
//! concrete types. The raw storage driver, the network client, and the
//! display surface are all swappable implementations.

pub mod config;
pub mod error;
pub mod host;
pub mod mode;
pub mod pollable;
pub mod proto;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use mode::ExecutionMode;
pub use pollable::Pollable;

/// One logical resource's request/response pairing. Each channel has
/// its own control block and payload region; channels are serviced
/// independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Interactive input (short poll timeout, retryable emptiness).
    Stdin,
    /// Outbound HTTP requests (long timeout, terminal on expiry).
    Http,
    /// Persistent hierarchical store (long timeout, terminal on expiry).
    Storage,
}

impl ChannelKind {
    /// All channels, in service order.
    pub const ALL: [ChannelKind; 3] = [Self::Stdin, Self::Http, Self::Storage];

    pub fn name(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Http => "http",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
