//! Bridge error taxonomy.
//!
//! `UnsupportedEnvironment` is fatal and surfaces before any bridge is
//! constructed. `ProtocolTimeout` on the stdin channel is recovered
//! locally as an empty, retryable read; on HTTP/storage it is terminal
//! for that call. Everything else carries enough detail for the guest
//! to render a conventional failure message.

use std::time::Duration;

use crate::ChannelKind;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No response arrived within the channel's bound.
    #[error("{channel} channel timed out after {timeout:?}")]
    ProtocolTimeout {
        channel: ChannelKind,
        timeout: Duration,
    },

    /// A request or response frame exceeds the channel's payload capacity.
    /// Detected before anything is written; never silent truncation.
    #[error("payload of {len} bytes exceeds {channel} channel capacity of {capacity}")]
    PayloadTooLarge {
        channel: ChannelKind,
        len: usize,
        capacity: usize,
    },

    /// The underlying store reported failure for an operation.
    #[error("storage operation failed: {0}")]
    StorageOperationFailed(String),

    /// The blocking wait primitive is unavailable on this host.
    /// Fatal; detected during session setup, never mid-operation.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(&'static str),

    /// A bridge call arrived before the session handshake completed
    /// (or after shutdown).
    #[error("bridge not initialized: session handshake has not completed")]
    BridgeNotInitialized,

    /// The peer violated the control-word discipline or sent a frame
    /// that does not decode.
    #[error("protocol violation on {channel} channel: {detail}")]
    ProtocolViolation {
        channel: ChannelKind,
        detail: String,
    },
}

impl BridgeError {
    /// True for the stdin-style timeout the caller should treat as
    /// "no data yet, retry".
    pub fn is_retryable_timeout(&self) -> bool {
        matches!(
            self,
            Self::ProtocolTimeout {
                channel: ChannelKind::Stdin,
                ..
            }
        )
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_timeout_is_retryable() {
        let err = BridgeError::ProtocolTimeout {
            channel: ChannelKind::Stdin,
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_retryable_timeout());

        let err = BridgeError::ProtocolTimeout {
            channel: ChannelKind::Storage,
            timeout: Duration::from_secs(30),
        };
        assert!(!err.is_retryable_timeout());
    }

    #[test]
    fn messages_name_the_channel() {
        let err = BridgeError::PayloadTooLarge {
            channel: ChannelKind::Http,
            len: 1024,
            capacity: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("http"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));
    }
}
