//! Wire framing for channel payloads.
//!
//! A frame is a little-endian `u32` header length, the JSON-encoded
//! header, then the raw binary segment. The header carries the
//! structured part of a request or response; the binary segment
//! carries bytes as-is, never routed through text encoding.
//!
//! Capacity is checked before anything is written, so an oversized
//! payload fails cleanly with the channel untouched.

use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::ChannelKind;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bytes taken by the header length prefix.
pub const PREFIX_LEN: usize = 4;

/// A parsed frame borrowing from the channel's payload buffer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    header: &'a [u8],
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Split `buf` into header and binary segments.
    pub fn parse(channel: ChannelKind, buf: &'a [u8]) -> BridgeResult<Self> {
        if buf.len() < PREFIX_LEN {
            return Err(BridgeError::ProtocolViolation {
                channel,
                detail: format!("frame shorter than length prefix ({} bytes)", buf.len()),
            });
        }
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&buf[..PREFIX_LEN]);
        let header_len = u32::from_le_bytes(prefix) as usize;
        let rest = &buf[PREFIX_LEN..];
        if header_len > rest.len() {
            return Err(BridgeError::ProtocolViolation {
                channel,
                detail: format!(
                    "header length {} exceeds remaining {} bytes",
                    header_len,
                    rest.len()
                ),
            });
        }
        Ok(Self {
            header: &rest[..header_len],
            body: &rest[header_len..],
        })
    }

    /// Deserialize the JSON header.
    pub fn header<H: DeserializeOwned>(&self, channel: ChannelKind) -> BridgeResult<H> {
        serde_json::from_slice(self.header).map_err(|e| BridgeError::ProtocolViolation {
            channel,
            detail: format!("malformed header: {e}"),
        })
    }

    /// The raw binary segment.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }
}

/// Encode a header plus binary segment into one frame, refusing if the
/// result would not fit in `capacity`.
pub fn encode<H: Serialize>(
    channel: ChannelKind,
    capacity: usize,
    header: &H,
    body: &[u8],
) -> BridgeResult<Vec<u8>> {
    let header_bytes =
        serde_json::to_vec(header).map_err(|e| BridgeError::ProtocolViolation {
            channel,
            detail: format!("unencodable header: {e}"),
        })?;
    let total = PREFIX_LEN + header_bytes.len() + body.len();
    if total > capacity {
        return Err(BridgeError::PayloadTooLarge {
            channel,
            len: total,
            capacity,
        });
    }
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(body);
    Ok(buf)
}
