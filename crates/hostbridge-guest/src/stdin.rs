//! Blocking interactive input.
//!
//! A read drains the local buffer first; only an empty buffer costs a
//! protocol round trip, and a dry read right after a delivered batch
//! answers empty locally too. The poll is bounded: when nothing
//! arrives within the stdin poll window the read comes back empty and
//! the caller's loop keeps control. End-of-input is a one-way latch;
//! once reported, every later read answers locally.

use std::sync::Mutex;

use hostbridge_channel::frame::{self, Frame};
use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::proto::{status, StdinRequest, StdinResponse};
use hostbridge_core::ChannelKind;

use crate::handle::BridgeHandle;

/// Outcome of one stdin read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdinRead {
    pub data: Vec<u8>,
    /// The end-of-input latch. Empty data with `eof` false means the
    /// poll window elapsed; retrying is expected.
    pub eof: bool,
}

impl StdinRead {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            eof: false,
        }
    }

    fn ended() -> Self {
        Self {
            data: Vec::new(),
            eof: true,
        }
    }
}

#[derive(Default)]
struct BufferState {
    pending: Vec<u8>,
    eof: bool,
    /// Set after a read that returned data. The next dry read answers
    /// empty locally, giving the caller's loop a turn before the next
    /// protocol round trip.
    just_delivered: bool,
}

/// Guest-local input buffer and end-of-input latch.
pub(crate) struct StdinBuffer {
    state: Mutex<BufferState>,
}

impl StdinBuffer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BridgeHandle {
    /// Read up to `max_len` bytes of interactive input.
    ///
    /// Empty data with the latch unset means no input arrived within
    /// the poll window; the protocol timeout underneath is recovered
    /// here, never surfaced.
    pub fn read_stdin(&self, max_len: usize) -> BridgeResult<StdinRead> {
        if max_len == 0 {
            return Ok(StdinRead::empty());
        }

        {
            let mut state = self.stdin.lock();
            if !state.pending.is_empty() {
                let take = max_len.min(state.pending.len());
                let data: Vec<u8> = state.pending.drain(..take).collect();
                state.just_delivered = true;
                return Ok(StdinRead { data, eof: false });
            }
            if state.eof {
                return Ok(StdinRead::ended());
            }
            if state.just_delivered {
                state.just_delivered = false;
                return Ok(StdinRead::empty());
            }
        }

        let ch = self.shared.channel(ChannelKind::Stdin);
        let head = StdinRequest {
            max_len: max_len.min(u32::MAX as usize) as u32,
        };
        let payload = frame::encode(ChannelKind::Stdin, ch.capacity(), &head, &[])?;

        // The controller answers a dry poll at the bound itself; the
        // doubled wait here keeps that answer from racing our timer.
        let timeout = self.config.stdin_poll * 2;
        let resp = match self.exchange(ChannelKind::Stdin, payload, timeout) {
            Ok(resp) => resp,
            Err(e) if e.is_retryable_timeout() => return Ok(StdinRead::empty()),
            Err(e) => return Err(e),
        };

        match resp.status {
            status::AGAIN => Ok(StdinRead::empty()),
            status::OK => {
                let f = Frame::parse(ChannelKind::Stdin, &resp.payload)?;
                let header: StdinResponse = f.header(ChannelKind::Stdin)?;
                let mut state = self.stdin.lock();
                if header.eof {
                    state.eof = true;
                }
                let body = f.body();
                if body.is_empty() && header.eof {
                    return Ok(StdinRead::ended());
                }
                let take = max_len.min(body.len());
                state.pending.extend_from_slice(&body[take..]);
                state.just_delivered = true;
                Ok(StdinRead {
                    data: body[..take].to_vec(),
                    eof: false,
                })
            }
            other => Err(BridgeError::ProtocolViolation {
                channel: ChannelKind::Stdin,
                detail: format!("unexpected stdin status word {other}"),
            }),
        }
    }
}
