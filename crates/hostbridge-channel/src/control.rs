//! Per-resource request/response channel.
//!
//! One `RequestChannel` carries at most one outstanding request. The
//! worker side encodes a frame, publishes it, and parks until the
//! controller completes the exchange or the timeout expires. The
//! controller side polls `has_request`, takes the payload, and posts
//! the completion.
//!
//! Every exchange carries a generation number. A completion for an
//! abandoned exchange (the sender timed out and moved on) arrives with
//! a stale generation and is drained by the next sender instead of
//! being misattributed.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::proto::status;
use hostbridge_core::ChannelKind;

use crate::parking::{Parking, PlatformParking};

/// A request taken by the controller, tagged with the generation it
/// must echo on completion.
#[derive(Debug)]
pub struct PendingRequest {
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Raw completion as seen by the worker side.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u32,
    pub payload: Vec<u8>,
}

pub struct RequestChannel {
    kind: ChannelKind,
    capacity: usize,

    /// Serializes senders: the single-outstanding-request rule.
    exchange: Mutex<()>,

    /// Generation of the most recently published request.
    seq: AtomicU64,
    /// Generation echoed by the most recent completion.
    resp_seq: AtomicU64,

    request_ready: AtomicBool,
    response_ready: AtomicBool,
    resp_status: AtomicU32,
    closed: AtomicBool,

    /// The published request. Generation and payload travel together
    /// under this lock, so a take can never pair a payload with a
    /// different sender's generation.
    request: Mutex<Option<PendingRequest>>,
    response_buf: Mutex<Vec<u8>>,

    /// Parks the worker awaiting a completion.
    requester: PlatformParking,
    /// Wakes the controller's service loop; shared across channels.
    notifier: Arc<PlatformParking>,
}

impl RequestChannel {
    pub fn new(kind: ChannelKind, capacity: usize, notifier: Arc<PlatformParking>) -> Self {
        Self {
            kind,
            capacity,
            exchange: Mutex::new(()),
            seq: AtomicU64::new(0),
            resp_seq: AtomicU64::new(0),
            request_ready: AtomicBool::new(false),
            response_ready: AtomicBool::new(false),
            resp_status: AtomicU32::new(status::OK),
            closed: AtomicBool::new(false),
            request: Mutex::new(None),
            response_buf: Mutex::new(Vec::new()),
            requester: PlatformParking::new(),
            notifier,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_buf<'a>(&self, buf: &'a Mutex<Vec<u8>>) -> MutexGuard<'a, Vec<u8>> {
        match buf.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_request(&self) -> MutexGuard<'_, Option<PendingRequest>> {
        match self.request.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ---- worker side ----

    /// Publish `payload` and block until the controller completes the
    /// exchange or `timeout` expires.
    ///
    /// On timeout the exchange is abandoned: if the controller has not
    /// yet taken the request it is withdrawn, and any late completion
    /// is drained by the next sender.
    pub fn exchange(&self, payload: &[u8], timeout: Duration) -> BridgeResult<RawResponse> {
        if payload.len() > self.capacity {
            return Err(BridgeError::PayloadTooLarge {
                channel: self.kind,
                len: payload.len(),
                capacity: self.capacity,
            });
        }

        let _guard = match self.exchange.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::ProtocolViolation {
                channel: self.kind,
                detail: "channel closed".into(),
            });
        }

        // Drain a completion left behind by an abandoned exchange.
        self.response_ready.store(false, Ordering::Release);

        let my_seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        *self.lock_request() = Some(PendingRequest {
            seq: my_seq,
            payload: payload.to_vec(),
        });
        self.request_ready.store(true, Ordering::Release);
        self.notifier.wake_one();

        let deadline = Instant::now() + timeout;
        loop {
            if self.response_ready.load(Ordering::Acquire) {
                if self.resp_seq.load(Ordering::Acquire) == my_seq {
                    self.response_ready.store(false, Ordering::Release);
                    let payload = std::mem::take(&mut *self.lock_buf(&self.response_buf));
                    return Ok(RawResponse {
                        status: self.resp_status.load(Ordering::Acquire),
                        payload,
                    });
                }
                // Stale generation: drain and keep waiting for ours.
                log::debug!("{} channel drained a stale completion", self.kind);
                self.response_ready.store(false, Ordering::Release);
                continue;
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(BridgeError::ProtocolViolation {
                    channel: self.kind,
                    detail: "channel closed".into(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                // Withdraw the request if the controller never took it.
                if self
                    .request_ready
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    *self.lock_request() = None;
                }
                return Err(BridgeError::ProtocolTimeout {
                    channel: self.kind,
                    timeout,
                });
            }
            self.requester.park(Some(deadline - now));
        }
    }

    // ---- controller side ----

    /// True when a request is published and not yet taken.
    pub fn has_request(&self) -> bool {
        self.request_ready.load(Ordering::Acquire)
    }

    /// Take the published request, if any.
    pub fn take_request(&self) -> Option<PendingRequest> {
        if self
            .request_ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        // An empty slot under a raised flag is left over from a
        // request that was already consumed together with an earlier
        // raise; there is nothing to service.
        self.lock_request().take()
    }

    /// Post a completion for the exchange tagged `seq` and wake the
    /// waiting sender.
    pub fn complete(&self, seq: u64, status_word: u32, payload: Vec<u8>) {
        {
            let mut buf = self.lock_buf(&self.response_buf);
            *buf = payload;
        }
        self.resp_status.store(status_word, Ordering::Release);
        self.resp_seq.store(seq, Ordering::Release);
        self.response_ready.store(true, Ordering::Release);
        self.requester.wake_one();
    }

    /// Mark the channel closed and release any parked sender.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.requester.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn channel(kind: ChannelKind) -> Arc<RequestChannel> {
        Arc::new(RequestChannel::new(
            kind,
            4096,
            Arc::new(PlatformParking::new()),
        ))
    }

    #[test]
    fn round_trip() {
        let ch = channel(ChannelKind::Storage);
        let ch2 = Arc::clone(&ch);

        let servicer = thread::spawn(move || loop {
            if let Some(req) = ch2.take_request() {
                let mut reply = req.payload.clone();
                reply.reverse();
                ch2.complete(req.seq, status::OK, reply);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        });

        let resp = ch.exchange(b"abc", Duration::from_secs(5)).unwrap();
        assert_eq!(resp.status, status::OK);
        assert_eq!(resp.payload, b"cba");
        servicer.join().unwrap();
    }

    #[test]
    fn oversized_payload_rejected() {
        let ch = channel(ChannelKind::Http);
        let big = vec![0u8; 8192];
        match ch.exchange(&big, Duration::from_secs(1)) {
            Err(BridgeError::PayloadTooLarge { len, capacity, .. }) => {
                assert_eq!(len, 8192);
                assert_eq!(capacity, 4096);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // The refused payload never became a pending request.
        assert!(!ch.has_request());
    }

    #[test]
    fn timeout_with_no_servicer() {
        let ch = channel(ChannelKind::Stdin);
        let start = Instant::now();
        match ch.exchange(b"poll", Duration::from_millis(50)) {
            Err(BridgeError::ProtocolTimeout { channel, .. }) => {
                assert_eq!(channel, ChannelKind::Stdin);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
        // The abandoned request was withdrawn.
        assert!(!ch.has_request());
    }

    #[test]
    fn stale_completion_is_drained_not_misattributed() {
        let ch = channel(ChannelKind::Storage);
        let ch2 = Arc::clone(&ch);

        // First exchange times out; its request is taken but completed late.
        let taken = thread::spawn(move || loop {
            if let Some(req) = ch2.take_request() {
                break req;
            }
            thread::sleep(Duration::from_millis(1));
        });
        let err = ch.exchange(b"first", Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolTimeout { .. }));
        let stale = taken.join().unwrap();

        // The late completion lands before the next exchange starts.
        ch.complete(stale.seq, status::OK, b"stale".to_vec());

        let ch3 = Arc::clone(&ch);
        let servicer = thread::spawn(move || loop {
            if let Some(req) = ch3.take_request() {
                ch3.complete(req.seq, status::OK, b"fresh".to_vec());
                break;
            }
            thread::sleep(Duration::from_millis(1));
        });

        let resp = ch.exchange(b"second", Duration::from_secs(5)).unwrap();
        assert_eq!(resp.payload, b"fresh");
        servicer.join().unwrap();
    }

    #[test]
    fn senders_are_serialized() {
        let ch = channel(ChannelKind::Storage);
        let completed = Arc::new(AtomicU64::new(0));

        let servicer = {
            let ch = Arc::clone(&ch);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                let mut served = 0;
                while served < 2 {
                    if let Some(req) = ch.take_request() {
                        // The previous exchange must have fully
                        // completed before the next request appears.
                        thread::sleep(Duration::from_millis(20));
                        ch.complete(req.seq, status::OK, req.payload);
                        completed.fetch_add(1, Ordering::SeqCst);
                        served += 1;
                    } else {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        };

        let mut senders = Vec::new();
        for i in 0..2u8 {
            let ch = Arc::clone(&ch);
            senders.push(thread::spawn(move || {
                ch.exchange(&[i], Duration::from_secs(5)).unwrap()
            }));
        }
        for s in senders {
            let resp = s.join().unwrap();
            assert_eq!(resp.payload.len(), 1);
        }
        servicer.join().unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn completion_always_matches_the_request() {
        let ch = channel(ChannelKind::Storage);
        let stop = Arc::new(AtomicBool::new(false));

        let servicer = {
            let ch = Arc::clone(&ch);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    if let Some(req) = ch.take_request() {
                        thread::sleep(Duration::from_millis(1));
                        ch.complete(req.seq, status::OK, req.payload);
                    } else {
                        thread::sleep(Duration::from_micros(200));
                    }
                }
            })
        };

        // Tight timeouts abandon some exchanges mid-service; any
        // response that does arrive must echo the sender's own payload,
        // never a neighbor's.
        for i in 0..100u8 {
            let timeout = if i % 3 == 0 {
                Duration::from_micros(500)
            } else {
                Duration::from_millis(200)
            };
            if let Ok(resp) = ch.exchange(&[i], timeout) {
                assert_eq!(resp.payload, vec![i]);
            }
        }

        stop.store(true, Ordering::Release);
        servicer.join().unwrap();
    }

    #[test]
    fn close_releases_parked_sender() {
        let ch = channel(ChannelKind::Http);
        let ch2 = Arc::clone(&ch);
        let sender =
            thread::spawn(move || ch2.exchange(b"req", Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(30));
        ch.close();
        let err = sender.join().unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolViolation { .. }));
    }
}
