//! Single-slot chunk mailbox for streamed bodies.
//!
//! One chunk occupies the slot at a time. The reader taking a chunk is
//! the consumed acknowledgment; the writer blocks until it lands, so
//! chunk k+1 is never written before chunk k has been consumed. That
//! is the backpressure: a slow consumer stalls the producer instead of
//! growing a queue.
//!
//! Every stream carries a generation. [`ChunkMailbox::begin`] opens a
//! new stream and supersedes the previous one, so a writer left behind
//! by an abandoned body fails its next write instead of injecting
//! leftover chunks into the next logical request.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::ChannelKind;

use crate::parking::{Parking, PlatformParking};

const SLOT_EMPTY: u8 = 0;
const SLOT_FULL: u8 = 1;

pub struct ChunkMailbox {
    kind: ChannelKind,
    /// Generation of the stream currently allowed to write.
    stream: AtomicU64,
    slot_state: AtomicU8,
    done: AtomicBool,
    slot: Mutex<Vec<u8>>,
    /// Also the lock under which stream transitions happen.
    error: Mutex<Option<String>>,
    /// Writer parks here awaiting the consumed acknowledgment.
    writer: PlatformParking,
    /// Reader parks here awaiting the next chunk.
    reader: PlatformParking,
}

impl ChunkMailbox {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            stream: AtomicU64::new(0),
            slot_state: AtomicU8::new(SLOT_EMPTY),
            done: AtomicBool::new(false),
            slot: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            writer: PlatformParking::new(),
            reader: PlatformParking::new(),
        }
    }

    fn lock_error(&self) -> MutexGuard<'_, Option<String>> {
        match self.error.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn superseded(&self) -> BridgeError {
        BridgeError::ProtocolViolation {
            channel: self.kind,
            detail: "stream superseded by a newer request".into(),
        }
    }

    /// Open a new stream, superseding any previous writer. A writer
    /// still parked on the old stream wakes and fails its next write;
    /// an unconsumed chunk it left behind is discarded. Returns the
    /// stream token the new writer must present.
    pub fn begin(&self) -> u64 {
        let mut error = self.lock_error();
        let stream = self.stream.fetch_add(1, Ordering::AcqRel) + 1;
        *error = None;
        self.done.store(false, Ordering::Release);
        self.slot_state.store(SLOT_EMPTY, Ordering::Release);
        match self.slot.lock() {
            Ok(mut g) => g.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        drop(error);
        self.writer.wake_all();
        stream
    }

    // ---- writer side ----

    /// Put the next chunk on `stream`, blocking until the previous one
    /// has been consumed. Fails once the stream has been superseded by
    /// a newer `begin`.
    pub fn write_chunk(&self, stream: u64, data: &[u8], timeout: Duration) -> BridgeResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stream.load(Ordering::Acquire) != stream {
                return Err(self.superseded());
            }
            if self.done.load(Ordering::Acquire) {
                // Reader abandoned the stream (or fail() was called).
                return Err(BridgeError::ProtocolViolation {
                    channel: self.kind,
                    detail: "stream closed before chunk was written".into(),
                });
            }
            if self
                .slot_state
                .compare_exchange(SLOT_EMPTY, SLOT_FULL, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::ProtocolTimeout {
                    channel: self.kind,
                    timeout,
                });
            }
            self.writer.park(Some(deadline - now));
        }
        // The CAS above is our exclusive claim on the slot. A begin()
        // that raced the claim reset the state word already; re-check
        // before publishing so a stale chunk never reaches the reader.
        if self.stream.load(Ordering::Acquire) != stream {
            self.slot_state.store(SLOT_EMPTY, Ordering::Release);
            return Err(self.superseded());
        }
        {
            let mut slot = match self.slot.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.clear();
            slot.extend_from_slice(data);
        }
        self.reader.wake_one();
        Ok(())
    }

    /// Mark `stream` complete. Any chunk still in the slot is delivered
    /// first. Ignored when the stream has been superseded.
    pub fn finish(&self, stream: u64) {
        let guard = self.lock_error();
        if self.stream.load(Ordering::Acquire) != stream {
            return;
        }
        self.done.store(true, Ordering::Release);
        drop(guard);
        self.reader.wake_one();
    }

    /// Abort `stream` with a diagnostic. Ignored when the stream has
    /// been superseded.
    pub fn fail(&self, stream: u64, message: impl Into<String>) {
        let mut error = self.lock_error();
        if self.stream.load(Ordering::Acquire) != stream {
            return;
        }
        *error = Some(message.into());
        self.done.store(true, Ordering::Release);
        drop(error);
        self.reader.wake_one();
        self.writer.wake_all();
    }

    /// Tear the mailbox down for good: supersede any writer and surface
    /// `message` to a blocked reader. Used on session shutdown.
    pub fn close(&self, message: impl Into<String>) {
        let mut error = self.lock_error();
        self.stream.fetch_add(1, Ordering::AcqRel);
        *error = Some(message.into());
        self.done.store(true, Ordering::Release);
        drop(error);
        self.reader.wake_all();
        self.writer.wake_all();
    }

    // ---- reader side ----

    /// Take the next chunk. Taking it acknowledges consumption and
    /// unblocks the writer. `Ok(None)` means the stream finished
    /// cleanly; a failed stream surfaces its diagnostic.
    pub fn read_chunk(&self, timeout: Duration) -> BridgeResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.slot_state.load(Ordering::Acquire) == SLOT_FULL {
                let data = {
                    let mut slot = match self.slot.lock() {
                        Ok(g) => g,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    std::mem::take(&mut *slot)
                };
                // Consumed acknowledgment: free the slot, then wake.
                self.slot_state.store(SLOT_EMPTY, Ordering::Release);
                self.writer.wake_one();
                return Ok(Some(data));
            }
            if self.done.load(Ordering::Acquire) {
                // Re-check: a final chunk may have landed between the
                // slot check and the done check.
                if self.slot_state.load(Ordering::Acquire) == SLOT_FULL {
                    continue;
                }
                let err = self.lock_error().take();
                return match err {
                    Some(detail) => Err(BridgeError::ProtocolViolation {
                        channel: self.kind,
                        detail,
                    }),
                    None => Ok(None),
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::ProtocolTimeout {
                    channel: self.kind,
                    timeout,
                });
            }
            self.reader.park(Some(deadline - now));
        }
    }
}
