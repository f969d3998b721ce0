//! Display output flushing.
//!
//! Guest writes coalesce in the shared buffer; the service loop drains
//! them into the sink on a fixed cadence (roughly one repaint frame)
//! instead of per write.

use std::time::{Duration, Instant};

use hostbridge_channel::SessionShared;
use hostbridge_core::host::DisplaySink;

pub struct Flusher {
    sink: Box<dyn DisplaySink>,
    interval: Duration,
    last: Instant,
}

impl Flusher {
    pub fn new(sink: Box<dyn DisplaySink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last: Instant::now(),
        }
    }

    /// Drain and write if the cadence interval has elapsed.
    pub fn maybe_flush(&mut self, shared: &SessionShared) -> bool {
        if self.last.elapsed() < self.interval {
            return false;
        }
        self.flush_now(shared);
        true
    }

    /// Drain and write unconditionally. One sink write per flush, not
    /// per guest batch.
    pub fn flush_now(&mut self, shared: &SessionShared) {
        self.last = Instant::now();
        let batches = shared.take_display();
        if batches.is_empty() {
            return;
        }
        let joined = batches.concat();
        self.sink.write(joined.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::BridgeConfig;
    use std::sync::{Arc, Mutex};

    struct SharedSink(Arc<Mutex<Vec<Vec<u8>>>>);

    impl DisplaySink for SharedSink {
        fn write(&mut self, batch: &[u8]) {
            self.0.lock().unwrap().push(batch.to_vec());
        }
    }

    #[test]
    fn batches_coalesce_into_one_write() {
        let shared = SessionShared::new(&BridgeConfig::new());
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut flusher = Flusher::new(
            Box::new(SharedSink(Arc::clone(&out))),
            Duration::from_millis(1),
        );

        shared.push_display("a");
        shared.push_display("b");
        shared.push_display("c");
        flusher.flush_now(&shared);

        let writes = out.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], b"abc");
    }

    #[test]
    fn empty_buffer_writes_nothing() {
        let shared = SessionShared::new(&BridgeConfig::new());
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut flusher = Flusher::new(
            Box::new(SharedSink(Arc::clone(&out))),
            Duration::from_millis(1),
        );
        flusher.flush_now(&shared);
        assert!(out.lock().unwrap().is_empty());
    }

    #[test]
    fn cadence_gates_flushing() {
        let shared = SessionShared::new(&BridgeConfig::new());
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut flusher = Flusher::new(
            Box::new(SharedSink(Arc::clone(&out))),
            Duration::from_secs(60),
        );
        shared.push_display("x");
        // Interval has not elapsed since construction.
        assert!(!flusher.maybe_flush(&shared));
        assert!(out.lock().unwrap().is_empty());
    }
}
