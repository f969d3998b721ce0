//! End-to-end exercises: a real controller session on one side, the
//! blocking facades on the other.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostbridge_controller::{MemStore, Session, UreqHttp};
use hostbridge_core::host::{DisplaySink, HttpBackend, HttpExchange, VecSink};
use hostbridge_core::proto::ScanNode;
use hostbridge_core::{BridgeConfig, BridgeError};
use hostbridge_guest::BridgeHandle;

struct CannedHttp {
    status: u16,
    body: Vec<u8>,
    fail: Option<String>,
}

impl HttpBackend for CannedHttp {
    fn execute(
        &self,
        _method: &str,
        _url: &str,
        _headers: &[(String, String)],
        _body: &[u8],
    ) -> Result<HttpExchange, String> {
        if let Some(msg) = &self.fail {
            return Err(msg.clone());
        }
        Ok(HttpExchange {
            status: self.status,
            headers: vec![("x-canned".to_string(), "yes".to_string())],
            body: Box::new(Cursor::new(self.body.clone())),
        })
    }
}

/// Serves a different body for each successive request.
struct SequencedHttp {
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl HttpBackend for SequencedHttp {
    fn execute(
        &self,
        _method: &str,
        _url: &str,
        _headers: &[(String, String)],
        _body: &[u8],
    ) -> Result<HttpExchange, String> {
        let mut bodies = self.bodies.lock().unwrap();
        let body = if bodies.is_empty() {
            Vec::new()
        } else {
            bodies.remove(0)
        };
        Ok(HttpExchange {
            status: 200,
            headers: Vec::new(),
            body: Box::new(Cursor::new(body)),
        })
    }
}

fn session_with(config: BridgeConfig, http: Arc<dyn HttpBackend + Sync>) -> (Session, BridgeHandle) {
    let session = Session::init(
        config.clone(),
        Box::new(MemStore::new()),
        http,
        Box::new(VecSink::default()),
    )
    .unwrap();
    let handle = BridgeHandle::attach_with(session.shared(), config).unwrap();
    (session, handle)
}

fn plain_session(config: BridgeConfig) -> (Session, BridgeHandle) {
    let http = Arc::new(UreqHttp::new(&config));
    session_with(config, http)
}

/// Zero out timestamps so structural comparison ignores clock skew
/// between the guest's write-through updates and the store.
fn normalize(node: &mut ScanNode) {
    match node {
        ScanNode::File { modified_ms, .. } => *modified_ms = 0,
        ScanNode::Dir { children } => {
            for child in children.values_mut() {
                normalize(child);
            }
        }
        ScanNode::Symlink { .. } => {}
    }
}

#[test]
fn storage_round_trip() {
    let (_session, handle) = plain_session(BridgeConfig::new());

    assert!(!handle.exists("notes/today.txt").unwrap());
    handle.write_file("notes/today.txt", b"buy milk").unwrap();
    assert!(handle.exists("notes/today.txt").unwrap());

    assert_eq!(handle.read_file("notes/today.txt").unwrap(), b"buy milk");
    assert_eq!(
        handle
            .read_file_range("notes/today.txt", 4, Some(4))
            .unwrap(),
        b"milk"
    );

    let meta = handle.stat("notes/today.txt").unwrap();
    assert!(!meta.is_dir);
    assert_eq!(meta.size, 8);

    let entries = handle.read_dir("notes").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "today.txt");

    handle.rename("notes/today.txt", "notes/archive.txt").unwrap();
    assert!(!handle.exists("notes/today.txt").unwrap());
    handle.remove_file("notes/archive.txt").unwrap();
    handle.remove_dir("notes", false).unwrap();
    assert!(!handle.exists("notes").unwrap());
}

#[test]
fn storage_errors_use_conventional_spellings() {
    let (_session, handle) = plain_session(BridgeConfig::new());
    match handle.read_file("no/such/file") {
        Err(BridgeError::StorageOperationFailed(msg)) => {
            assert!(msg.contains("No such file or directory"), "got: {msg}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn binary_content_survives_storage() {
    let (_session, handle) = plain_session(BridgeConfig::new());
    let blob: Vec<u8> = (0..=255).cycle().take(3000).collect();
    handle.write_file("blob.bin", &blob).unwrap();
    assert_eq!(handle.read_file("blob.bin").unwrap(), blob);
}

#[test]
fn oversized_write_fails_cleanly() {
    let config = BridgeConfig::new().channel_capacity(4096).chunk_size(1024);
    let (_session, handle) = plain_session(config);

    let big = vec![0u8; 8192];
    match handle.write_file("big.bin", &big) {
        Err(BridgeError::PayloadTooLarge { capacity, .. }) => assert_eq!(capacity, 4096),
        other => panic!("unexpected: {other:?}"),
    }
    // Refused before anything was written.
    assert!(!handle.exists("big.bin").unwrap());
}

#[test]
fn tree_cache_tracks_mutations() {
    let (_session, handle) = plain_session(BridgeConfig::new());
    handle.write_file("seed.txt", b"1").unwrap();
    handle.sync_tree().unwrap();

    handle.write_file("docs/a.txt", b"aa").unwrap();
    handle.create_dir("docs/sub", false).unwrap();
    handle.rename("docs/a.txt", "docs/sub/a.txt").unwrap();
    handle.remove_file("seed.txt").unwrap();

    // Cache lookups answer without a round trip and agree with a
    // fresh scan.
    assert!(handle.tree().contains("docs/sub/a.txt"));
    assert!(!handle.tree().contains("seed.txt"));

    let mut cached = handle.tree().snapshot().unwrap();
    let mut fresh = handle.sync_tree().unwrap();
    normalize(&mut cached);
    normalize(&mut fresh);
    assert_eq!(cached, fresh);
}

#[test]
fn stdin_delivers_buffers_and_latches_eof() {
    let config = BridgeConfig::new().stdin_poll(Duration::from_millis(30));
    let (session, handle) = plain_session(config);

    // Nothing queued: the poll window elapses and the read is empty.
    let read = handle.read_stdin(64).unwrap();
    assert!(read.data.is_empty());
    assert!(!read.eof);

    assert!(session.push_input(b"hello world\n".to_vec()));
    let read = handle.read_stdin(5).unwrap();
    assert_eq!(read.data, b"hello");
    // Remainder drains without waiting on the poll window.
    let read = handle.read_stdin(64).unwrap();
    assert_eq!(read.data, b" world\n");

    session.close_input();
    // The read right after a delivered batch answers empty locally;
    // the round trip after that observes end-of-input.
    let read = handle.read_stdin(64).unwrap();
    assert!(read.data.is_empty());
    assert!(!read.eof);
    let read = handle.read_stdin(64).unwrap();
    assert!(read.data.is_empty());
    assert!(read.eof);
    // Latched: answered locally from here on.
    assert!(handle.read_stdin(64).unwrap().eof);
}

#[test]
fn http_streams_large_bodies_in_order() {
    let config = BridgeConfig::new().chunk_size(1024);
    let body: Vec<u8> = (0..=255).cycle().take(1024 * 3 + 100).collect();
    let http = Arc::new(CannedHttp {
        status: 200,
        body: body.clone(),
        fail: None,
    });
    let (_session, handle) = session_with(config, http);

    let resp = handle.http_get("http://canned.example/data").unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("x-canned"), Some("yes"));
    assert_eq!(resp.body, body);
}

#[test]
fn abandoned_body_stream_does_not_bleed_into_next_request() {
    let config = BridgeConfig::new().chunk_size(1024);
    let second = vec![0xBB; 2048];
    let http = Arc::new(SequencedHttp {
        bodies: Mutex::new(vec![vec![0xAA; 8192], second.clone()]),
    });
    let (_session, handle) = session_with(config, http);

    // Read one chunk of the first body, then walk away from it.
    let (head, mut stream) = handle
        .http_stream("GET", "http://canned.example/big", &[], &[])
        .unwrap();
    assert_eq!(head.status, 200);
    let chunk = stream.next_chunk().unwrap().unwrap();
    assert!(chunk.iter().all(|&b| b == 0xAA));
    drop(stream);

    // The second response must contain its own bytes and nothing left
    // over from the abandoned stream.
    let resp = handle.http_get("http://canned.example/small").unwrap();
    assert_eq!(resp.body, second);
}

#[test]
fn http_transport_failure_becomes_bad_gateway() {
    let http = Arc::new(CannedHttp {
        status: 0,
        body: Vec::new(),
        fail: Some("dns lookup failed".to_string()),
    });
    let (_session, handle) = session_with(BridgeConfig::new(), http);

    let resp = handle.http_get("http://unreachable.example/").unwrap();
    assert_eq!(resp.status, 502);
    assert_eq!(resp.body, b"dns lookup failed");
}

#[test]
fn consecutive_http_requests_reuse_the_channel() {
    let http = Arc::new(CannedHttp {
        status: 200,
        body: b"same answer".to_vec(),
        fail: None,
    });
    let (_session, handle) = session_with(BridgeConfig::new(), http);

    for _ in 0..3 {
        let resp = handle.http_get("http://canned.example/").unwrap();
        assert_eq!(resp.body, b"same answer");
    }
}

struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl DisplaySink for CaptureSink {
    fn write(&mut self, batch: &[u8]) {
        self.0.lock().unwrap().extend_from_slice(batch);
    }
}

#[test]
fn display_output_flushes_coalesced() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let config = BridgeConfig::new().flush_interval(Duration::from_millis(5));
    let mut session = Session::init(
        config.clone(),
        Box::new(MemStore::new()),
        Arc::new(UreqHttp::new(&config)),
        Box::new(CaptureSink(Arc::clone(&out))),
    )
    .unwrap();
    let handle = BridgeHandle::attach_with(session.shared(), config).unwrap();

    handle.print("alpha ");
    handle.print("beta ");
    handle.print("gamma");
    // Shutdown performs a final flush, so everything queued lands.
    session.shutdown();

    let written = out.lock().unwrap();
    assert_eq!(
        String::from_utf8_lossy(&written),
        "alpha beta gamma"
    );
}

#[test]
fn guest_thread_blocks_while_controller_services() {
    let (_session, handle) = plain_session(BridgeConfig::new());
    let handle = Arc::new(handle);

    let mut workers = Vec::new();
    for i in 0..4u8 {
        let handle = Arc::clone(&handle);
        workers.push(std::thread::spawn(move || {
            let path = format!("w{i}.bin");
            handle.write_file(&path, &[i; 16]).unwrap();
            handle.read_file(&path).unwrap()
        }));
    }
    for (i, worker) in workers.into_iter().enumerate() {
        assert_eq!(worker.join().unwrap(), vec![i as u8; 16]);
    }
}
