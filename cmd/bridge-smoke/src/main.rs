//! Hostbridge End-to-End Smoke Test
//!
//! Tests the full bridge stack:
//!   Part A — Channel protocol: round trip, stale drain, capacity
//!   Part B — Storage: files, directories, tree cache consistency
//!   Part C — Stdin: buffered input, bounded polls, end-of-input latch
//!   Part D — HTTP: chunked streaming, bad-gateway synthesis
//!   Part E — Display and pollables
//!
//! Run: ./target/release/bridge-smoke
//! (no network access required; HTTP uses a canned backend)

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostbridge_channel::parking::PlatformParking;
use hostbridge_channel::RequestChannel;
use hostbridge_controller::{MemStore, Session, UreqHttp};
use hostbridge_core::host::{DisplaySink, HttpBackend, HttpExchange};
use hostbridge_core::pollable::{DeadlinePollable, ImmediatePollable, Pollable, TaskPollable};
use hostbridge_core::proto::status;
use hostbridge_core::{BridgeConfig, BridgeError, ChannelKind};
use hostbridge_guest::BridgeHandle;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

struct CannedHttp {
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
        match &self.fail {
            Some(msg) => Err(msg.clone()),
            None => Ok(HttpExchange {
                status: 200,
                headers: vec![("content-type".into(), "application/octet-stream".into())],
                body: Box::new(Cursor::new(self.body.clone())),
            }),
        }
    }
}

struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl DisplaySink for CaptureSink {
    fn write(&mut self, batch: &[u8]) {
        self.0.lock().unwrap().extend_from_slice(batch);
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Channel protocol
// ════════════════════════════════════════════════════════════

fn test_channel(t: &mut TestRunner) {
    t.section("Part A: Channel protocol");

    let ch = Arc::new(RequestChannel::new(
        ChannelKind::Storage,
        4096,
        Arc::new(PlatformParking::new()),
    ));

    // Echo servicer
    let stop = Arc::new(AtomicBool::new(false));
    let servicer = {
        let ch = Arc::clone(&ch);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if let Some(req) = ch.take_request() {
                    ch.complete(req.seq, status::OK, req.payload);
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    match ch.exchange(b"ping", Duration::from_secs(5)) {
        Ok(resp) => t.check(
            "round trip echoes payload",
            resp.payload == b"ping" && resp.status == status::OK,
            "mismatched echo",
        ),
        Err(e) => t.fail("round trip echoes payload", &e.to_string()),
    }

    let big = vec![0u8; 8192];
    t.check(
        "oversized payload refused",
        matches!(
            ch.exchange(&big, Duration::from_secs(1)),
            Err(BridgeError::PayloadTooLarge { .. })
        ),
        "expected PayloadTooLarge",
    );

    stop.store(true, Ordering::Relaxed);
    servicer.join().ok();

    t.check(
        "unanswered exchange times out",
        matches!(
            ch.exchange(b"void", Duration::from_millis(50)),
            Err(BridgeError::ProtocolTimeout { .. })
        ),
        "expected ProtocolTimeout",
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Storage
// ════════════════════════════════════════════════════════════

fn test_storage(t: &mut TestRunner, handle: &BridgeHandle) {
    t.section("Part B: Storage");

    let write = handle.write_file("dir/hello.txt", b"hello bridge");
    t.check("write creates parents", write.is_ok(), "write failed");

    match handle.read_file("dir/hello.txt") {
        Ok(data) => t.check(
            "read returns written bytes",
            data == b"hello bridge",
            "content mismatch",
        ),
        Err(e) => t.fail("read returns written bytes", &e.to_string()),
    }

    let blob: Vec<u8> = (0..=255).collect();
    let ok = handle.write_file("bin.dat", &blob).is_ok()
        && handle.read_file("bin.dat").map(|d| d == blob).unwrap_or(false);
    t.check("binary content intact", ok, "binary round trip failed");

    t.check(
        "missing file reports conventionally",
        matches!(
            handle.read_file("nope"),
            Err(BridgeError::StorageOperationFailed(ref m)) if m.contains("No such file")
        ),
        "unexpected error shape",
    );

    let synced = handle.sync_tree().is_ok();
    t.check("tree scan seeds cache", synced, "sync_tree failed");
    if synced {
        handle.write_file("dir/more.txt", b"x").ok();
        t.check(
            "cache tracks writes",
            handle.tree().contains("dir/more.txt"),
            "write not reflected in cache",
        );
        handle.remove_file("dir/more.txt").ok();
        t.check(
            "cache tracks removals",
            !handle.tree().contains("dir/more.txt"),
            "removal not reflected in cache",
        );
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Stdin
// ════════════════════════════════════════════════════════════

fn test_stdin(t: &mut TestRunner, session: &Session, handle: &BridgeHandle) {
    t.section("Part C: Stdin");

    match handle.read_stdin(32) {
        Ok(read) => t.check(
            "dry poll reads empty",
            read.data.is_empty() && !read.eof,
            "expected empty non-eof read",
        ),
        Err(e) => t.fail("dry poll reads empty", &e.to_string()),
    }

    session.push_input(b"typed line\n".to_vec());
    match handle.read_stdin(5) {
        Ok(read) => t.check("bounded read takes prefix", read.data == b"typed", "wrong prefix"),
        Err(e) => t.fail("bounded read takes prefix", &e.to_string()),
    }
    match handle.read_stdin(32) {
        Ok(read) => t.check(
            "remainder drains buffered",
            read.data == b" line\n",
            "wrong remainder",
        ),
        Err(e) => t.fail("remainder drains buffered", &e.to_string()),
    }

    session.close_input();
    // One locally-answered empty read may precede the latch.
    let mut eof_seen = false;
    for _ in 0..3 {
        if handle.read_stdin(32).map(|r| r.eof).unwrap_or(false) {
            eof_seen = true;
            break;
        }
    }
    let eof_again = handle.read_stdin(32).map(|r| r.eof).unwrap_or(false);
    t.check("end-of-input latches", eof_seen && eof_again, "latch did not hold");
}

// ════════════════════════════════════════════════════════════
// Part D: HTTP
// ════════════════════════════════════════════════════════════

fn test_http(t: &mut TestRunner) {
    t.section("Part D: HTTP");

    let config = BridgeConfig::new().chunk_size(1024);
    let body: Vec<u8> = (0..=255).cycle().take(1024 * 4 + 17).collect();

    let session = Session::init(
        config.clone(),
        Box::new(MemStore::new()),
        Arc::new(CannedHttp { body: body.clone(), fail: None }),
        Box::new(CaptureSink(Arc::new(Mutex::new(Vec::new())))),
    );
    let Ok(session) = session else {
        t.fail("session with canned http", "init failed");
        return;
    };
    let Ok(handle) = BridgeHandle::attach_with(session.shared(), config.clone()) else {
        t.fail("session with canned http", "attach failed");
        return;
    };

    match handle.http_get("http://canned.example/data") {
        Ok(resp) => {
            t.check("status and headers arrive", resp.status == 200, "wrong status");
            t.check("chunked body reassembles", resp.body == body, "body mismatch");
        }
        Err(e) => {
            t.fail("status and headers arrive", &e.to_string());
            t.fail("chunked body reassembles", "request failed");
        }
    }
    drop(session);

    let session = Session::init(
        config.clone(),
        Box::new(MemStore::new()),
        Arc::new(CannedHttp { body: Vec::new(), fail: Some("connect refused".into()) }),
        Box::new(CaptureSink(Arc::new(Mutex::new(Vec::new())))),
    );
    let Ok(session) = session else {
        t.fail("bad gateway synthesized", "init failed");
        return;
    };
    let Ok(handle) = BridgeHandle::attach_with(session.shared(), config) else {
        t.fail("bad gateway synthesized", "attach failed");
        return;
    };
    match handle.http_get("http://unreachable.example/") {
        Ok(resp) => t.check(
            "bad gateway synthesized",
            resp.status == 502 && resp.body == b"connect refused",
            "wrong synthesized response",
        ),
        Err(e) => t.fail("bad gateway synthesized", &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part E: Display and pollables
// ════════════════════════════════════════════════════════════

fn test_display_and_pollables(t: &mut TestRunner) {
    t.section("Part E: Display and pollables");

    let out = Arc::new(Mutex::new(Vec::new()));
    let config = BridgeConfig::new().flush_interval(Duration::from_millis(5));
    let session = Session::init(
        config.clone(),
        Box::new(MemStore::new()),
        Arc::new(UreqHttp::new(&config)),
        Box::new(CaptureSink(Arc::clone(&out))),
    );
    match session {
        Ok(mut session) => {
            let shared = session.shared();
            shared.push_display("one ");
            shared.push_display("two");
            session.shutdown();
            let written = out.lock().unwrap().clone();
            t.check(
                "display coalesces and flushes",
                written == b"one two",
                &format!("got {:?}", String::from_utf8_lossy(&written)),
            );
        }
        Err(e) => t.fail("display coalesces and flushes", &e.to_string()),
    }

    t.check("immediate pollable ready", ImmediatePollable.ready(), "not ready");

    let deadline = DeadlinePollable::after(Duration::from_millis(10));
    let was_pending = !deadline.ready();
    deadline.block();
    t.check(
        "deadline pollable settles",
        was_pending && deadline.ready(),
        "deadline readiness wrong",
    );

    let task = TaskPollable::spawn(|| 7u32);
    task.block();
    t.check(
        "task pollable settles with value",
        task.take() == Some(7),
        "wrong value",
    );

    let failing: TaskPollable<Result<(), String>> =
        TaskPollable::spawn(|| Err("boom".to_string()));
    failing.block();
    t.check(
        "task pollable settles on failure",
        failing.ready(),
        "failure did not settle",
    );
}

fn main() {
    env_logger::init();

    println!("hostbridge smoke test");

    let mut t = TestRunner::new();

    test_channel(&mut t);

    let config = BridgeConfig::new().stdin_poll(Duration::from_millis(30));
    let session = Session::init(
        config.clone(),
        Box::new(MemStore::new()),
        Arc::new(UreqHttp::new(&config)),
        Box::new(CaptureSink(Arc::new(Mutex::new(Vec::new())))),
    );
    match session {
        Ok(session) => match BridgeHandle::attach_with(session.shared(), config) {
            Ok(handle) => {
                test_storage(&mut t, &handle);
                test_stdin(&mut t, &session, &handle);
            }
            Err(e) => t.fail("session attach", &e.to_string()),
        },
        Err(e) => t.fail("session init", &e.to_string()),
    }

    test_http(&mut t);
    test_display_and_pollables(&mut t);

    t.summary();
    if t.failed > 0 {
        std::process::exit(1);
    }
}
