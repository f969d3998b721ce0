//! The controller's service loop.
//!
//! One pass polls every channel, services what it finds, flushes the
//! display on cadence, and parks briefly when idle. The loop itself
//! never waits on guest progress; the single operation that must
//! (streaming an HTTP body under acknowledgment backpressure) runs on
//! a spawned streamer thread.
//!
//! Stdin is serviced from the buffered input queue. An empty poll is
//! not answered immediately: the request is held until input arrives,
//! the input source reports end, or the poll bound elapses and the
//! guest is told to retry.

use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use hostbridge_channel::control::PendingRequest;
use hostbridge_channel::frame::{self, Frame};
use hostbridge_channel::parking::Parking;
use hostbridge_channel::SessionShared;
use hostbridge_core::host::{HttpBackend, StoreBackend};
use hostbridge_core::proto::{
    status, HttpRequestHead, HttpResponseHead, StdinRequest, StdinResponse, StoreOp, StoreRequest,
    StoreResponse,
};
use hostbridge_core::{mode, BridgeConfig, ChannelKind};

use crate::display::Flusher;
use crate::session::InputQueue;

pub(crate) struct ServiceContext {
    pub shared: Arc<SessionShared>,
    pub config: BridgeConfig,
    pub store: Box<dyn StoreBackend>,
    pub http: Arc<dyn HttpBackend + Sync>,
    pub input: Arc<InputQueue>,
    pub flusher: Flusher,
}

/// A taken stdin request waiting for input to arrive.
struct HeldStdin {
    seq: u64,
    max_len: usize,
    since: Instant,
}

pub(crate) fn run(mut ctx: ServiceContext) {
    mode::enter_controller_role();
    ctx.shared.mark_ready();
    log::debug!("service loop started");

    let mut held_stdin: Option<HeldStdin> = None;
    let mut stdin_carry: Vec<u8> = Vec::new();
    let mut streamers: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let mut did_work = false;

        if held_stdin.is_none() {
            if let Some(req) = ctx.shared.channel(ChannelKind::Stdin).take_request() {
                held_stdin = hold_stdin(&ctx, req);
                did_work = true;
            }
        }
        if let Some(held) = held_stdin.take() {
            if answer_stdin(&ctx, &held, &mut stdin_carry) {
                did_work = true;
            } else {
                held_stdin = Some(held);
            }
        }

        if let Some(req) = ctx.shared.channel(ChannelKind::Storage).take_request() {
            service_storage(&ctx, req);
            did_work = true;
        }

        if let Some(req) = ctx.shared.channel(ChannelKind::Http).take_request() {
            // Open the body stream here, in request order, so a slow
            // streamer thread left over from an abandoned request can
            // never supersede its successor.
            let stream = ctx.shared.http_body().begin();
            streamers.push(spawn_http_streamer(&ctx, req, stream));
            did_work = true;
        }
        streamers.retain(|h| !h.is_finished());

        ctx.flusher.maybe_flush(&ctx.shared);

        if ctx.shared.is_shutting_down() {
            break;
        }
        if !did_work {
            ctx.shared.notifier().park(Some(ctx.config.idle_park));
        }
    }

    ctx.flusher.flush_now(&ctx.shared);
    for handle in streamers {
        let _ = handle.join();
    }
    log::debug!("service loop stopped");
}

fn complete_with<H: serde::Serialize>(
    ctx: &ServiceContext,
    kind: ChannelKind,
    seq: u64,
    status_word: u32,
    header: &H,
    body: &[u8],
) {
    let ch = ctx.shared.channel(kind);
    match frame::encode(kind, ch.capacity(), header, body) {
        Ok(payload) => ch.complete(seq, status_word, payload),
        Err(e) => {
            log::warn!("{kind} response dropped: {e}");
            ch.complete(seq, status::ERR, Vec::new());
        }
    }
}

// ── stdin ──

fn hold_stdin(ctx: &ServiceContext, req: PendingRequest) -> Option<HeldStdin> {
    let parsed = Frame::parse(ChannelKind::Stdin, &req.payload)
        .and_then(|f| f.header::<StdinRequest>(ChannelKind::Stdin));
    match parsed {
        Ok(head) => Some(HeldStdin {
            seq: req.seq,
            max_len: head.max_len as usize,
            since: Instant::now(),
        }),
        Err(e) => {
            log::warn!("undecodable stdin request: {e}");
            complete_with(
                ctx,
                ChannelKind::Stdin,
                req.seq,
                status::ERR,
                &StdinResponse::default(),
                &[],
            );
            None
        }
    }
}

/// Answer a held stdin request if input, end-of-input, or the poll
/// bound has arrived. Returns false to keep holding.
fn answer_stdin(ctx: &ServiceContext, held: &HeldStdin, carry: &mut Vec<u8>) -> bool {
    if carry.is_empty() {
        while let Some(chunk) = ctx.input.pop() {
            carry.extend_from_slice(&chunk);
            if carry.len() >= held.max_len {
                break;
            }
        }
    }

    if !carry.is_empty() {
        // Deliver the whole available batch; the guest splits it
        // against max_len locally and buffers the rest, so a burst is
        // drained without a round trip per read. Keep headroom for the
        // frame header inside the payload region.
        let cap = ctx.config.channel_capacity.saturating_sub(1024);
        let take = carry.len().min(cap).max(1);
        let data: Vec<u8> = carry.drain(..take).collect();
        complete_with(
            ctx,
            ChannelKind::Stdin,
            held.seq,
            status::OK,
            &StdinResponse { eof: false },
            &data,
        );
        return true;
    }

    if ctx.input.is_eof() {
        complete_with(
            ctx,
            ChannelKind::Stdin,
            held.seq,
            status::OK,
            &StdinResponse { eof: true },
            &[],
        );
        return true;
    }

    if held.since.elapsed() >= ctx.config.stdin_poll {
        complete_with(
            ctx,
            ChannelKind::Stdin,
            held.seq,
            status::AGAIN,
            &StdinResponse::default(),
            &[],
        );
        return true;
    }

    false
}

// ── storage ──

fn service_storage(ctx: &ServiceContext, req: PendingRequest) {
    let parsed = Frame::parse(ChannelKind::Storage, &req.payload).and_then(|f| {
        let head = f.header::<StoreRequest>(ChannelKind::Storage)?;
        Ok((head, f.body().to_vec()))
    });
    let (head, body) = match parsed {
        Ok(x) => x,
        Err(e) => {
            log::warn!("undecodable storage request: {e}");
            complete_with(
                ctx,
                ChannelKind::Storage,
                req.seq,
                status::ERR,
                &StoreResponse::failure(e.to_string()),
                &[],
            );
            return;
        }
    };

    match perform_store_op(ctx.store.as_ref(), &head, &body) {
        Ok((resp, data)) => {
            complete_with(ctx, ChannelKind::Storage, req.seq, status::OK, &resp, &data)
        }
        Err(msg) => {
            log::debug!("storage {op:?} on {path:?} failed: {msg}", op = head.op, path = head.path);
            complete_with(
                ctx,
                ChannelKind::Storage,
                req.seq,
                status::ERR,
                &StoreResponse::failure(msg),
                &[],
            );
        }
    }
}

fn perform_store_op(
    store: &dyn StoreBackend,
    head: &StoreRequest,
    body: &[u8],
) -> Result<(StoreResponse, Vec<u8>), String> {
    let mut resp = StoreResponse::default();
    let mut data = Vec::new();
    match head.op {
        StoreOp::Exists => {
            resp.exists = Some(store.exists(&head.path)?);
        }
        StoreOp::Stat => {
            resp.meta = Some(store.stat(&head.path)?);
        }
        StoreOp::ReadDir => {
            resp.entries = Some(store.read_dir(&head.path)?);
        }
        StoreOp::Read => {
            data = store.read(&head.path, head.offset.unwrap_or(0), head.len)?;
            resp.data_len = data.len() as u64;
        }
        StoreOp::Write => {
            let content = body
                .get(..head.data_len as usize)
                .ok_or("write content shorter than declared length")?;
            resp.size = Some(store.write(&head.path, head.offset, content)?);
        }
        StoreOp::CreateDir => {
            store.create_dir(&head.path, head.recursive)?;
        }
        StoreOp::RemoveFile => {
            store.remove_file(&head.path)?;
        }
        StoreOp::RemoveDir => {
            store.remove_dir(&head.path, head.recursive)?;
        }
        StoreOp::Rename => {
            let to = head.to.as_deref().ok_or("rename requires a destination")?;
            store.rename(&head.path, to)?;
        }
        StoreOp::ScanTree => {
            resp.tree = Some(store.scan_tree()?);
        }
    }
    Ok((resp, data))
}

// ── http ──

fn spawn_http_streamer(ctx: &ServiceContext, req: PendingRequest, stream: u64) -> JoinHandle<()> {
    let shared = Arc::clone(&ctx.shared);
    let http = Arc::clone(&ctx.http);
    let chunk_size = ctx.config.chunk_size;
    let io_timeout = ctx.config.io_timeout;
    let capacity = ctx.config.channel_capacity;

    std::thread::spawn(move || {
        let ch = shared.channel(ChannelKind::Http);
        let mailbox = shared.http_body();

        let parsed = Frame::parse(ChannelKind::Http, &req.payload).and_then(|f| {
            let head = f.header::<HttpRequestHead>(ChannelKind::Http)?;
            Ok((head, f.body().to_vec()))
        });
        let (head, body) = match parsed {
            Ok(x) => x,
            Err(e) => {
                log::warn!("undecodable http request: {e}");
                ch.complete(req.seq, status::ERR, Vec::new());
                return;
            }
        };

        let exchange = http.execute(&head.method, &head.url, &head.headers, &body);
        let (resp_head, mut reader): (HttpResponseHead, Box<dyn Read + Send>) = match exchange {
            Ok(ex) => (
                HttpResponseHead {
                    status: ex.status,
                    headers: ex.headers,
                },
                ex.body,
            ),
            Err(msg) => {
                // Transport failure becomes a well-formed bad gateway;
                // the message is the body.
                log::warn!("http {} {} failed: {msg}", head.method, head.url);
                (
                    HttpResponseHead {
                        status: 502,
                        headers: vec![("content-type".into(), "text/plain".into())],
                    },
                    Box::new(std::io::Cursor::new(msg.into_bytes())),
                )
            }
        };

        match frame::encode(ChannelKind::Http, capacity, &resp_head, &[]) {
            Ok(payload) => ch.complete(req.seq, status::OK, payload),
            Err(e) => {
                log::warn!("http response head dropped: {e}");
                ch.complete(req.seq, status::ERR, Vec::new());
                return;
            }
        }

        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    mailbox.finish(stream);
                    break;
                }
                Ok(n) => {
                    if let Err(e) = mailbox.write_chunk(stream, &buf[..n], io_timeout) {
                        log::warn!("http body stream aborted: {e}");
                        break;
                    }
                }
                Err(e) => {
                    mailbox.fail(stream, e.to_string());
                    break;
                }
            }
        }
    })
}
