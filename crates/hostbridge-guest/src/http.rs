//! Blocking HTTP.
//!
//! One round trip carries the request head and body and returns the
//! response head; the response body then streams through the session's
//! chunk mailbox. Consuming a chunk acknowledges it, which is what
//! lets the next one be written, so an abandoned stream stalls the
//! producer rather than buffering unboundedly.

use std::sync::Arc;
use std::time::Duration;

use hostbridge_channel::frame::{self, Frame};
use hostbridge_channel::SessionShared;
use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::proto::{status, HttpRequestHead, HttpResponseHead};
use hostbridge_core::ChannelKind;

use crate::handle::BridgeHandle;

/// A fully collected HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The in-flight body of a streamed response. Dropping it without
/// draining leaves the producer to time out; prefer reading to the end.
pub struct BodyStream {
    shared: Arc<SessionShared>,
    timeout: Duration,
    done: bool,
}

impl BodyStream {
    /// Next chunk, `None` at end of body. Taking the chunk is the
    /// acknowledgment that allows the following one.
    pub fn next_chunk(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        match self.shared.http_body().read_chunk(self.timeout) {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// Drain the remainder into one buffer.
    pub fn collect(mut self) -> BridgeResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl Iterator for BodyStream {
    type Item = BridgeResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl BridgeHandle {
    /// Issue a request and stream the response body.
    pub fn http_stream(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> BridgeResult<(HttpResponseHead, BodyStream)> {
        let ch = self.shared.channel(ChannelKind::Http);
        let head = HttpRequestHead {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.to_vec(),
            body_len: body.len() as u64,
        };
        let payload = frame::encode(ChannelKind::Http, ch.capacity(), &head, body)?;
        let resp = self.exchange(ChannelKind::Http, payload, self.config.io_timeout)?;

        if resp.status != status::OK {
            return Err(BridgeError::ProtocolViolation {
                channel: ChannelKind::Http,
                detail: format!("http exchange answered with status word {}", resp.status),
            });
        }
        let resp_head: HttpResponseHead =
            Frame::parse(ChannelKind::Http, &resp.payload)?.header(ChannelKind::Http)?;

        Ok((
            resp_head,
            BodyStream {
                shared: Arc::clone(&self.shared),
                timeout: self.config.io_timeout,
                done: false,
            },
        ))
    }

    /// Issue a request and collect the whole response.
    pub fn http_request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> BridgeResult<HttpResponse> {
        let (head, stream) = self.http_stream(method, url, headers, body)?;
        let body = stream.collect()?;
        Ok(HttpResponse {
            status: head.status,
            headers: head.headers,
            body,
        })
    }

    /// `GET` with no extra headers.
    pub fn http_get(&self, url: &str) -> BridgeResult<HttpResponse> {
        self.http_request("GET", url, &[], &[])
    }
}
