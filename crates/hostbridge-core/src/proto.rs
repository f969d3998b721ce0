//! Wire vocabulary for the three resource channels.
//!
//! These types are the *lingua franca* between the guest-side facades
//! and the controller. Each frame on a channel is a `u32` little-endian
//! header length, the JSON-encoded header, then an opaque binary
//! segment. File contents and HTTP bodies travel in the binary segment
//! and never pass through text encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Response status word, carried in the control block beside the frame.
pub mod status {
    /// Operation succeeded; header and binary segment are valid.
    pub const OK: u32 = 0;
    /// No data available right now; retry (stdin only).
    pub const AGAIN: u32 = 1;
    /// Operation failed; header carries the error message.
    pub const ERR: u32 = 2;
}

// ── Stdin channel ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdinRequest {
    pub max_len: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StdinResponse {
    /// One-way latch: once true, every later read reports it again.
    #[serde(default)]
    pub eof: bool,
}

// ── HTTP channel ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestHead {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Length of the request body in the binary segment.
    #[serde(default)]
    pub body_len: u64,
}

/// Response head for an HTTP exchange. The body follows as a chunk
/// stream through the channel's mailbox, each chunk acknowledged
/// before the next is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponseHead {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

// ── Storage channel ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    Exists,
    Stat,
    ReadDir,
    Read,
    Write,
    CreateDir,
    RemoveFile,
    RemoveDir,
    Rename,
    ScanTree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub op: StoreOp,
    #[serde(default)]
    pub path: String,
    /// Rename destination.
    #[serde(default)]
    pub to: Option<String>,
    /// Byte-range offset for read/write.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Byte-range length for read.
    #[serde(default)]
    pub len: Option<u64>,
    /// Recursive create_dir / remove_dir.
    #[serde(default)]
    pub recursive: bool,
    /// Length of write content in the binary segment.
    #[serde(default)]
    pub data_len: u64,
}

impl StoreRequest {
    pub fn new(op: StoreOp, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            to: None,
            offset: None,
            len: None,
            recursive: false,
            data_len: 0,
        }
    }
}

/// Metadata for one store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub is_dir: bool,
    pub size: u64,
    pub modified_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDirEntry {
    pub name: String,
    pub meta: StoreMeta,
}

/// One node of a recursive store scan, used to seed the guest's
/// directory-tree cache in a single round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanNode {
    Dir { children: BTreeMap<String, ScanNode> },
    File { size: u64, modified_ms: u64 },
    Symlink { target: String },
}

impl ScanNode {
    pub fn empty_dir() -> Self {
        Self::Dir {
            children: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreResponse {
    /// Error message when the control status word is `status::ERR`.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default)]
    pub meta: Option<StoreMeta>,
    #[serde(default)]
    pub entries: Option<Vec<StoreDirEntry>>,
    #[serde(default)]
    pub tree: Option<ScanNode>,
    /// File size after a write.
    #[serde(default)]
    pub size: Option<u64>,
    /// Length of read content in the binary segment.
    #[serde(default)]
    pub data_len: u64,
}

impl StoreResponse {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Self::default()
        }
    }
}
