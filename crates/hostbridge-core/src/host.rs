//! Host-capability traits serviced by the controller.
//!
//! The mechanics behind these traits (browser storage drivers, network
//! stacks, terminal surfaces) are collaborators, not part of the
//! bridge; only their synchronization is. Implementations must be
//! callable from the controller's service thread.
//!
//! # Implementors
//!
//! - `MemStore` (default for tests/smoke): in-memory node tree.
//! - `DirStore`: `std::fs` under a sandboxed root.
//! - `UreqHttp`: blocking `ureq` client with relay rewriting.
//! - `StderrSink` / `VecSink`: display output surfaces.

use std::io::Read;

use crate::proto::{ScanNode, StoreDirEntry, StoreMeta};

/// Persistent hierarchical store operations.
///
/// Errors are plain messages; the bridge wraps them in
/// `StorageOperationFailed` and the guest renders them as conventional
/// "No such file or directory" style failures. Implementations should
/// use those conventional spellings.
pub trait StoreBackend: Send {
    fn stat(&self, path: &str) -> Result<StoreMeta, String>;
    fn read_dir(&self, path: &str) -> Result<Vec<StoreDirEntry>, String>;
    /// Read `len` bytes (or to end-of-file when `None`) from `offset`.
    fn read(&self, path: &str, offset: u64, len: Option<u64>) -> Result<Vec<u8>, String>;
    /// Write `data` at `offset`, creating the file and any missing
    /// parent directories; `None` truncates and writes from the start.
    /// Returns the file size after the write.
    fn write(&self, path: &str, offset: Option<u64>, data: &[u8]) -> Result<u64, String>;
    fn create_dir(&self, path: &str, recursive: bool) -> Result<(), String>;
    fn remove_file(&self, path: &str) -> Result<(), String>;
    fn remove_dir(&self, path: &str, recursive: bool) -> Result<(), String>;
    fn rename(&self, from: &str, to: &str) -> Result<(), String>;
    /// Full recursive scan from the root, for seeding the tree cache.
    fn scan_tree(&self) -> Result<ScanNode, String>;

    fn exists(&self, path: &str) -> Result<bool, String> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

/// A materialized HTTP response: head up front, body as a reader the
/// controller streams chunk-by-chunk through the channel mailbox.
pub struct HttpExchange {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

/// Performs the real network call on behalf of the guest.
///
/// Transport-level failure is an `Err`; the controller synthesizes a
/// well-formed bad-gateway response from it rather than leaking a raw
/// error into the channel. Non-2xx statuses are ordinary `Ok` results.
pub trait HttpBackend: Send {
    fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<HttpExchange, String>;
}

/// Where coalesced display output lands. `write` receives whole
/// batches on the controller's flush cadence, not individual guest
/// writes.
pub trait DisplaySink: Send {
    fn write(&mut self, batch: &[u8]);
}

/// Display sink for headless use: batches append to a buffer.
#[derive(Debug, Default)]
pub struct VecSink {
    pub batches: Vec<Vec<u8>>,
}

impl DisplaySink for VecSink {
    fn write(&mut self, batch: &[u8]) {
        self.batches.push(batch.to_vec());
    }
}

/// Display sink that forwards batches to stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DisplaySink for StderrSink {
    fn write(&mut self, batch: &[u8]) {
        use std::io::Write;
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = handle.write_all(batch);
        let _ = handle.flush();
    }
}
