//! Blocking storage facades.
//!
//! Content operations are one round trip on the storage channel.
//! Mutations are written through to the tree cache on success, so a
//! seeded cache stays consistent with the store without rescanning and
//! can answer the metadata queries (`exists`, `stat`, `read_dir`)
//! locally. Before the cache is seeded those fall back to a round
//! trip.

use std::time::{SystemTime, UNIX_EPOCH};

use hostbridge_channel::frame::{self, Frame};
use hostbridge_core::error::{BridgeError, BridgeResult};
use hostbridge_core::proto::{
    status, ScanNode, StoreDirEntry, StoreMeta, StoreOp, StoreRequest, StoreResponse,
};
use hostbridge_core::ChannelKind;

use crate::handle::BridgeHandle;
use crate::tree::TreeCache;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn missing(field: &str) -> BridgeError {
    BridgeError::ProtocolViolation {
        channel: ChannelKind::Storage,
        detail: format!("storage response missing {field}"),
    }
}

const ENOENT: &str = "No such file or directory";
const ENOTDIR: &str = "Not a directory";

fn meta_of(node: &ScanNode) -> StoreMeta {
    match node {
        ScanNode::Dir { .. } => StoreMeta {
            is_dir: true,
            size: 0,
            modified_ms: 0,
        },
        ScanNode::File { size, modified_ms } => StoreMeta {
            is_dir: false,
            size: *size,
            modified_ms: *modified_ms,
        },
        ScanNode::Symlink { .. } => StoreMeta {
            is_dir: false,
            size: 0,
            modified_ms: 0,
        },
    }
}

impl BridgeHandle {
    fn store_exchange(
        &self,
        head: StoreRequest,
        body: &[u8],
    ) -> BridgeResult<(StoreResponse, Vec<u8>)> {
        let ch = self.shared.channel(ChannelKind::Storage);
        let payload = frame::encode(ChannelKind::Storage, ch.capacity(), &head, body)?;
        let resp = self.exchange(ChannelKind::Storage, payload, self.config.io_timeout)?;

        if resp.status != status::OK {
            let message = Frame::parse(ChannelKind::Storage, &resp.payload)
                .and_then(|f| f.header::<StoreResponse>(ChannelKind::Storage))
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "unspecified storage failure".to_string());
            return Err(BridgeError::StorageOperationFailed(message));
        }

        let f = Frame::parse(ChannelKind::Storage, &resp.payload)?;
        let header: StoreResponse = f.header(ChannelKind::Storage)?;
        Ok((header, f.body().to_vec()))
    }

    /// Answered from the tree cache once it is seeded.
    pub fn exists(&self, path: &str) -> BridgeResult<bool> {
        if self.tree.is_seeded() {
            return Ok(self.tree.contains(path));
        }
        let (resp, _) = self.store_exchange(StoreRequest::new(StoreOp::Exists, path), &[])?;
        resp.exists.ok_or_else(|| missing("exists flag"))
    }

    /// Answered from the tree cache once it is seeded.
    pub fn stat(&self, path: &str) -> BridgeResult<StoreMeta> {
        if self.tree.is_seeded() {
            return match self.tree.lookup(path) {
                Some(node) => Ok(meta_of(&node)),
                None => Err(BridgeError::StorageOperationFailed(ENOENT.into())),
            };
        }
        let (resp, _) = self.store_exchange(StoreRequest::new(StoreOp::Stat, path), &[])?;
        resp.meta.ok_or_else(|| missing("metadata"))
    }

    /// Answered from the tree cache once it is seeded.
    pub fn read_dir(&self, path: &str) -> BridgeResult<Vec<StoreDirEntry>> {
        if self.tree.is_seeded() {
            return match self.tree.lookup(path) {
                Some(ScanNode::Dir { children }) => Ok(children
                    .into_iter()
                    .map(|(name, node)| StoreDirEntry {
                        name,
                        meta: meta_of(&node),
                    })
                    .collect()),
                Some(_) => Err(BridgeError::StorageOperationFailed(ENOTDIR.into())),
                None => Err(BridgeError::StorageOperationFailed(ENOENT.into())),
            };
        }
        let (resp, _) = self.store_exchange(StoreRequest::new(StoreOp::ReadDir, path), &[])?;
        resp.entries.ok_or_else(|| missing("entries"))
    }

    pub fn read_file(&self, path: &str) -> BridgeResult<Vec<u8>> {
        let (_, data) = self.store_exchange(StoreRequest::new(StoreOp::Read, path), &[])?;
        Ok(data)
    }

    pub fn read_file_range(
        &self,
        path: &str,
        offset: u64,
        len: Option<u64>,
    ) -> BridgeResult<Vec<u8>> {
        let mut head = StoreRequest::new(StoreOp::Read, path);
        head.offset = Some(offset);
        head.len = len;
        let (_, data) = self.store_exchange(head, &[])?;
        Ok(data)
    }

    /// Write (truncating) and return the file size. Creates missing
    /// parent directories.
    pub fn write_file(&self, path: &str, data: &[u8]) -> BridgeResult<u64> {
        let mut head = StoreRequest::new(StoreOp::Write, path);
        head.data_len = data.len() as u64;
        let (resp, _) = self.store_exchange(head, data)?;
        let size = resp.size.ok_or_else(|| missing("size"))?;
        self.tree.record_file(path, size, now_ms());
        Ok(size)
    }

    /// Write at an offset without truncating.
    pub fn write_file_at(&self, path: &str, offset: u64, data: &[u8]) -> BridgeResult<u64> {
        let mut head = StoreRequest::new(StoreOp::Write, path);
        head.offset = Some(offset);
        head.data_len = data.len() as u64;
        let (resp, _) = self.store_exchange(head, data)?;
        let size = resp.size.ok_or_else(|| missing("size"))?;
        self.tree.record_file(path, size, now_ms());
        Ok(size)
    }

    pub fn create_dir(&self, path: &str, recursive: bool) -> BridgeResult<()> {
        let mut head = StoreRequest::new(StoreOp::CreateDir, path);
        head.recursive = recursive;
        self.store_exchange(head, &[])?;
        self.tree.record_dir(path);
        Ok(())
    }

    pub fn remove_file(&self, path: &str) -> BridgeResult<()> {
        self.store_exchange(StoreRequest::new(StoreOp::RemoveFile, path), &[])?;
        self.tree.remove(path);
        Ok(())
    }

    pub fn remove_dir(&self, path: &str, recursive: bool) -> BridgeResult<()> {
        let mut head = StoreRequest::new(StoreOp::RemoveDir, path);
        head.recursive = recursive;
        self.store_exchange(head, &[])?;
        self.tree.remove(path);
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> BridgeResult<()> {
        let mut head = StoreRequest::new(StoreOp::Rename, from);
        head.to = Some(to.to_string());
        self.store_exchange(head, &[])?;
        self.tree.rename(from, to);
        Ok(())
    }

    /// Seed the tree cache with one full scan.
    pub fn sync_tree(&self) -> BridgeResult<ScanNode> {
        let (resp, _) = self.store_exchange(StoreRequest::new(StoreOp::ScanTree, ""), &[])?;
        let tree = resp.tree.ok_or_else(|| missing("tree"))?;
        self.tree.seed(tree.clone());
        Ok(tree)
    }

    pub fn tree(&self) -> &TreeCache {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_channel::SessionShared;
    use hostbridge_core::BridgeConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn ready_handle() -> (BridgeHandle, Arc<SessionShared>) {
        let config = BridgeConfig::new();
        let shared = SessionShared::new(&config);
        shared.mark_ready();
        let handle = BridgeHandle::attach_with(Arc::clone(&shared), config).unwrap();
        (handle, shared)
    }

    fn serve_once(shared: Arc<SessionShared>, status_word: u32, resp: StoreResponse) {
        std::thread::spawn(move || {
            let ch = shared.channel(ChannelKind::Storage);
            loop {
                if let Some(req) = ch.take_request() {
                    let payload =
                        frame::encode(ChannelKind::Storage, ch.capacity(), &resp, &[]).unwrap();
                    ch.complete(req.seq, status_word, payload);
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });
    }

    #[test]
    fn backend_failure_maps_to_storage_error() {
        let (handle, shared) = ready_handle();
        serve_once(
            shared,
            status::ERR,
            StoreResponse::failure("No such file or directory"),
        );
        match handle.read_file("missing.txt") {
            Err(BridgeError::StorageOperationFailed(msg)) => {
                assert_eq!(msg, "No such file or directory");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_response_field_is_a_violation() {
        let (handle, shared) = ready_handle();
        serve_once(shared, status::OK, StoreResponse::default());
        assert!(matches!(
            handle.stat("f"),
            Err(BridgeError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn successful_write_records_in_cache() {
        let (handle, shared) = ready_handle();
        handle.tree.seed(ScanNode::empty_dir());
        serve_once(
            shared,
            status::OK,
            StoreResponse {
                size: Some(3),
                ..StoreResponse::default()
            },
        );
        handle.write_file("a/b.txt", b"abc").unwrap();
        assert!(matches!(
            handle.tree().lookup("a/b.txt"),
            Some(ScanNode::File { size: 3, .. })
        ));
    }

    #[test]
    fn seeded_cache_answers_metadata_without_a_round_trip() {
        // No servicer on the channel: an answer can only come from the
        // cache. Keep the timeout short so a regression fails fast.
        let config = BridgeConfig::new().io_timeout(Duration::from_millis(300));
        let shared = SessionShared::new(&config);
        shared.mark_ready();
        let handle = BridgeHandle::attach_with(shared, config).unwrap();
        handle.tree.seed(ScanNode::empty_dir());
        handle.tree.record_file("a.txt", 5, 7);

        let meta = handle.stat("a.txt").unwrap();
        assert!(!meta.is_dir);
        assert_eq!(meta.size, 5);
        assert_eq!(meta.modified_ms, 7);

        assert!(handle.exists("a.txt").unwrap());
        assert!(!handle.exists("missing").unwrap());

        let entries = handle.read_dir("").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].meta.size, 5);
    }

    #[test]
    fn seeded_cache_misses_report_conventionally() {
        let config = BridgeConfig::new().io_timeout(Duration::from_millis(300));
        let shared = SessionShared::new(&config);
        shared.mark_ready();
        let handle = BridgeHandle::attach_with(shared, config).unwrap();
        handle.tree.seed(ScanNode::empty_dir());
        handle.tree.record_file("plain.txt", 1, 0);

        match handle.stat("missing") {
            Err(BridgeError::StorageOperationFailed(msg)) => {
                assert!(msg.contains("No such file"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        match handle.read_dir("plain.txt") {
            Err(BridgeError::StorageOperationFailed(msg)) => {
                assert!(msg.contains("Not a directory"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn failed_write_leaves_cache_untouched() {
        let (handle, shared) = ready_handle();
        handle.tree.seed(ScanNode::empty_dir());
        serve_once(shared, status::ERR, StoreResponse::failure("Is a directory"));
        assert!(handle.write_file("dir", b"x").is_err());
        assert!(!handle.tree().contains("dir"));
    }
}
