//! Store backends.
//!
//! `MemStore` keeps the whole tree in memory and backs tests and the
//! smoke binary. `DirStore` maps store paths onto a sandboxed
//! directory with `std::fs`.
//!
//! Error messages use the conventional OS spellings ("No such file or
//! directory", "Is a directory") so the guest can surface them
//! unchanged.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use hostbridge_core::host::StoreBackend;
use hostbridge_core::proto::{ScanNode, StoreDirEntry, StoreMeta};

const ENOENT: &str = "No such file or directory";
const ENOTDIR: &str = "Not a directory";
const EISDIR: &str = "Is a directory";
const EEXIST: &str = "File exists";
const ENOTEMPTY: &str = "Directory not empty";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

// ── In-memory store ──

#[derive(Debug, Clone)]
enum MemNode {
    Dir(BTreeMap<String, MemNode>),
    File { data: Vec<u8>, modified_ms: u64 },
}

impl MemNode {
    fn meta(&self) -> StoreMeta {
        match self {
            MemNode::Dir(_) => StoreMeta {
                is_dir: true,
                size: 0,
                modified_ms: 0,
            },
            MemNode::File { data, modified_ms } => StoreMeta {
                is_dir: false,
                size: data.len() as u64,
                modified_ms: *modified_ms,
            },
        }
    }

    fn scan(&self) -> ScanNode {
        match self {
            MemNode::Dir(children) => ScanNode::Dir {
                children: children
                    .iter()
                    .map(|(name, node)| (name.clone(), node.scan()))
                    .collect(),
            },
            MemNode::File { data, modified_ms } => ScanNode::File {
                size: data.len() as u64,
                modified_ms: *modified_ms,
            },
        }
    }
}

/// In-memory hierarchical store. The default backend for tests and the
/// smoke binary; also the reference for the error spellings the guest
/// expects.
pub struct MemStore {
    root: Mutex<MemNode>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(MemNode::Dir(BTreeMap::new())),
        }
    }

    fn with_root<R>(&self, f: impl FnOnce(&mut MemNode) -> R) -> R {
        let mut guard = match self.root.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find<'a>(root: &'a MemNode, parts: &[&str]) -> Result<&'a MemNode, String> {
    let mut node = root;
    for part in parts {
        match node {
            MemNode::Dir(children) => {
                node = children.get(*part).ok_or(ENOENT)?;
            }
            MemNode::File { .. } => return Err(ENOTDIR.into()),
        }
    }
    Ok(node)
}

/// Walk to the parent of the last path component, creating missing
/// intermediate directories when `create` is set.
fn find_parent<'a>(
    root: &'a mut MemNode,
    parts: &[&str],
    create: bool,
) -> Result<(&'a mut BTreeMap<String, MemNode>, String), String> {
    let (last, dirs) = parts.split_last().ok_or(ENOENT)?;
    let mut node = root;
    for part in dirs {
        let children = match node {
            MemNode::Dir(children) => children,
            MemNode::File { .. } => return Err(ENOTDIR.into()),
        };
        if create && !children.contains_key(*part) {
            children.insert((*part).to_string(), MemNode::Dir(BTreeMap::new()));
        }
        node = children.get_mut(*part).ok_or(ENOENT)?;
    }
    match node {
        MemNode::Dir(children) => Ok((children, (*last).to_string())),
        MemNode::File { .. } => Err(ENOTDIR.into()),
    }
}

impl StoreBackend for MemStore {
    fn stat(&self, path: &str) -> Result<StoreMeta, String> {
        self.with_root(|root| find(root, &split(path)).map(MemNode::meta))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<StoreDirEntry>, String> {
        self.with_root(|root| match find(root, &split(path))? {
            MemNode::Dir(children) => Ok(children
                .iter()
                .map(|(name, node)| StoreDirEntry {
                    name: name.clone(),
                    meta: node.meta(),
                })
                .collect()),
            MemNode::File { .. } => Err(ENOTDIR.into()),
        })
    }

    fn read(&self, path: &str, offset: u64, len: Option<u64>) -> Result<Vec<u8>, String> {
        self.with_root(|root| match find(root, &split(path))? {
            MemNode::File { data, .. } => {
                let start = (offset as usize).min(data.len());
                let end = match len {
                    Some(l) => (start + l as usize).min(data.len()),
                    None => data.len(),
                };
                Ok(data[start..end].to_vec())
            }
            MemNode::Dir(_) => Err(EISDIR.into()),
        })
    }

    fn write(&self, path: &str, offset: Option<u64>, data: &[u8]) -> Result<u64, String> {
        self.with_root(|root| {
            let (children, name) = find_parent(root, &split(path), true)?;
            let node = children
                .entry(name)
                .or_insert_with(|| MemNode::File {
                    data: Vec::new(),
                    modified_ms: 0,
                });
            match node {
                MemNode::File {
                    data: existing,
                    modified_ms,
                } => {
                    match offset {
                        None => {
                            existing.clear();
                            existing.extend_from_slice(data);
                        }
                        Some(off) => {
                            let off = off as usize;
                            if existing.len() < off {
                                existing.resize(off, 0);
                            }
                            let end = off + data.len();
                            if existing.len() < end {
                                existing.resize(end, 0);
                            }
                            existing[off..end].copy_from_slice(data);
                        }
                    }
                    *modified_ms = now_ms();
                    Ok(existing.len() as u64)
                }
                MemNode::Dir(_) => Err(EISDIR.into()),
            }
        })
    }

    fn create_dir(&self, path: &str, recursive: bool) -> Result<(), String> {
        self.with_root(|root| {
            let parts = split(path);
            if parts.is_empty() {
                return Ok(());
            }
            let (children, name) = find_parent(root, &parts, recursive)?;
            match children.get(&name) {
                Some(MemNode::Dir(_)) if recursive => Ok(()),
                Some(_) => Err(EEXIST.into()),
                None => {
                    children.insert(name, MemNode::Dir(BTreeMap::new()));
                    Ok(())
                }
            }
        })
    }

    fn remove_file(&self, path: &str) -> Result<(), String> {
        self.with_root(|root| {
            let (children, name) = find_parent(root, &split(path), false)?;
            match children.get(&name) {
                Some(MemNode::File { .. }) => {
                    children.remove(&name);
                    Ok(())
                }
                Some(MemNode::Dir(_)) => Err(EISDIR.into()),
                None => Err(ENOENT.into()),
            }
        })
    }

    fn remove_dir(&self, path: &str, recursive: bool) -> Result<(), String> {
        self.with_root(|root| {
            let (children, name) = find_parent(root, &split(path), false)?;
            match children.get(&name) {
                Some(MemNode::Dir(entries)) => {
                    if !entries.is_empty() && !recursive {
                        return Err(ENOTEMPTY.into());
                    }
                    children.remove(&name);
                    Ok(())
                }
                Some(MemNode::File { .. }) => Err(ENOTDIR.into()),
                None => Err(ENOENT.into()),
            }
        })
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), String> {
        self.with_root(|root| {
            let node = {
                let (children, name) = find_parent(root, &split(from), false)?;
                children.remove(&name).ok_or(ENOENT)?
            };
            let (children, name) = match find_parent(root, &split(to), false) {
                Ok(dest) => dest,
                Err(e) => {
                    // Put the source back before reporting failure.
                    if let Ok((children, name)) = find_parent(root, &split(from), false) {
                        children.insert(name, node);
                    }
                    return Err(e);
                }
            };
            children.insert(name, node);
            Ok(())
        })
    }

    fn scan_tree(&self) -> Result<ScanNode, String> {
        self.with_root(|root| Ok(root.scan()))
    }
}

// ── Directory-backed store ──

/// Store backed by a directory on the local filesystem. Paths are
/// confined to the root: traversal components are rejected before any
/// filesystem call.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let rel = Path::new(path);
        let mut out = self.root.clone();
        for comp in rel.components() {
            match comp {
                Component::Normal(c) => out.push(c),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(format!("path escapes store root: {path}"));
                }
            }
        }
        Ok(out)
    }
}

fn fs_meta(meta: &std::fs::Metadata) -> StoreMeta {
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    StoreMeta {
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified_ms,
    }
}

fn scan_dir(path: &Path) -> Result<ScanNode, String> {
    let mut children = BTreeMap::new();
    let entries = std::fs::read_dir(path).map_err(|e| e.to_string())?;
    for entry in entries {
        let entry = entry.map_err(|e| e.to_string())?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| e.to_string())?;
        let node = if meta.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map_err(|e| e.to_string())?
                .to_string_lossy()
                .into_owned();
            ScanNode::Symlink { target }
        } else if meta.is_dir() {
            scan_dir(&entry.path())?
        } else {
            let fm = fs_meta(&meta);
            ScanNode::File {
                size: fm.size,
                modified_ms: fm.modified_ms,
            }
        };
        children.insert(name, node);
    }
    Ok(ScanNode::Dir { children })
}

impl StoreBackend for DirStore {
    fn stat(&self, path: &str) -> Result<StoreMeta, String> {
        let full = self.resolve(path)?;
        let meta = std::fs::metadata(&full).map_err(|e| e.to_string())?;
        Ok(fs_meta(&meta))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<StoreDirEntry>, String> {
        let full = self.resolve(path)?;
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&full).map_err(|e| e.to_string())?;
        for entry in entries {
            let entry = entry.map_err(|e| e.to_string())?;
            let meta = entry.metadata().map_err(|e| e.to_string())?;
            out.push(StoreDirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                meta: fs_meta(&meta),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn read(&self, path: &str, offset: u64, len: Option<u64>) -> Result<Vec<u8>, String> {
        use std::io::{Read, Seek, SeekFrom};
        let full = self.resolve(path)?;
        let mut file = std::fs::File::open(&full).map_err(|e| e.to_string())?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| e.to_string())?;
        let mut data = Vec::new();
        match len {
            Some(l) => {
                let mut limited = file.take(l);
                limited.read_to_end(&mut data).map_err(|e| e.to_string())?;
            }
            None => {
                file.read_to_end(&mut data).map_err(|e| e.to_string())?;
            }
        }
        Ok(data)
    }

    fn write(&self, path: &str, offset: Option<u64>, data: &[u8]) -> Result<u64, String> {
        use std::io::{Seek, SeekFrom, Write};
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true);
        if offset.is_none() {
            opts.truncate(true);
        }
        let mut file = opts.open(&full).map_err(|e| e.to_string())?;
        if let Some(off) = offset {
            file.seek(SeekFrom::Start(off)).map_err(|e| e.to_string())?;
        }
        file.write_all(data).map_err(|e| e.to_string())?;
        let meta = file.metadata().map_err(|e| e.to_string())?;
        Ok(meta.len())
    }

    fn create_dir(&self, path: &str, recursive: bool) -> Result<(), String> {
        let full = self.resolve(path)?;
        let result = if recursive {
            std::fs::create_dir_all(&full)
        } else {
            std::fs::create_dir(&full)
        };
        result.map_err(|e| e.to_string())
    }

    fn remove_file(&self, path: &str) -> Result<(), String> {
        let full = self.resolve(path)?;
        std::fs::remove_file(&full).map_err(|e| e.to_string())
    }

    fn remove_dir(&self, path: &str, recursive: bool) -> Result<(), String> {
        let full = self.resolve(path)?;
        let result = if recursive {
            std::fs::remove_dir_all(&full)
        } else {
            std::fs::remove_dir(&full)
        };
        result.map_err(|e| e.to_string())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), String> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        std::fs::rename(&from, &to).map_err(|e| e.to_string())
    }

    fn scan_tree(&self) -> Result<ScanNode, String> {
        scan_dir(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_write_creates_parents_and_reads_back() {
        let store = MemStore::new();
        let size = store.write("a/b/c.txt", None, b"hello").unwrap();
        assert_eq!(size, 5);

        assert_eq!(store.read("a/b/c.txt", 0, None).unwrap(), b"hello");
        assert!(store.stat("a/b").unwrap().is_dir);
        assert!(!store.stat("a/b/c.txt").unwrap().is_dir);
    }

    #[test]
    fn mem_offset_write_zero_fills_gap() {
        let store = MemStore::new();
        store.write("f", Some(3), b"xy").unwrap();
        assert_eq!(store.read("f", 0, None).unwrap(), &[0, 0, 0, b'x', b'y']);

        // Truncating write replaces everything.
        store.write("f", None, b"z").unwrap();
        assert_eq!(store.read("f", 0, None).unwrap(), b"z");
    }

    #[test]
    fn mem_ranged_read() {
        let store = MemStore::new();
        store.write("f", None, b"0123456789").unwrap();
        assert_eq!(store.read("f", 2, Some(3)).unwrap(), b"234");
        assert_eq!(store.read("f", 8, Some(100)).unwrap(), b"89");
        assert_eq!(store.read("f", 100, None).unwrap(), b"");
    }

    #[test]
    fn mem_missing_paths_report_enoent() {
        let store = MemStore::new();
        assert_eq!(store.stat("nope").unwrap_err(), ENOENT);
        assert_eq!(store.read("nope", 0, None).unwrap_err(), ENOENT);
        assert!(!store.exists("nope").unwrap());
    }

    #[test]
    fn mem_remove_dir_honors_recursive_flag() {
        let store = MemStore::new();
        store.write("d/inner.txt", None, b"x").unwrap();
        assert_eq!(store.remove_dir("d", false).unwrap_err(), ENOTEMPTY);
        store.remove_dir("d", true).unwrap();
        assert!(!store.exists("d").unwrap());
    }

    #[test]
    fn mem_rename_moves_subtree() {
        let store = MemStore::new();
        store.write("src/file.txt", None, b"data").unwrap();
        store.create_dir("dst", false).unwrap();
        store.rename("src", "dst/moved").unwrap();
        assert!(!store.exists("src").unwrap());
        assert_eq!(store.read("dst/moved/file.txt", 0, None).unwrap(), b"data");
    }

    #[test]
    fn mem_scan_tree_mirrors_contents() {
        let store = MemStore::new();
        store.write("a/one.txt", None, b"1").unwrap();
        store.write("two.bin", None, &[0xFF, 0x00]).unwrap();

        let tree = store.scan_tree().unwrap();
        let ScanNode::Dir { children } = tree else {
            panic!("root must be a dir");
        };
        assert!(matches!(children.get("a"), Some(ScanNode::Dir { .. })));
        assert!(matches!(
            children.get("two.bin"),
            Some(ScanNode::File { size: 2, .. })
        ));
    }

    #[test]
    fn dir_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::new(tmp.path());

        store.write("sub/file.bin", None, &[1, 2, 3]).unwrap();
        assert_eq!(store.read("sub/file.bin", 1, None).unwrap(), &[2, 3]);

        let entries = store.read_dir("sub").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "file.bin");
        assert_eq!(entries[0].meta.size, 3);

        store.rename("sub/file.bin", "sub/renamed.bin").unwrap();
        assert!(store.exists("sub/renamed.bin").unwrap());
        store.remove_dir("sub", true).unwrap();
        assert!(!store.exists("sub").unwrap());
    }

    #[test]
    fn dir_store_rejects_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::new(tmp.path());
        assert!(store.read("../outside", 0, None).is_err());
        assert!(store.write("a/../../outside", None, b"x").is_err());
    }

    #[test]
    fn dir_store_scan_includes_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::new(tmp.path());
        store.write("x/y/z.txt", None, b"abc").unwrap();

        let ScanNode::Dir { children } = store.scan_tree().unwrap() else {
            panic!("root must be a dir");
        };
        let Some(ScanNode::Dir { children: x }) = children.get("x") else {
            panic!("x must be a dir");
        };
        assert!(matches!(x.get("y"), Some(ScanNode::Dir { .. })));
    }
}
