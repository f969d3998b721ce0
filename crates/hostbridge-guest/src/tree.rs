//! Guest-side directory-tree cache.
//!
//! Seeded by one full scan, then kept consistent by write-through
//! updates: every mutating storage call that succeeds applies the same
//! change here. Lookups answer from the cache without a round trip.
//!
//! An unseeded cache ignores updates and answers no lookups; callers
//! fall back to the storage channel.

use std::collections::BTreeMap;
use std::sync::Mutex;

use hostbridge_core::proto::ScanNode;

pub struct TreeCache {
    root: Mutex<Option<ScanNode>>,
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

fn children_of(node: &mut ScanNode) -> Option<&mut BTreeMap<String, ScanNode>> {
    match node {
        ScanNode::Dir { children } => Some(children),
        _ => None,
    }
}

/// Walk to the parent map of the last component, creating missing
/// intermediate directories.
fn parent_of<'a>(
    root: &'a mut ScanNode,
    parts: &[&str],
) -> Option<(&'a mut BTreeMap<String, ScanNode>, String)> {
    let (last, dirs) = parts.split_last()?;
    let mut node = root;
    for part in dirs {
        let children = children_of(node)?;
        node = children
            .entry((*part).to_string())
            .or_insert_with(ScanNode::empty_dir);
    }
    children_of(node).map(|c| (c, (*last).to_string()))
}

impl TreeCache {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(None),
        }
    }

    fn with_root<R>(&self, f: impl FnOnce(&mut Option<ScanNode>) -> R) -> R {
        let mut guard = match self.root.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn is_seeded(&self) -> bool {
        self.with_root(|r| r.is_some())
    }

    /// Replace the whole cache with a fresh scan.
    pub fn seed(&self, tree: ScanNode) {
        self.with_root(|r| *r = Some(tree));
    }

    /// A deep copy of the current cache contents.
    pub fn snapshot(&self) -> Option<ScanNode> {
        self.with_root(|r| r.clone())
    }

    /// Cached node at `path`, cloned. `None` when unseeded or absent.
    pub fn lookup(&self, path: &str) -> Option<ScanNode> {
        self.with_root(|r| {
            let mut node = r.as_ref()?;
            for part in split(path) {
                match node {
                    ScanNode::Dir { children } => node = children.get(part)?,
                    _ => return None,
                }
            }
            Some(node.clone())
        })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub(crate) fn record_file(&self, path: &str, size: u64, modified_ms: u64) {
        self.with_root(|r| {
            let Some(root) = r.as_mut() else { return };
            if let Some((children, name)) = parent_of(root, &split(path)) {
                children.insert(name, ScanNode::File { size, modified_ms });
            }
        });
    }

    pub(crate) fn record_dir(&self, path: &str) {
        self.with_root(|r| {
            let Some(root) = r.as_mut() else { return };
            if let Some((children, name)) = parent_of(root, &split(path)) {
                children
                    .entry(name)
                    .or_insert_with(ScanNode::empty_dir);
            }
        });
    }

    pub(crate) fn remove(&self, path: &str) {
        self.with_root(|r| {
            let Some(root) = r.as_mut() else { return };
            let parts = split(path);
            let Some((last, dirs)) = parts.split_last() else {
                return;
            };
            let mut node = root;
            for part in dirs {
                match node {
                    ScanNode::Dir { children } => match children.get_mut(*part) {
                        Some(next) => node = next,
                        None => return,
                    },
                    _ => return,
                }
            }
            if let ScanNode::Dir { children } = node {
                children.remove(*last);
            }
        });
    }

    pub(crate) fn rename(&self, from: &str, to: &str) {
        self.with_root(|r| {
            let Some(root) = r.as_mut() else { return };
            let from_parts = split(from);
            let node = {
                let Some((last, dirs)) = from_parts.split_last() else {
                    return;
                };
                let mut cursor = &mut *root;
                for part in dirs {
                    match cursor {
                        ScanNode::Dir { children } => match children.get_mut(*part) {
                            Some(next) => cursor = next,
                            None => return,
                        },
                        _ => return,
                    }
                }
                match cursor {
                    ScanNode::Dir { children } => match children.remove(*last) {
                        Some(n) => n,
                        None => return,
                    },
                    _ => return,
                }
            };
            if let Some((children, name)) = parent_of(root, &split(to)) {
                children.insert(name, node);
            }
        });
    }
}

impl Default for TreeCache {
    fn default() -> Self {
        Self::new()
    }
}
