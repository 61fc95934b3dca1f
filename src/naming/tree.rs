//! The naming server's in-memory directory tree.
//!
//! [`Tree`] owns the hierarchy; [`PathNode`] is one directory or file in it,
//! carrying its own lock state (consumed by [`crate::naming::lock`]) inline
//! rather than in a side table, since every lock decision needs exactly the
//! node the path-chain walk is already visiting.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::path::Path;

/// A queued lock request: whether it wants exclusive access, and the
/// one-shot sender that wakes the requester once granted.
pub struct LockRequest {
    pub exclusive: bool,
    pub waker: oneshot::Sender<()>,
}

/// Per-node reader/writer lock bookkeeping. See
/// [`crate::naming::lock`] for the algorithm that drives these fields.
#[derive(Default)]
pub struct LockState {
    /// `-1` held exclusive, `0` free, `n > 0` shared readers.
    pub readers: i32,
    pub waiters: VecDeque<LockRequest>,
    /// Shared releases at this node since the last replication trigger.
    pub read_count: u32,
}

impl LockState {
    fn new() -> Self {
        LockState { readers: 0, waiters: VecDeque::new(), read_count: 0 }
    }
}

/// One node of the naming tree.
pub struct PathNode {
    pub path: Path,
    pub is_directory: bool,
    pub lock_state: LockState,
    children: HashMap<String, PathNode>,
}

impl PathNode {
    fn new(path: Path, is_directory: bool) -> Self {
        PathNode { path, is_directory, lock_state: LockState::new(), children: HashMap::new() }
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PathNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathNode")
            .field("path", &self.path)
            .field("is_directory", &self.is_directory)
            .field("children", &self.children)
            .finish()
    }
}

impl PartialEq for PathNode {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.is_directory == other.is_directory
            && self.children == other.children
    }
}

/// Failure of a tree walk: the requested path is not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound;

/// The naming server's directory tree, rooted at `/`.
pub struct Tree {
    root: PathNode,
}

impl Default for Tree {
    fn default() -> Self {
        Tree { root: PathNode::new(Path::root(), true) }
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &PathNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut PathNode {
        &mut self.root
    }

    /// Walks `path` from the root, failing at the first missing component.
    pub fn lookup(&self, path: &Path) -> Result<&PathNode, NotFound> {
        let mut node = &self.root;
        for component in path.components() {
            node = node.children.get(component).ok_or(NotFound)?;
        }
        Ok(node)
    }

    pub fn lookup_mut(&mut self, path: &Path) -> Result<&mut PathNode, NotFound> {
        let mut node = &mut self.root;
        for component in path.components() {
            node = node.children.get_mut(component).ok_or(NotFound)?;
        }
        Ok(node)
    }

    /// Returns every node along the path from (and including) the root to
    /// (and including) `path`, in root-to-leaf order.
    pub fn lookup_chain(&self, path: &Path) -> Result<Vec<&PathNode>, NotFound> {
        let mut chain = vec![&self.root];
        let mut node = &self.root;
        for component in path.components() {
            node = node.children.get(component).ok_or(NotFound)?;
            chain.push(node);
        }
        Ok(chain)
    }

    pub fn lookup_chain_mut(&mut self, path: &Path) -> Result<Vec<&mut PathNode>, NotFound> {
        let mut chain: Vec<&mut PathNode> = vec![&mut self.root];
        for component in path.components() {
            // SAFETY: each iteration borrows only the node just pushed, and
            // that node is never accessed again through `chain` while this
            // raw pointer is alive, so the resulting `&mut` is exclusive.
            let current: *mut PathNode = *chain.last_mut().unwrap();
            let next = unsafe { (*current).children.get_mut(component).ok_or(NotFound)? };
            chain.push(next);
        }
        Ok(chain)
    }

    /// Idempotent insert of a file leaf, creating intermediate directories
    /// as needed. Returns `true` iff a new leaf was created.
    pub fn add_file(&mut self, path: &Path) -> Result<bool, NotFound> {
        self.add(path, false)
    }

    /// Idempotent insert of a directory node, creating intermediates.
    pub fn add_directory(&mut self, path: &Path) -> Result<bool, NotFound> {
        self.add(path, true)
    }

    fn add(&mut self, path: &Path, terminal_is_directory: bool) -> Result<bool, NotFound> {
        if path.is_root() {
            return Ok(false);
        }
        let mut node = &mut self.root;
        let components = path.components();
        for component in &components[..components.len() - 1] {
            let child_path = node_path(node, component);
            node = node
                .children
                .entry(component.clone())
                .or_insert_with(|| PathNode::new(child_path, true));
        }
        let last = &components[components.len() - 1];
        if node.children.contains_key(last) {
            return Ok(false);
        }
        let child_path = node_path(node, last);
        node.children.insert(last.clone(), PathNode::new(child_path, terminal_is_directory));
        Ok(true)
    }

    /// Removes the subtree rooted at `path` from its parent's children.
    /// Returns `true` iff something was removed.
    pub fn remove(&mut self, path: &Path) -> bool {
        if path.is_root() {
            return false;
        }
        let parent_path = path.parent().expect("non-root path has a parent");
        let Ok(parent) = self.lookup_mut(&parent_path) else {
            return false;
        };
        parent.children.remove(path.last().expect("non-root path has a last component")).is_some()
    }

    /// Every file leaf under the directory at `path`, in no particular
    /// order.
    pub fn enumerate_files(&self, path: &Path) -> Result<Vec<Path>, NotFound> {
        let node = self.lookup(path)?;
        let mut out = Vec::new();
        collect_files(node, &mut out);
        Ok(out)
    }
}

fn node_path(parent: &PathNode, component: &str) -> Path {
    parent.path.join(component)
}

fn collect_files(node: &PathNode, out: &mut Vec<Path>) {
    if node.is_directory {
        for child in node.children.values() {
            collect_files(child, out);
        }
    } else {
        out.push(node.path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_creates_intermediate_directories() {
        let mut tree = Tree::new();
        assert!(tree.add_file(&Path::parse("/a/b/c")).unwrap());
        assert!(tree.lookup(&Path::parse("/a")).unwrap().is_directory);
        assert!(tree.lookup(&Path::parse("/a/b")).unwrap().is_directory);
        assert!(!tree.lookup(&Path::parse("/a/b/c")).unwrap().is_directory);
    }

    #[test]
    fn add_file_is_idempotent() {
        let mut tree = Tree::new();
        assert!(tree.add_file(&Path::parse("/a")).unwrap());
        assert!(!tree.add_file(&Path::parse("/a")).unwrap());
    }

    #[test]
    fn add_under_missing_parent_directory_still_creates_it() {
        let mut tree = Tree::new();
        assert!(tree.add_file(&Path::parse("/e/f")).unwrap());
        assert!(tree.lookup(&Path::parse("/e")).unwrap().is_directory);
    }

    #[test]
    fn lookup_fails_not_found_for_missing_path() {
        let tree = Tree::new();
        assert_eq!(tree.lookup(&Path::parse("/missing")), Err(NotFound));
    }

    #[test]
    fn remove_drops_the_whole_subtree() {
        let mut tree = Tree::new();
        tree.add_file(&Path::parse("/a/b")).unwrap();
        assert!(tree.remove(&Path::parse("/a")));
        assert_eq!(tree.lookup(&Path::parse("/a")), Err(NotFound));
        assert_eq!(tree.lookup(&Path::parse("/a/b")), Err(NotFound));
    }

    #[test]
    fn root_is_never_removed() {
        let mut tree = Tree::new();
        assert!(!tree.remove(&Path::root()));
    }

    #[test]
    fn enumerate_files_lists_only_leaves() {
        let mut tree = Tree::new();
        tree.add_file(&Path::parse("/a")).unwrap();
        tree.add_file(&Path::parse("/b/c")).unwrap();
        tree.add_directory(&Path::parse("/b/empty")).unwrap();

        let mut files = tree.enumerate_files(&Path::root()).unwrap();
        files.sort_by_key(|p| p.to_string());
        assert_eq!(files, vec![Path::parse("/a"), Path::parse("/b/c")]);
    }

    #[test]
    fn lookup_chain_returns_root_to_leaf_order() {
        let mut tree = Tree::new();
        tree.add_file(&Path::parse("/a/b")).unwrap();
        let chain = tree.lookup_chain(&Path::parse("/a/b")).unwrap();
        let paths: Vec<String> = chain.iter().map(|n| n.path.to_string()).collect();
        assert_eq!(paths, vec!["/".to_string(), "/a".to_string(), "/a/b".to_string()]);
    }
}
