//! Writer-preference, path-chain readers-writer lock manager.
//!
//! Every decision (grant immediately vs. enqueue) is made while holding the
//! tree's mutex; waiting for a grant happens afterwards, against a
//! [`oneshot::Receiver`] handed out while the mutex was held. This keeps the
//! mutex's critical sections synchronous and short, and matches the
//! invariant that the held locks along any in-flight chain always form a
//! root-to-target prefix: every acquisition walks the same chain in the same
//! order, so no two chains can deadlock on each other.

use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::RpcError;
use crate::path::Path;

use super::tree::{LockRequest, PathNode, Tree};

/// Shared releases at a leaf before it is offered to the naming service as
/// a candidate for an additional replica.
pub const REPLICATION_THRESHOLD: u32 = 20;

/// A side effect of releasing the target node of an unlock, to be acted on
/// by the naming service outside the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `readCount` crossed [`REPLICATION_THRESHOLD`]; the caller may copy
    /// the file to an additional storage server.
    Replicate,
    /// An exclusive hold on the file was just released; the caller should
    /// reduce the file's replica set to a single copy.
    Collapse,
}

pub struct LockManager {
    tree: Mutex<Tree>,
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager { tree: Mutex::new(Tree::new()) }
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the tree under the manager's mutex. Structural
    /// operations (`createFile`, `delete`, ...) go through this rather than
    /// their own lock, so that a concurrent `lock`/`unlock` never observes a
    /// half-mutated tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.tree.lock().expect("lock manager mutex poisoned"))
    }

    pub fn with_tree_mut<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.tree.lock().expect("lock manager mutex poisoned"))
    }

    /// Acquires a shared lock on every ancestor of `path` and a lock on
    /// `path` itself (exclusive iff `exclusive`).
    pub async fn lock(&self, path: &Path, exclusive: bool) -> Result<(), RpcError> {
        let receivers = {
            let mut tree = self.tree.lock().expect("lock manager mutex poisoned");
            let chain = tree
                .lookup_chain_mut(path)
                .map_err(|_| RpcError::not_found(format!("{path} does not exist")))?;
            let target = chain.len() - 1;
            chain
                .into_iter()
                .enumerate()
                .map(|(i, node)| request_node(node, exclusive && i == target))
                .collect::<Vec<_>>()
        };
        for receiver in receivers.into_iter().flatten() {
            receiver.await.map_err(|_| RpcError::fatal("lock grant channel dropped"))?;
        }
        Ok(())
    }

    /// Releases the chain acquired by a matching [`LockManager::lock`] call.
    /// Returns an [`Event`] if releasing the target node (not an ancestor)
    /// triggers a replication or collapse candidacy.
    pub async fn unlock(&self, path: &Path, exclusive: bool) -> Result<Option<Event>, RpcError> {
        let mut tree = self.tree.lock().expect("lock manager mutex poisoned");
        let chain = tree
            .lookup_chain_mut(path)
            .map_err(|_| RpcError::invalid_argument(format!("{path} does not exist")))?;
        let target = chain.len() - 1;
        let mut event = None;
        for (i, node) in chain.into_iter().enumerate() {
            let is_target = i == target;
            let released = release_node(node, exclusive && is_target, is_target);
            if is_target {
                event = released;
            }
        }
        Ok(event)
    }
}

/// Decides whether `node` can be granted `exclusive` immediately. If so,
/// updates its reader count and returns `None`. Otherwise enqueues a waiter
/// and returns its grant receiver.
fn request_node(node: &mut PathNode, exclusive: bool) -> Option<oneshot::Receiver<()>> {
    let state = &mut node.lock_state;
    // `servicePending` only ever stops at a head it cannot grant, so a
    // non-empty queue always means the head is blocked by a writer (either
    // queued or currently holding the node exclusively); an empty queue is
    // therefore equivalent to "no writer is waiting".
    let grantable = if exclusive {
        state.readers == 0 && state.waiters.is_empty()
    } else {
        state.readers != -1 && state.waiters.is_empty()
    };
    if grantable {
        state.readers = if exclusive { -1 } else { state.readers + 1 };
        None
    } else {
        let (waker, receiver) = oneshot::channel();
        state.waiters.push_back(LockRequest { exclusive, waker });
        Some(receiver)
    }
}

/// Releases one held lock on `node` and runs `servicePending`. When `track`
/// is set (the node is the unlock's target, not an ancestor) and the node is
/// a file, reports a replication/collapse candidacy.
fn release_node(node: &mut PathNode, exclusive: bool, track: bool) -> Option<Event> {
    let is_file = !node.is_directory;
    let state = &mut node.lock_state;
    let mut event = None;
    if exclusive {
        state.readers = 0;
        if track && is_file {
            event = Some(Event::Collapse);
        }
    } else {
        state.readers -= 1;
        if track && is_file {
            state.read_count += 1;
            if state.read_count >= REPLICATION_THRESHOLD {
                state.read_count = 0;
                event = Some(Event::Replicate);
            }
        }
    }
    if state.readers == 0 {
        service_pending(node);
    }
    event
}

/// Grants as many queued requests as the current state allows, stopping at
/// the first head that cannot yet be granted.
fn service_pending(node: &mut PathNode) {
    loop {
        let state = &mut node.lock_state;
        let grant_exclusive = match state.waiters.front() {
            Some(req) if req.exclusive && state.readers == 0 => true,
            Some(req) if !req.exclusive && state.readers != -1 => false,
            _ => return,
        };
        let request = state.waiters.pop_front().expect("front() just matched Some");
        state.readers = if grant_exclusive { -1 } else { state.readers + 1 };
        let _ = request.waker.send(());
        if grant_exclusive {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(manager: &LockManager, path: &str) {
        manager.with_tree_mut(|tree| tree.add_file(&Path::parse(path)).unwrap());
    }

    #[tokio::test]
    async fn shared_locks_on_the_same_node_are_concurrent() {
        let manager = LockManager::new();
        seed(&manager, "/a");
        manager.lock(&Path::parse("/a"), false).await.unwrap();
        manager.lock(&Path::parse("/a"), false).await.unwrap();
        manager.with_tree(|tree| assert_eq!(tree.lookup(&Path::parse("/a")).unwrap().lock_state.readers, 2));
    }

    #[tokio::test]
    async fn exclusive_lock_blocks_until_released() {
        let manager = std::sync::Arc::new(LockManager::new());
        seed(&manager, "/a");
        manager.lock(&Path::parse("/a"), true).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.lock(&Path::parse("/a"), true).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        manager.unlock(&Path::parse("/a"), true).await.unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ancestors_are_locked_shared_regardless_of_target_mode() {
        let manager = LockManager::new();
        seed(&manager, "/a/b");
        manager.lock(&Path::parse("/a/b"), true).await.unwrap();
        manager.with_tree(|tree| {
            assert_eq!(tree.lookup(&Path::parse("/a")).unwrap().lock_state.readers, 1);
            assert_eq!(tree.lookup(&Path::parse("/a/b")).unwrap().lock_state.readers, -1);
        });
    }

    #[tokio::test]
    async fn writer_preference_blocks_new_readers_behind_a_waiting_writer() {
        let manager = std::sync::Arc::new(LockManager::new());
        seed(&manager, "/a");
        manager.lock(&Path::parse("/a"), false).await.unwrap();

        let writer = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.lock(&Path::parse("/a"), true).await })
        };
        tokio::task::yield_now().await;

        let reader = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.lock(&Path::parse("/a"), false).await })
        };
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        manager.unlock(&Path::parse("/a"), false).await.unwrap();
        writer.await.unwrap().unwrap();
        manager.unlock(&Path::parse("/a"), true).await.unwrap();
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn replication_candidate_after_threshold_shared_releases() {
        let manager = LockManager::new();
        seed(&manager, "/a");
        for _ in 0..REPLICATION_THRESHOLD - 1 {
            manager.lock(&Path::parse("/a"), false).await.unwrap();
            assert_eq!(manager.unlock(&Path::parse("/a"), false).await.unwrap(), None);
        }
        manager.lock(&Path::parse("/a"), false).await.unwrap();
        assert_eq!(manager.unlock(&Path::parse("/a"), false).await.unwrap(), Some(Event::Replicate));
    }

    #[tokio::test]
    async fn collapse_candidate_after_exclusive_release() {
        let manager = LockManager::new();
        seed(&manager, "/a");
        manager.lock(&Path::parse("/a"), true).await.unwrap();
        assert_eq!(manager.unlock(&Path::parse("/a"), true).await.unwrap(), Some(Event::Collapse));
    }

    #[tokio::test]
    async fn directories_never_produce_replication_events() {
        let manager = LockManager::new();
        manager.with_tree_mut(|tree| tree.add_directory(&Path::parse("/d")).unwrap());
        for _ in 0..REPLICATION_THRESHOLD + 1 {
            manager.lock(&Path::parse("/d"), false).await.unwrap();
            assert_eq!(manager.unlock(&Path::parse("/d"), false).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn locking_a_missing_path_fails_not_found() {
        let manager = LockManager::new();
        let err = manager.lock(&Path::parse("/missing"), false).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }
}
