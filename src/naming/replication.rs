//! Tracks which storage servers hold a copy of each registered file.

use std::net::SocketAddr;

use whirlwind::ShardMap;

use crate::path::Path;

/// `path → storage servers holding that file`. Every registered file has at
/// least one entry; the map itself is the source of truth for
/// `getStorage`.
pub struct Replicas {
    holders: ShardMap<Path, Vec<SocketAddr>>,
}

impl Default for Replicas {
    fn default() -> Self {
        Self::new()
    }
}

impl Replicas {
    pub fn new() -> Self {
        Self {
            holders: ShardMap::new(),
        }
    }

    /// Records `client` as the sole replica of a newly created file.
    pub async fn set_sole(&self, path: Path, client: SocketAddr) {
        self.holders.insert(path, vec![client]).await;
    }

    pub async fn get(&self, path: &Path) -> Option<Vec<SocketAddr>> {
        self.holders.get(path).await.map(|v| v.clone())
    }

    pub async fn any(&self, path: &Path) -> Option<SocketAddr> {
        self.holders.get(path).await.and_then(|v| v.first().copied())
    }

    /// Adds `client` to `path`'s replica set, after a successful copy.
    pub async fn add(&self, path: &Path, client: SocketAddr) {
        if let Some(mut holders) = self.holders.get_mut(path).await {
            if !holders.contains(&client) {
                holders.push(client);
            }
        }
    }

    /// Reduces `path`'s replica set to `{keep}`, returning the addresses
    /// that were dropped so the caller can issue remote deletes.
    pub async fn collapse_to(&self, path: &Path, keep: SocketAddr) -> Vec<SocketAddr> {
        let Some(mut holders) = self.holders.get_mut(path).await else {
            return Vec::new();
        };
        let dropped: Vec<SocketAddr> = holders.iter().copied().filter(|a| *a != keep).collect();
        *holders = vec![keep];
        dropped
    }

    /// Removes `path` entirely, returning every server that held it.
    pub async fn remove(&self, path: &Path) -> Vec<SocketAddr> {
        self.holders.remove(path).await.unwrap_or_default()
    }
}
