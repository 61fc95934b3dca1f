//! Local on-disk state backing one storage server's `Storage` and `Command`
//! endpoints.

use std::io::SeekFrom;
use std::path::{Path as FsPath, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::error::RpcError;
use crate::path::{self, Path};

/// Root-relative file storage. Every [`Path`] is mapped onto a real file
/// under `root` via [`path::relative_to`].
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: PathBuf) -> Self {
        Store { root }
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    fn local_path(&self, p: &Path) -> PathBuf {
        path::relative_to(&self.root, p)
    }

    #[instrument(skip(self))]
    pub async fn size(&self, p: &Path) -> Result<u64, RpcError> {
        let metadata = tokio::fs::metadata(self.local_path(p)).await.map_err(|e| map_missing(e, p))?;
        Ok(metadata.len())
    }

    #[instrument(skip(self))]
    pub async fn read(&self, p: &Path, offset: i64, length: i32) -> Result<Vec<u8>, RpcError> {
        if offset < 0 || length < 0 {
            return Err(RpcError::out_of_bounds(format!("read({p}, {offset}, {length})")));
        }
        let mut file = tokio::fs::File::open(self.local_path(p)).await.map_err(|e| map_missing(e, p))?;
        let len = file.metadata().await?.len();
        let offset = offset as u64;
        if offset > len || offset + length as u64 > len {
            return Err(RpcError::out_of_bounds(format!(
                "read({p}, {offset}, {length}) exceeds size {len}"
            )));
        }
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Overwrites `data` starting at `offset`, extending the file and
    /// zero-filling any gap between the previous end-of-file and `offset`.
    #[instrument(skip(self, data))]
    pub async fn write(&self, p: &Path, offset: i64, data: &[u8]) -> Result<(), RpcError> {
        if offset < 0 {
            return Err(RpcError::out_of_bounds(format!("write({p}, {offset}, ..)")));
        }
        let local = self.local_path(p);
        let mut file =
            OpenOptions::new().write(true).open(&local).await.map_err(|e| map_missing(e, p))?;
        let len = file.metadata().await?.len();
        let offset = offset as u64;
        if offset > len {
            file.set_len(offset).await?;
        }
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    /// Creates an empty file (and missing parent directories). Returns
    /// `false` if the file already existed.
    #[instrument(skip(self))]
    pub async fn create(&self, p: &Path) -> Result<bool, RpcError> {
        let local = self.local_path(p);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&local).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the local file, pruning now-empty parent directories up to
    /// (not including) `root`. Returns `false` if nothing was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, p: &Path) -> Result<bool, RpcError> {
        let local = self.local_path(p);
        match tokio::fs::remove_file(&local).await {
            Ok(()) => {
                prune_empty_ancestors(&self.root, local.parent()).await;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn map_missing(err: std::io::Error, p: &Path) -> RpcError {
    if err.kind() == std::io::ErrorKind::NotFound {
        RpcError::not_found(format!("{p} does not exist"))
    } else {
        err.into()
    }
}

async fn prune_empty_ancestors(root: &FsPath, dir: Option<&FsPath>) {
    let mut dir = dir;
    while let Some(d) = dir {
        if d == root {
            return;
        }
        let Ok(mut entries) = tokio::fs::read_dir(d).await else { return };
        if entries.next_entry().await.ok().flatten().is_some() {
            return;
        }
        if tokio::fs::remove_dir(d).await.is_err() {
            return;
        }
        dir = d.parent();
    }
}
