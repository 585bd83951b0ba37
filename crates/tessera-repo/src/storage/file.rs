//! CAR file-backed block storage

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use cid::Cid as IpldCid;
use tessera_common::types::cid::cbor_cid;
use tokio::sync::Mutex;

use crate::block::BlockMap;
use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use crate::storage::BlockStore;

#[derive(Debug, Default)]
struct FileState {
    blocks: BlockMap,
    root: Option<IpldCid>,
    dirty: bool,
}

/// CAR file-backed block storage
///
/// Keeps the whole repository in memory and mirrors it to a single CAR file
/// whose root is the current commit. Commits are written to a sibling temp
/// file and renamed into place, so the file on disk always holds either the
/// old or the new commit.
///
/// Blocks put outside a commit are written on the next [`flush`](Self::flush)
/// or commit. A store with no root has nothing to write yet.
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    path: PathBuf,
    state: Arc<Mutex<FileState>>,
}

impl FileBlockStore {
    /// Load from an existing CAR file, verifying every block
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let parsed = crate::car::read_car(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(FileState {
                blocks: parsed.blocks,
                root: Some(parsed.root),
                dirty: false,
            })),
        })
    }

    /// Empty storage that will write to `path`
    ///
    /// The file is not created until the first commit or flush.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(FileState::default())),
        }
    }

    /// Load `path` if it exists, otherwise start empty
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if tokio::fs::try_exists(&path).await.map_err(RepoError::io)? {
            Self::load(path).await
        } else {
            Ok(Self::new(path))
        }
    }

    /// Write pending blocks if there are any and a root exists
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let Some(root) = state.root else {
            return Ok(());
        };
        write_atomically(&self.path, root, &state.blocks).await?;
        state.dirty = false;
        Ok(())
    }

    /// Check if store has unflushed changes
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Get the path to the CAR file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn write_atomically(path: &Path, root: IpldCid, blocks: &BlockMap) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let entries: Vec<(IpldCid, Bytes)> = blocks.iter().map(|(cid, bytes)| (*cid, bytes.clone())).collect();
    crate::car::write_car(&tmp, vec![root], entries).await?;
    tokio::fs::rename(&tmp, path).await.map_err(RepoError::io)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(path = %path.display(), %root, blocks = blocks.len(), "wrote repository CAR");

    Ok(())
}

impl BlockStore for FileBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.state.lock().await.blocks.get(cid).cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = cbor_cid(data);
        let mut state = self.state.lock().await;
        state.blocks.set(cid, Bytes::copy_from_slice(data));
        state.dirty = true;
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.state.lock().await.blocks.has(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for (cid, data) in blocks {
            state.blocks.set(cid, data);
        }
        state.dirty = true;
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<(BlockMap, Vec<IpldCid>)> {
        Ok(self.state.lock().await.blocks.get_many(cids))
    }

    async fn get_root(&self) -> Result<Option<IpldCid>> {
        Ok(self.state.lock().await.root)
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        let mut state = self.state.lock().await;

        let mut next = state.blocks.clone();
        next.subtract(&commit.removed_cids);
        next.add_map(&commit.new_blocks);

        // Disk first: if the write fails the in-memory state is untouched too
        write_atomically(&self.path, commit.cid, &next).await?;

        state.blocks = next;
        state.root = Some(commit.cid);
        state.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::CidSet;
    use tempfile::TempDir;
    use tessera_common::types::tid::Tid;

    fn commit_with(blocks: &[&'static [u8]], removed: &[IpldCid]) -> CommitData {
        let mut new_blocks = BlockMap::new();
        for b in blocks {
            new_blocks.set(cbor_cid(b), Bytes::from_static(b));
        }
        let cid = cbor_cid(blocks[0]);
        CommitData {
            cid,
            rev: Tid::from_parts(1, 0),
            since: None,
            prev: None,
            data: cid,
            new_blocks,
            removed_cids: removed.iter().copied().collect::<CidSet>(),
        }
    }

    #[tokio::test]
    async fn test_new_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.car");
        let storage = FileBlockStore::new(&path);

        assert_eq!(storage.get_root().await.unwrap(), None);
        assert!(!storage.is_dirty().await);
        assert_eq!(storage.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_put_marks_dirty_and_flush_without_root_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.car");
        let storage = FileBlockStore::new(&path);

        let cid = storage.put(b"test data").await.unwrap();
        assert!(storage.is_dirty().await);
        assert!(storage.has(&cid).await.unwrap());

        storage.flush().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_commit_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.car");
        let storage = FileBlockStore::new(&path);

        let first = commit_with(&[b"commit-1", b"node-a"], &[]);
        storage.apply_commit(&first).await.unwrap();
        assert!(path.exists());

        let node_a = cbor_cid(b"node-a");
        let second = commit_with(&[b"commit-2", b"node-b"], &[node_a]);
        storage.apply_commit(&second).await.unwrap();

        let reloaded = FileBlockStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get_root().await.unwrap(), Some(second.cid));
        assert!(reloaded.has(&cbor_cid(b"node-b")).await.unwrap());
        assert!(!reloaded.has(&node_a).await.unwrap());
        assert!(reloaded.has(&first.cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileBlockStore::open(dir.path().join("absent.car")).await.unwrap();
        assert_eq!(storage.get_root().await.unwrap(), None);
    }
}
