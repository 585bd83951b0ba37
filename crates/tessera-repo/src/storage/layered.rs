//! Layered block storage for staging writes over an existing repository
//!
//! Reads check a writable layer first, then fall back to a read-only base.
//! All writes go to the writable layer, so a commit can be built and
//! inspected without touching the base store until it is applied there.

use std::sync::Arc;

use crate::block::BlockMap;
use crate::error::Result;
use crate::repo::CommitData;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;

/// Layered block storage with a writable overlay and read-only base
///
/// # Example
///
/// ```rust,ignore
/// use tessera_repo::storage::{LayeredBlockStore, MemoryBlockStore};
/// use std::sync::Arc;
///
/// let base = Arc::new(MemoryBlockStore::new()); // durable repo storage
/// let staging = MemoryBlockStore::new(); // scratch for the next commit
/// let layered = LayeredBlockStore::new(staging, base);
/// ```
#[derive(Clone)]
pub struct LayeredBlockStore<W: BlockStore, B: BlockStore> {
    writable: W,
    base: Arc<B>,
}

impl<W: BlockStore, B: BlockStore> LayeredBlockStore<W, B> {
    /// Create a new layered storage
    ///
    /// - `writable`: top layer receiving all writes
    /// - `base`: bottom layer for fallback reads
    pub fn new(writable: W, base: Arc<B>) -> Self {
        Self { writable, base }
    }

    /// Get reference to the writable layer
    pub fn writable(&self) -> &W {
        &self.writable
    }

    /// Get reference to the base layer
    pub fn base(&self) -> &Arc<B> {
        &self.base
    }
}

impl<W: BlockStore + Sync + 'static, B: BlockStore + Sync + Send + 'static> BlockStore
    for LayeredBlockStore<W, B>
{
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        if let Some(data) = self.writable.get(cid).await? {
            return Ok(Some(data));
        }
        self.base.get(cid).await
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        self.writable.put(data).await
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        if self.writable.has(cid).await? {
            return Ok(true);
        }
        self.base.has(cid).await
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        self.writable.put_many(blocks).await
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<(BlockMap, Vec<IpldCid>)> {
        let (mut found, missing) = self.writable.get_many(cids).await?;
        if missing.is_empty() {
            return Ok((found, missing));
        }
        let (from_base, still_missing) = self.base.get_many(&missing).await?;
        found.add_map(&from_base);
        Ok((found, still_missing))
    }

    async fn get_root(&self) -> Result<Option<IpldCid>> {
        match self.writable.get_root().await? {
            Some(root) => Ok(Some(root)),
            None => self.base.get_root().await,
        }
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        // Base layer is read-only
        self.writable.apply_commit(commit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;
    use tessera_common::types::cid::cbor_cid;

    #[tokio::test]
    async fn reads_fall_through_writes_stay_on_top() {
        let base = Arc::new(MemoryBlockStore::new());
        let in_base = base.put(b"base").await.unwrap();
        let layered = LayeredBlockStore::new(MemoryBlockStore::new(), base.clone());

        assert!(layered.has(&in_base).await.unwrap());
        let on_top = layered.put(b"top").await.unwrap();
        assert!(layered.has(&on_top).await.unwrap());
        assert!(!base.has(&on_top).await.unwrap());
    }

    #[tokio::test]
    async fn get_many_merges_layers() {
        let base = Arc::new(MemoryBlockStore::new());
        let a = base.put(b"a").await.unwrap();
        let layered = LayeredBlockStore::new(MemoryBlockStore::new(), base);
        let b = layered.put(b"b").await.unwrap();
        let c = cbor_cid(b"c");

        let (found, missing) = layered.get_many(&[a, b, c]).await.unwrap();
        assert!(found.has(&a) && found.has(&b));
        assert_eq!(missing, vec![c]);
    }

    #[tokio::test]
    async fn root_prefers_overlay() {
        let base = Arc::new(MemoryBlockStore::new());
        let base_root = cbor_cid(b"base-root");
        base.set_root(Some(base_root)).await;
        let top = MemoryBlockStore::new();
        let layered = LayeredBlockStore::new(top.clone(), base);

        assert_eq!(layered.get_root().await.unwrap(), Some(base_root));
        let top_root = cbor_cid(b"top-root");
        top.set_root(Some(top_root)).await;
        assert_eq!(layered.get_root().await.unwrap(), Some(top_root));
    }
}
