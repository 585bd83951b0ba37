//! In-memory block storage implementation

use crate::block::BlockMap;
use crate::error::Result;
use crate::repo::CommitData;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_common::types::cid::cbor_cid;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    blocks: BTreeMap<IpldCid, Bytes>,
    root: Option<IpldCid>,
}

/// In-memory block storage
///
/// Useful for tests, proof verification and staging. Clones share the same
/// underlying map, so a clone handed to a tree sees writes made through
/// the original.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new memory store from a set of blocks
    pub fn new_from_blocks(blocks: impl Into<BlockMap>) -> Self {
        let blocks: BlockMap = blocks.into();
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                blocks: blocks.into_inner(),
                root: None,
            })),
        }
    }

    /// Get number of blocks stored
    pub async fn len(&self) -> usize {
        self.state.read().await.blocks.len()
    }

    /// Check if store is empty
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.blocks.is_empty()
    }

    /// Set the root pointer without touching blocks
    pub async fn set_root(&self, root: Option<IpldCid>) {
        self.state.write().await.root = root;
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.state.read().await.blocks.get(cid).cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = cbor_cid(data);
        self.state
            .write()
            .await
            .blocks
            .insert(cid, Bytes::copy_from_slice(data));
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.state.read().await.blocks.contains_key(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.blocks.extend(blocks);
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<(BlockMap, Vec<IpldCid>)> {
        let state = self.state.read().await;
        let mut found = BlockMap::new();
        let mut missing = Vec::new();
        for cid in cids {
            match state.blocks.get(cid) {
                Some(bytes) => found.set(*cid, bytes.clone()),
                None => missing.push(*cid),
            }
        }
        Ok((found, missing))
    }

    async fn get_root(&self) -> Result<Option<IpldCid>> {
        Ok(self.state.read().await.root)
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        // One write guard covers the whole update, so readers never see a half-applied commit
        let mut state = self.state.write().await;
        for cid in commit.removed_cids.iter() {
            state.blocks.remove(cid);
        }
        for (cid, bytes) in commit.new_blocks.iter() {
            state.blocks.insert(*cid, bytes.clone());
        }
        state.root = Some(commit.cid);
        Ok(())
    }
}
