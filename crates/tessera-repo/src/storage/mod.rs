//! Block storage abstraction for MST nodes, commits and records

use crate::block::BlockMap;
use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use bytes::Bytes;
use cid::Cid as IpldCid;
use serde::de::DeserializeOwned;

/// Async block storage trait
///
/// CID-keyed storage holding every block of one repository, plus the pointer
/// to its current commit. Implementations here:
/// - In-memory map ([`MemoryBlockStore`])
/// - CAR file ([`FileBlockStore`])
/// - Writable overlay on a read-only base ([`LayeredBlockStore`])
///
/// Hosts back it with whatever durable key-value store they run. Clone is
/// required so trees can share storage handles across operations.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_repo::storage::{BlockStore, MemoryBlockStore};
///
/// # async fn example() -> tessera_repo::Result<()> {
/// let storage = MemoryBlockStore::new();
/// let cid = storage.put(b"\xa0").await?;
/// let (found, missing) = storage.get_many(&[cid]).await?;
/// assert!(missing.is_empty());
/// # Ok(())
/// # }
/// ```
#[trait_variant::make(Send)]
pub trait BlockStore: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not found.
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>>;

    /// Put a DAG-CBOR block, return its CID
    async fn put(&self, data: &[u8]) -> Result<IpldCid>;

    /// Check if a block exists without retrieving it
    async fn has(&self, cid: &IpldCid) -> Result<bool>;

    /// Put many pre-addressed blocks at once
    ///
    /// CIDs are trusted to match their bytes.
    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()>;

    /// Batch read: the blocks found, and the CIDs that were not
    async fn get_many(&self, cids: &[IpldCid]) -> Result<(BlockMap, Vec<IpldCid>)>;

    /// CID of the current commit, if the repository has one
    async fn get_root(&self) -> Result<Option<IpldCid>>;

    /// Apply a commit atomically
    ///
    /// Deletes `removed_cids`, inserts `new_blocks`, and points the root at
    /// `commit.cid`, all or nothing. On failure the previous root stays
    /// authoritative.
    async fn apply_commit(&self, commit: &CommitData) -> Result<()>;
}

/// Read a block that must exist
pub async fn get_bytes<S: BlockStore + Sync>(store: &S, cid: &IpldCid) -> Result<Bytes> {
    store
        .get(cid)
        .await?
        .ok_or_else(|| RepoError::not_found("block", cid))
}

/// Read and decode a block that must exist
pub async fn read_block<S: BlockStore + Sync, T: DeserializeOwned>(
    store: &S,
    cid: &IpldCid,
) -> Result<T> {
    let bytes = get_bytes(store, cid).await?;
    crate::block::decode_block(&bytes)
}

pub mod file;
pub mod layered;
pub mod memory;

pub use file::FileBlockStore;
pub use layered::LayeredBlockStore;
pub use memory::MemoryBlockStore;
