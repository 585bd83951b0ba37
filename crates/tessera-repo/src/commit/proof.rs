//! Record proofs
//!
//! A proof is a CAR rooted at a signed commit, carrying the MST nodes on the
//! path to one key and, if the key exists, its record block. A verifier holding
//! only the repository's DID and public key can check that the record is (or
//! is not) part of the signed tree.

use std::sync::Arc;

use cid::Cid as IpldCid;
use tessera_common::Did;
use tessera_common::types::crypto::PublicKey;

use super::Commit;
use crate::block::BlockMap;
use crate::car::parse_car_bytes;
use crate::error::{ProofError, RepoErrorKind, Result};
use crate::mst::Mst;
use crate::storage::{self, BlockStore, MemoryBlockStore};

/// MST path blocks for `key`, plus the record block if the key exists
pub async fn proof_blocks<S: BlockStore + Sync + Send + 'static>(
    mst: &Mst<S>,
    key: &str,
) -> Result<BlockMap> {
    let mut blocks = BlockMap::new();
    let value = mst.get(key).await?;
    let mut path = mst.cids_for_path(key).await?;
    if value.is_some() {
        path.pop();
    }
    for cid in path {
        blocks.set(cid, mst.read_raw(&cid).await?);
    }
    if let Some(value) = value {
        blocks.set(value, storage::get_bytes(&**mst.storage(), &value).await?);
    }
    Ok(blocks)
}

/// Verify a record proof
///
/// **Inputs:**
/// - `car`: CAR rooted at the commit, with the path nodes and record block
/// - `did`: repository the proof must be for
/// - `key`: record path being proven
/// - `pubkey`: repository signing key
///
/// Returns the record's CID if the proof shows it present, `None` if it
/// shows it absent. Every block's hash is checked while reading the CAR.
pub async fn verify_record_proof(
    car: &[u8],
    did: &Did,
    key: &str,
    pubkey: &PublicKey,
) -> Result<Option<IpldCid>> {
    let parsed = parse_car_bytes(car).await?;
    let commit_bytes = parsed
        .blocks
        .get(&parsed.root)
        .ok_or(ProofError::CommitNotFound)?;
    let commit = Commit::from_cbor(commit_bytes)?;
    if commit.did() != did {
        return Err(ProofError::DidMismatch {
            commit_did: commit.did().to_string(),
            expected_did: did.to_string(),
        }
        .into());
    }
    commit.verify(pubkey)?;

    let has_record = |cid: &IpldCid| parsed.blocks.has(cid);
    let storage = Arc::new(MemoryBlockStore::new_from_blocks(parsed.blocks.clone()));
    let mst = Mst::load(storage, commit.data);
    let value = match mst.get(key).await {
        Ok(value) => value,
        Err(e) if e.kind() == RepoErrorKind::NotFound => {
            // A walk that needs a node the CAR does not carry proves nothing
            let missing = first_missing(&mst, key, &parsed.blocks).await;
            return Err(ProofError::MissingMstBlock {
                cid: missing.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
            }
            .into());
        }
        Err(e) => return Err(e),
    };

    if let Some(cid) = value {
        if !has_record(&cid) {
            return Err(ProofError::RecordMismatch {
                key: key.to_string(),
            }
            .into());
        }
    }
    Ok(value)
}

/// First node on the path to `key` absent from `blocks`
async fn first_missing(
    mst: &Mst<MemoryBlockStore>,
    key: &str,
    blocks: &BlockMap,
) -> Option<IpldCid> {
    let mut cid = mst.root();
    loop {
        if !blocks.has(&cid) {
            return Some(cid);
        }
        let entries = mst.read_node(&cid).await.ok()?;
        let next = entries
            .iter()
            .take_while(|e| e.leaf_key().is_none_or(|k| k <= key))
            .last()
            .and_then(|e| e.tree())?;
        cid = next;
    }
}
