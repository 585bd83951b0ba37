//! Canonical block encoding and the in-memory block collections built on it
//!
//! Every structured block is DAG-CBOR. Encoding is deterministic (map keys
//! sorted length-first, minimal integers, no indefinite lengths), so the same
//! value always yields the same bytes and therefore the same CID.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use cid::Cid as IpldCid;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tessera_common::types::cid::{cbor_cid, verify_cid};

use crate::error::{RepoError, Result};

/// Encode a value as a DAG-CBOR block, returning its CID and bytes
pub fn encode_block<T: Serialize + ?Sized>(value: &T) -> Result<(IpldCid, Bytes)> {
    let bytes = serde_ipld_dagcbor::to_vec(value).map_err(RepoError::serialization)?;
    let cid = cbor_cid(&bytes);
    Ok((cid, Bytes::from(bytes)))
}

/// Decode a DAG-CBOR block
pub fn decode_block<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(RepoError::serialization)
}

/// Decode a block after checking its bytes hash to `cid`
pub fn decode_verified<T: DeserializeOwned>(cid: &IpldCid, bytes: &[u8]) -> Result<T> {
    verify_cid(cid, bytes)?;
    decode_block(bytes)
}

/// CID → bytes map, ordered by CID, tracking total byte size
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    blocks: BTreeMap<IpldCid, Bytes>,
    byte_size: usize,
}

impl BlockMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `value` and insert it, returning the CID
    pub fn add<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<IpldCid> {
        let (cid, bytes) = encode_block(value)?;
        self.set(cid, bytes);
        Ok(cid)
    }

    /// Insert pre-encoded bytes under `cid`
    pub fn set(&mut self, cid: IpldCid, bytes: Bytes) {
        let len = bytes.len();
        if let Some(old) = self.blocks.insert(cid, bytes) {
            self.byte_size -= old.len();
        }
        self.byte_size += len;
    }

    /// Bytes for `cid`
    pub fn get(&self, cid: &IpldCid) -> Option<&Bytes> {
        self.blocks.get(cid)
    }

    /// Membership
    pub fn has(&self, cid: &IpldCid) -> bool {
        self.blocks.contains_key(cid)
    }

    /// Remove `cid`, returning its bytes
    pub fn delete(&mut self, cid: &IpldCid) -> Option<Bytes> {
        let removed = self.blocks.remove(cid);
        if let Some(b) = &removed {
            self.byte_size -= b.len();
        }
        removed
    }

    /// Split `cids` into the blocks present here and the CIDs that are not
    pub fn get_many(&self, cids: &[IpldCid]) -> (BlockMap, Vec<IpldCid>) {
        let mut found = BlockMap::new();
        let mut missing = Vec::new();
        for cid in cids {
            match self.blocks.get(cid) {
                Some(bytes) => found.set(*cid, bytes.clone()),
                None => missing.push(*cid),
            }
        }
        (found, missing)
    }

    /// Union: copy every block of `other` into this map
    pub fn add_map(&mut self, other: &BlockMap) {
        for (cid, bytes) in other.iter() {
            self.set(*cid, bytes.clone());
        }
    }

    /// Subtraction: drop every CID in `cids`
    pub fn subtract(&mut self, cids: &CidSet) {
        for cid in cids.iter() {
            self.delete(cid);
        }
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// No blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Sum of block lengths
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// CIDs in order
    pub fn cids(&self) -> impl Iterator<Item = &IpldCid> {
        self.blocks.keys()
    }

    /// Blocks in CID order
    pub fn iter(&self) -> impl Iterator<Item = (&IpldCid, &Bytes)> {
        self.blocks.iter()
    }

    /// Unwrap into the ordered map
    pub fn into_inner(self) -> BTreeMap<IpldCid, Bytes> {
        self.blocks
    }
}

impl IntoIterator for BlockMap {
    type Item = (IpldCid, Bytes);
    type IntoIter = std::collections::btree_map::IntoIter<IpldCid, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

impl FromIterator<(IpldCid, Bytes)> for BlockMap {
    fn from_iter<I: IntoIterator<Item = (IpldCid, Bytes)>>(iter: I) -> Self {
        let mut map = BlockMap::new();
        for (cid, bytes) in iter {
            map.set(cid, bytes);
        }
        map
    }
}

impl From<BTreeMap<IpldCid, Bytes>> for BlockMap {
    fn from(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        blocks.into_iter().collect()
    }
}

/// Ordered set of CIDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CidSet(BTreeSet<IpldCid>);

impl CidSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert; returns whether it was new
    pub fn add(&mut self, cid: IpldCid) -> bool {
        self.0.insert(cid)
    }

    /// Union in place
    pub fn add_set(&mut self, other: &CidSet) {
        self.0.extend(other.0.iter().copied());
    }

    /// Difference in place
    pub fn subtract_set(&mut self, other: &CidSet) {
        for cid in other.iter() {
            self.0.remove(cid);
        }
    }

    /// Remove one CID
    pub fn delete(&mut self, cid: &IpldCid) -> bool {
        self.0.remove(cid)
    }

    /// Membership
    pub fn has(&self, cid: &IpldCid) -> bool {
        self.0.contains(cid)
    }

    /// Size
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in order
    pub fn iter(&self) -> impl Iterator<Item = &IpldCid> {
        self.0.iter()
    }

    /// Collect into a vector
    pub fn to_vec(&self) -> Vec<IpldCid> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<IpldCid> for CidSet {
    fn from_iter<I: IntoIterator<Item = IpldCid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for CidSet {
    type Item = IpldCid;
    type IntoIter = std::collections::btree_set::IntoIter<IpldCid>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
