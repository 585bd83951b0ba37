//! MST diff calculation
//!
//! Both trees are expanded one layer at a time from the top. Since a node's
//! CID fixes its whole subtree, a node present on both sides at the same
//! layer is dropped from the walk; only nodes unique to one side are opened.
//! The leaves of those nodes are exactly the changed records, so the cost
//! follows the size of the change rather than the size of the trees.

use std::collections::{BTreeMap, BTreeSet};

use cid::Cid as IpldCid;
use smol_str::SmolStr;

use super::node::NodeEntry;
use super::tree::{Mst, decode_node};
use crate::block::{BlockMap, CidSet};
use crate::error::Result;
use crate::storage::BlockStore;

/// Diff between two MST states
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MstDiff {
    /// New records created (key, new CID)
    pub creates: Vec<(SmolStr, IpldCid)>,

    /// Records updated (key, new CID, old CID)
    pub updates: Vec<(SmolStr, IpldCid, IpldCid)>,

    /// Records deleted (key, old CID)
    pub deletes: Vec<(SmolStr, IpldCid)>,

    /// Record CIDs newly referenced by creates and updates
    pub new_leaf_cids: CidSet,

    /// Record CIDs no longer referenced at their key (deletes, replaced values)
    ///
    /// The same CID may still be referenced under another key.
    pub removed_leaf_cids: CidSet,

    /// Node blocks reachable from the new root but not the old
    pub new_mst_blocks: BlockMap,

    /// Node CIDs reachable from the old root but not the new
    pub removed_mst_blocks: CidSet,
}

impl MstDiff {
    /// Create empty diff
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if diff is empty (no record changes)
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Count total operations
    pub fn op_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

impl<S: BlockStore + Sync + Send + 'static> Mst<S> {
    /// Compute the diff from this tree to `other`
    ///
    /// - Creates: keys in `other` but not in `self`
    /// - Updates: keys in both but with different CIDs
    /// - Deletes: keys in `self` but not in `other`
    pub async fn diff<T: BlockStore + Sync + Send + 'static>(
        &self,
        other: &Mst<T>,
    ) -> Result<MstDiff> {
        let old_layer = self.layer_of(&self.root()).await?.unwrap_or(0);
        let new_layer = other.layer_of(&other.root()).await?.unwrap_or(0);

        let mut diff = MstDiff::new();
        let mut added: BTreeMap<SmolStr, IpldCid> = BTreeMap::new();
        let mut removed: BTreeMap<SmolStr, IpldCid> = BTreeMap::new();
        let mut old_frontier = BTreeSet::new();
        let mut new_frontier = BTreeSet::new();

        let mut layer = old_layer.max(new_layer);
        loop {
            if layer == old_layer {
                old_frontier.insert(self.root());
            }
            if layer == new_layer {
                new_frontier.insert(other.root());
            }

            let mut next_old = BTreeSet::new();
            let mut next_new = BTreeSet::new();

            for cid in new_frontier.difference(&old_frontier) {
                let bytes = other.read_raw(cid).await?;
                for entry in decode_node(&bytes)? {
                    match entry {
                        NodeEntry::Leaf { key, value } => {
                            added.insert(key, value);
                        }
                        NodeEntry::Tree(child) => {
                            next_new.insert(child);
                        }
                    }
                }
                diff.new_mst_blocks.set(*cid, bytes);
            }

            for cid in old_frontier.difference(&new_frontier) {
                for entry in self.read_node(cid).await? {
                    match entry {
                        NodeEntry::Leaf { key, value } => {
                            removed.insert(key, value);
                        }
                        NodeEntry::Tree(child) => {
                            next_old.insert(child);
                        }
                    }
                }
                diff.removed_mst_blocks.add(*cid);
            }

            if layer == 0 {
                break;
            }
            layer -= 1;
            old_frontier = next_old;
            new_frontier = next_new;
        }

        for (key, cid) in added {
            match removed.remove(&key) {
                // Leaf moved between nodes without changing
                Some(prev) if prev == cid => {}
                Some(prev) => {
                    diff.new_leaf_cids.add(cid);
                    diff.removed_leaf_cids.add(prev);
                    diff.updates.push((key, cid, prev));
                }
                None => {
                    diff.new_leaf_cids.add(cid);
                    diff.creates.push((key, cid));
                }
            }
        }
        for (key, prev) in removed {
            diff.removed_leaf_cids.add(prev);
            diff.deletes.push((key, prev));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            creates = diff.creates.len(),
            updates = diff.updates.len(),
            deletes = diff.deletes.len(),
            new_nodes = diff.new_mst_blocks.len(),
            removed_nodes = diff.removed_mst_blocks.len(),
            "mst diff"
        );

        Ok(diff)
    }

    /// Diff from the empty tree: every key is a create, every node is new
    pub async fn diff_from_empty(&self) -> Result<MstDiff> {
        Mst::new(self.storage().clone()).diff(self).await
    }
}
