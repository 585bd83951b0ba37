//! Immutable Merkle Search Tree operations

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;
use tessera_common::types::cid::cbor_cid;

use super::node::{NodeData, NodeEntry};
use super::util::{layer_for_key, validate_key};
use crate::block::{BlockMap, CidSet, decode_block};
use crate::error::{MstError, RepoError, Result};
use crate::storage::{self, BlockStore};

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// DAG-CBOR bytes of the empty node, `{"e": [], "l": null}`
pub const EMPTY_NODE: &[u8] = &[0xa2, 0x61, b'e', 0x80, 0x61, b'l', 0xf6];

/// CID of the empty node, the root of every empty tree
pub fn empty_root() -> IpldCid {
    cbor_cid(EMPTY_NODE)
}

/// Write operation for batch application
///
/// `prev` on updates and deletes is a compare-and-swap guard: when set, the
/// key's current value must match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Create new record (error if exists)
    Create {
        /// Record key (collection/rkey)
        key: SmolStr,
        /// Record CID
        cid: IpldCid,
    },

    /// Update existing record (error if not exists)
    Update {
        /// Record key (collection/rkey)
        key: SmolStr,
        /// New record CID
        cid: IpldCid,
        /// Expected current CID
        prev: Option<IpldCid>,
    },

    /// Delete record (error if not exists)
    Delete {
        /// Record key (collection/rkey)
        key: SmolStr,
        /// Expected current CID
        prev: Option<IpldCid>,
    },
}

impl WriteOp {
    /// Key this operation targets
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Create { key, .. }
            | WriteOp::Update { key, .. }
            | WriteOp::Delete { key, .. } => key,
        }
    }
}

/// Immutable Merkle Search Tree
///
/// A tree is a root CID plus the storage its nodes live in. Every mutation
/// returns a new tree and the node blocks it created, leaving `self`
/// untouched; unchanged subtrees are shared by CID between versions.
///
/// Nodes created by mutations and not yet written to storage travel with the
/// tree as pending blocks, so a chain of edits can be read back before
/// anything is persisted. Pending blocks are pruned to those reachable from
/// the current root after each edit.
///
/// # Layer-based structure
///
/// Keys are hashed (SHA-256) and the count of leading zero nibbles is the
/// key's layer. A node holds keys of exactly one layer; its subtrees are one
/// layer down. The shape depends only on the key/value set, never on the
/// order of insertion.
#[derive(Debug)]
pub struct Mst<S> {
    storage: Arc<S>,
    root: IpldCid,
    pending: Arc<BlockMap>,
}

impl<S> Clone for Mst<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            root: self.root,
            pending: self.pending.clone(),
        }
    }
}

impl<S: BlockStore + Sync + Send + 'static> Mst<S> {
    /// Create empty MST
    pub fn new(storage: Arc<S>) -> Self {
        Self::load(storage, empty_root())
    }

    /// Load MST from an existing root CID
    ///
    /// Nodes are read lazily; a missing root surfaces on first access.
    pub fn load(storage: Arc<S>, root: IpldCid) -> Self {
        Self {
            storage,
            root,
            pending: Arc::new(BlockMap::new()),
        }
    }

    /// Load MST, failing with `NotFound` if the root block is absent
    pub async fn load_checked(storage: Arc<S>, root: IpldCid) -> Result<Self> {
        let mst = Self::load(storage, root);
        mst.read_node(&root).await?;
        Ok(mst)
    }

    /// Build a tree from scratch
    pub async fn create(
        storage: Arc<S>,
        entries: impl IntoIterator<Item = (SmolStr, IpldCid)>,
    ) -> Result<Self> {
        let mut mst = Self::new(storage);
        for (key, value) in entries {
            mst = mst.add(&key, value).await?.0;
        }
        Ok(mst)
    }

    /// CID of the root node
    pub fn root(&self) -> IpldCid {
        self.root
    }

    /// Get storage reference
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Node blocks reachable from the root that are not yet in storage
    pub fn pending_blocks(&self) -> &BlockMap {
        &self.pending
    }

    /// Write pending blocks to storage, returning a tree with none pending
    pub async fn persist(&self) -> Result<Self> {
        if !self.pending.is_empty() {
            let blocks: Vec<(IpldCid, Bytes)> = self
                .pending
                .iter()
                .map(|(cid, bytes)| (*cid, bytes.clone()))
                .collect();
            self.storage.put_many(blocks).await?;
        }
        Ok(Self::load(self.storage.clone(), self.root))
    }

    /// Raw bytes of a node reachable from this tree
    pub(crate) async fn read_raw(&self, cid: &IpldCid) -> Result<Bytes> {
        if let Some(bytes) = self.pending.get(cid) {
            return Ok(bytes.clone());
        }
        if *cid == empty_root() {
            return Ok(Bytes::from_static(EMPTY_NODE));
        }
        storage::get_bytes(&*self.storage, cid)
            .await
            .map_err(|e| e.with_context(format!("MST node not found: {}", cid)))
    }

    /// Decoded entries of a node reachable from this tree
    pub(crate) async fn read_node(&self, cid: &IpldCid) -> Result<Vec<NodeEntry>> {
        decode_node(&self.read_raw(cid).await?)
    }

    /// Layer of the node at `cid`, `None` for the empty node
    ///
    /// Leafless nodes (pure subtree chains) take their child's layer plus one.
    pub(crate) async fn layer_of(&self, cid: &IpldCid) -> Result<Option<u32>> {
        let mut depth = 0;
        let mut current = *cid;
        loop {
            let entries = self.read_node(&current).await?;
            if let Some(key) = entries.iter().find_map(NodeEntry::leaf_key) {
                return Ok(Some(layer_for_key(key) + depth));
            }
            match entries.first() {
                Some(NodeEntry::Tree(child)) => {
                    current = *child;
                    depth += 1;
                }
                _ => return Ok(None),
            }
        }
    }

    /// Walk from the root toward `key`
    ///
    /// Returns every node visited and the key's value if present.
    async fn walk(&self, key: &str) -> Result<(Vec<IpldCid>, Option<IpldCid>)> {
        let mut path = Vec::new();
        let mut cid = self.root;
        loop {
            path.push(cid);
            let entries = self.read_node(&cid).await?;
            let pos = upper_bound(&entries, key);
            match pos.checked_sub(1).map(|i| &entries[i]) {
                Some(NodeEntry::Leaf { key: found, value }) if found.as_str() == key => {
                    return Ok((path, Some(*value)));
                }
                Some(NodeEntry::Tree(child)) => cid = *child,
                _ => return Ok((path, None)),
            }
        }
    }

    /// Get value for key
    pub async fn get(&self, key: &str) -> Result<Option<IpldCid>> {
        validate_key(key)?;
        Ok(self.walk(key).await?.1)
    }

    /// Node CIDs from the root to where `key` resolves, then the value CID if present
    ///
    /// The blocks behind these CIDs prove the key's presence, or its absence
    /// when the value is missing.
    pub async fn cids_for_path(&self, key: &str) -> Result<Vec<IpldCid>> {
        validate_key(key)?;
        let (mut path, value) = self.walk(key).await?;
        path.extend(value);
        Ok(path)
    }

    /// Add a key, failing with `DuplicateKey` if it is already present
    pub async fn add(&self, key: &str, value: IpldCid) -> Result<(Self, BlockMap)> {
        validate_key(key)?;
        if self.walk(key).await?.1.is_some() {
            return Err(RepoError::duplicate_key(key));
        }
        let key_layer = layer_for_key(key);
        let mut op = Mutation::new(self);

        let root = match self.layer_of(&self.root).await? {
            None => op.chain(key, value, key_layer, key_layer)?,
            Some(root_layer) if key_layer > root_layer => {
                // New key outranks the whole tree: it becomes the sole key of a new root
                let (left, right) = op.split(self.root, root_layer, key).await?;
                let left = op.wrap(left, root_layer, key_layer - 1)?;
                let right = op.wrap(right, root_layer, key_layer - 1)?;
                let mut entries = Vec::with_capacity(3);
                entries.extend(left.map(NodeEntry::Tree));
                entries.push(NodeEntry::Leaf {
                    key: SmolStr::new(key),
                    value,
                });
                entries.extend(right.map(NodeEntry::Tree));
                op.store(&entries)?
            }
            Some(root_layer) => {
                let entries = op.load(&self.root).await?;
                let entries = op.insert(entries, root_layer, key, value, key_layer).await?;
                op.store(&entries)?
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(key, layer = key_layer, %root, "mst add");

        op.finish(root)
    }

    /// Replace the value of an existing key, failing with `MissingKey` if absent
    pub async fn update(&self, key: &str, value: IpldCid) -> Result<(Self, BlockMap)> {
        validate_key(key)?;
        let key_layer = layer_for_key(key);
        let root_layer = match self.layer_of(&self.root).await? {
            Some(layer) if layer >= key_layer => layer,
            _ => return Err(RepoError::missing_key(key)),
        };
        let mut op = Mutation::new(self);
        let entries = op.load(&self.root).await?;
        let entries = op.replace(entries, root_layer, key, value, key_layer).await?;
        let root = op.store(&entries)?;
        op.finish(root)
    }

    /// Remove a key, failing with `MissingKey` if absent
    pub async fn delete(&self, key: &str) -> Result<(Self, BlockMap)> {
        validate_key(key)?;
        let key_layer = layer_for_key(key);
        let root_layer = match self.layer_of(&self.root).await? {
            Some(layer) if layer >= key_layer => layer,
            _ => return Err(RepoError::missing_key(key)),
        };
        let mut op = Mutation::new(self);
        let entries = op.load(&self.root).await?;
        let entries = op.remove(entries, root_layer, key, key_layer).await?;
        let root = op.trim_top(entries).await?;

        #[cfg(feature = "tracing")]
        tracing::trace!(key, %root, "mst delete");

        op.finish(root)
    }

    /// Apply write operations in order
    ///
    /// Returns the final tree and every node block it references that is not
    /// in storage yet.
    pub async fn batch(&self, ops: &[WriteOp]) -> Result<(Self, BlockMap)> {
        let mut tree = self.clone();
        for op in ops {
            tree = match op {
                WriteOp::Create { key, cid } => tree.add(key, *cid).await?.0,
                WriteOp::Update { key, cid, prev } => {
                    check_prev(&tree, key, *prev).await?;
                    tree.update(key, *cid).await?.0
                }
                WriteOp::Delete { key, prev } => {
                    check_prev(&tree, key, *prev).await?;
                    tree.delete(key).await?.0
                }
            };
        }
        // Prior pending blocks were already reported by whoever created them
        let mut fresh = (*tree.pending).clone();
        fresh.subtract(&self.pending.cids().copied().collect::<CidSet>());
        Ok((tree, fresh))
    }

    /// Every leaf in key order
    pub async fn leaves(&self) -> Result<Vec<(SmolStr, IpldCid)>> {
        let mut out = Vec::new();
        let mut stack = vec![self.read_node(&self.root).await?.into_iter()];
        while let Some(top) = stack.last_mut() {
            match top.next() {
                Some(NodeEntry::Leaf { key, value }) => out.push((key, value)),
                Some(NodeEntry::Tree(child)) => {
                    let entries = self.read_node(&child).await?;
                    stack.push(entries.into_iter());
                }
                None => {
                    stack.pop();
                }
            }
        }
        Ok(out)
    }

    /// Leaves whose key starts with `prefix`, in key order
    pub async fn list(&self, prefix: &str) -> Result<Vec<(SmolStr, IpldCid)>> {
        let mut leaves = self.leaves().await?;
        leaves.retain(|(key, _)| key.starts_with(prefix));
        Ok(leaves)
    }

    /// Number of keys
    pub async fn len(&self) -> Result<usize> {
        Ok(self.leaves().await?.len())
    }

    /// Whether the tree holds no keys
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.read_node(&self.root).await?.is_empty())
    }

    /// All node blocks, plus the value CIDs of every leaf in key order
    pub async fn collect_blocks(&self) -> Result<(BlockMap, Vec<IpldCid>)> {
        let mut nodes = BlockMap::new();
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(cid) = stack.pop() {
            let bytes = self.read_raw(&cid).await?;
            let entries = decode_node(&bytes)?;
            nodes.set(cid, bytes);
            // Reverse so the leftmost subtree is visited first
            for entry in entries.into_iter().rev() {
                match entry {
                    NodeEntry::Tree(child) => stack.push(child),
                    NodeEntry::Leaf { value, .. } => leaves.push(value),
                }
            }
        }
        Ok((nodes, leaves))
    }

    /// Check every node: keys valid, sorted, and at their node's layer
    ///
    /// Returns the number of keys. Used on trees received from elsewhere,
    /// where a malformed shape would break determinism.
    pub async fn verify_structure(&self) -> Result<usize> {
        let root_entries = self.read_node(&self.root).await?;
        if let [NodeEntry::Tree(_)] = root_entries.as_slice() {
            return Err(MstError::InvalidNode("root holds only a subtree".into()).into());
        }
        let Some(root_layer) = self.layer_of(&self.root).await? else {
            return Ok(0);
        };

        let mut count = 0;
        let mut last: Option<SmolStr> = None;
        let mut stack = vec![(root_entries.into_iter(), root_layer)];
        while let Some((iter, layer)) = stack.last_mut() {
            let layer = *layer;
            match iter.next() {
                Some(NodeEntry::Leaf { key, .. }) => {
                    validate_key(&key)?;
                    let key_layer = layer_for_key(&key);
                    if key_layer != layer {
                        return Err(MstError::WrongLayer {
                            layer,
                            key: key.to_string(),
                            key_layer,
                        }
                        .into());
                    }
                    if last.as_ref().is_some_and(|prev| *prev >= key) {
                        return Err(
                            MstError::InvalidNode(format!("key {} out of order", key)).into()
                        );
                    }
                    last = Some(key);
                    count += 1;
                }
                Some(NodeEntry::Tree(child)) => {
                    let child_layer = child_layer(layer)?;
                    let entries = self.read_node(&child).await?;
                    if entries.is_empty() {
                        return Err(
                            MstError::InvalidNode(format!("empty subtree {}", child)).into()
                        );
                    }
                    stack.push((entries.into_iter(), child_layer));
                }
                None => {
                    stack.pop();
                }
            }
        }
        Ok(count)
    }
}

async fn check_prev<S: BlockStore + Sync + Send + 'static>(
    tree: &Mst<S>,
    key: &str,
    prev: Option<IpldCid>,
) -> Result<()> {
    let Some(expected) = prev else {
        return Ok(());
    };
    match tree.get(key).await? {
        Some(current) if current == expected => Ok(()),
        None => Err(RepoError::missing_key(key)),
        found => Err(RepoError::swap_mismatch(key, expected, found)),
    }
}

/// Decode node bytes into flat entries
pub(crate) fn decode_node(bytes: &[u8]) -> Result<Vec<NodeEntry>> {
    decode_block::<NodeData>(bytes)?.to_entries()
}

/// Index of the first leaf whose key sorts after `key`
fn upper_bound(entries: &[NodeEntry], key: &str) -> usize {
    entries
        .iter()
        .position(|e| e.leaf_key().is_some_and(|k| k > key))
        .unwrap_or(entries.len())
}

fn child_layer(layer: u32) -> Result<u32> {
    layer
        .checked_sub(1)
        .ok_or_else(|| MstError::InvalidNode("subtree below layer 0".into()).into())
}

/// Node blocks in `pool` reachable from `root` without leaving `pool`
///
/// A new node's ancestors are always new too, so this finds every
/// reachable block of the pool.
fn reachable(pool: &BlockMap, root: IpldCid) -> Result<BlockMap> {
    let mut out = BlockMap::new();
    let mut queue = vec![root];
    while let Some(cid) = queue.pop() {
        if out.has(&cid) {
            continue;
        }
        let Some(bytes) = pool.get(&cid) else {
            continue;
        };
        queue.extend(decode_node(bytes)?.iter().filter_map(NodeEntry::tree));
        out.set(cid, bytes.clone());
    }
    Ok(out)
}

/// Scratch state for one copy-on-write edit
struct Mutation<'a, S> {
    mst: &'a Mst<S>,
    created: BlockMap,
}

impl<'a, S: BlockStore + Sync + Send + 'static> Mutation<'a, S> {
    fn new(mst: &'a Mst<S>) -> Self {
        Self {
            mst,
            created: BlockMap::new(),
        }
    }

    async fn load(&self, cid: &IpldCid) -> Result<Vec<NodeEntry>> {
        match self.created.get(cid) {
            Some(bytes) => decode_node(bytes),
            None => self.mst.read_node(cid).await,
        }
    }

    fn store(&mut self, entries: &[NodeEntry]) -> Result<IpldCid> {
        self.created.add(&NodeData::from_entries(entries)?)
    }

    fn store_nonempty(&mut self, entries: &[NodeEntry]) -> Result<Option<IpldCid>> {
        if entries.is_empty() {
            Ok(None)
        } else {
            self.store(entries).map(Some)
        }
    }

    /// Node at `layer` holding only `key`, with leafless parents down to the key's layer
    fn chain(&mut self, key: &str, value: IpldCid, key_layer: u32, layer: u32) -> Result<IpldCid> {
        let leaf = NodeEntry::Leaf {
            key: SmolStr::new(key),
            value,
        };
        let mut cid = self.store(&[leaf])?;
        for _ in key_layer..layer {
            cid = self.store(&[NodeEntry::Tree(cid)])?;
        }
        Ok(cid)
    }

    /// Raise a subtree from `from` to `to` through leafless parents
    fn wrap(&mut self, cid: Option<IpldCid>, from: u32, to: u32) -> Result<Option<IpldCid>> {
        let Some(mut cid) = cid else {
            return Ok(None);
        };
        for _ in from..to {
            cid = self.store(&[NodeEntry::Tree(cid)])?;
        }
        Ok(Some(cid))
    }

    fn insert<'b>(
        &'b mut self,
        mut entries: Vec<NodeEntry>,
        layer: u32,
        key: &'b str,
        value: IpldCid,
        key_layer: u32,
    ) -> BoxFut<'b, Vec<NodeEntry>> {
        Box::pin(async move {
            let pos = upper_bound(&entries, key);
            let before = pos.checked_sub(1).and_then(|i| entries[i].tree());

            if key_layer == layer {
                let leaf = NodeEntry::Leaf {
                    key: SmolStr::new(key),
                    value,
                };
                match before {
                    Some(subtree) => {
                        // The subtree straddling the key splits in two around it
                        let (left, right) = self.split(subtree, child_layer(layer)?, key).await?;
                        let mut replacement = Vec::with_capacity(3);
                        replacement.extend(left.map(NodeEntry::Tree));
                        replacement.push(leaf);
                        replacement.extend(right.map(NodeEntry::Tree));
                        entries.splice(pos - 1..pos, replacement);
                    }
                    None => entries.insert(pos, leaf),
                }
                return Ok(entries);
            }

            let below = child_layer(layer)?;
            match before {
                Some(subtree) => {
                    let child = self.load(&subtree).await?;
                    let child = self.insert(child, below, key, value, key_layer).await?;
                    entries[pos - 1] = NodeEntry::Tree(self.store(&child)?);
                }
                None => {
                    let child = self.chain(key, value, key_layer, below)?;
                    entries.insert(pos, NodeEntry::Tree(child));
                }
            }
            Ok(entries)
        })
    }

    /// Split the node at `cid` into the parts sorting before and after `key`
    fn split<'b>(
        &'b mut self,
        cid: IpldCid,
        layer: u32,
        key: &'b str,
    ) -> BoxFut<'b, (Option<IpldCid>, Option<IpldCid>)> {
        Box::pin(async move {
            let entries = self.load(&cid).await?;
            let pos = upper_bound(&entries, key);
            let mut left = entries[..pos].to_vec();
            let mut right = entries[pos..].to_vec();

            if let Some(NodeEntry::Tree(subtree)) = left.last().cloned() {
                left.pop();
                let (sub_left, sub_right) = self.split(subtree, child_layer(layer)?, key).await?;
                left.extend(sub_left.map(NodeEntry::Tree));
                if let Some(sub_right) = sub_right {
                    right.insert(0, NodeEntry::Tree(sub_right));
                }
            }

            Ok((self.store_nonempty(&left)?, self.store_nonempty(&right)?))
        })
    }

    fn replace<'b>(
        &'b mut self,
        mut entries: Vec<NodeEntry>,
        layer: u32,
        key: &'b str,
        value: IpldCid,
        key_layer: u32,
    ) -> BoxFut<'b, Vec<NodeEntry>> {
        Box::pin(async move {
            if key_layer == layer {
                let slot = entries
                    .iter_mut()
                    .find_map(|e| match e {
                        NodeEntry::Leaf { key: k, value } if k.as_str() == key => Some(value),
                        _ => None,
                    })
                    .ok_or_else(|| RepoError::missing_key(key))?;
                *slot = value;
                return Ok(entries);
            }

            let pos = upper_bound(&entries, key);
            let subtree = pos
                .checked_sub(1)
                .and_then(|i| entries[i].tree())
                .ok_or_else(|| RepoError::missing_key(key))?;
            let child = self.load(&subtree).await?;
            let child = self
                .replace(child, child_layer(layer)?, key, value, key_layer)
                .await?;
            entries[pos - 1] = NodeEntry::Tree(self.store(&child)?);
            Ok(entries)
        })
    }

    fn remove<'b>(
        &'b mut self,
        mut entries: Vec<NodeEntry>,
        layer: u32,
        key: &'b str,
        key_layer: u32,
    ) -> BoxFut<'b, Vec<NodeEntry>> {
        Box::pin(async move {
            if key_layer == layer {
                let idx = entries
                    .iter()
                    .position(|e| e.leaf_key() == Some(key))
                    .ok_or_else(|| RepoError::missing_key(key))?;
                entries.remove(idx);
                // Subtrees that flanked the removed leaf are now adjacent
                if idx > 0 && idx < entries.len() {
                    if let (Some(left), Some(right)) = (entries[idx - 1].tree(), entries[idx].tree())
                    {
                        let merged = self.merge(left, right, child_layer(layer)?).await?;
                        entries.splice(idx - 1..=idx, [NodeEntry::Tree(merged)]);
                    }
                }
                return Ok(entries);
            }

            let pos = upper_bound(&entries, key);
            let subtree = pos
                .checked_sub(1)
                .and_then(|i| entries[i].tree())
                .ok_or_else(|| RepoError::missing_key(key))?;
            let child = self.load(&subtree).await?;
            let child = self
                .remove(child, child_layer(layer)?, key, key_layer)
                .await?;
            if child.is_empty() {
                entries.remove(pos - 1);
            } else {
                entries[pos - 1] = NodeEntry::Tree(self.store(&child)?);
            }
            Ok(entries)
        })
    }

    /// Join two sibling subtrees at `layer`, merging their facing edges
    fn merge<'b>(&'b mut self, left: IpldCid, right: IpldCid, layer: u32) -> BoxFut<'b, IpldCid> {
        Box::pin(async move {
            let mut joined = self.load(&left).await?;
            let right = self.load(&right).await?;
            let facing = (
                joined.last().and_then(NodeEntry::tree),
                right.first().and_then(NodeEntry::tree),
            );
            match facing {
                (Some(a), Some(b)) => {
                    joined.pop();
                    let merged = self.merge(a, b, child_layer(layer)?).await?;
                    joined.push(NodeEntry::Tree(merged));
                    joined.extend(right.into_iter().skip(1));
                }
                _ => joined.extend(right),
            }
            self.store(&joined)
        })
    }

    /// Store the root, dropping leafless single-subtree levels from the top
    async fn trim_top(&mut self, entries: Vec<NodeEntry>) -> Result<IpldCid> {
        let mut only = match entries.as_slice() {
            [NodeEntry::Tree(only)] => *only,
            _ => return self.store(&entries),
        };
        loop {
            match self.load(&only).await?.as_slice() {
                [NodeEntry::Tree(next)] => only = *next,
                _ => return Ok(only),
            }
        }
    }

    fn finish(self, root: IpldCid) -> Result<(Mst<S>, BlockMap)> {
        let new_blocks = reachable(&self.created, root)?;
        let mut pool = (*self.mst.pending).clone();
        pool.add_map(&new_blocks);
        let pending = reachable(&pool, root)?;
        let tree = Mst {
            storage: self.mst.storage.clone(),
            root,
            pending: Arc::new(pending),
        };
        Ok((tree, new_blocks))
    }
}
