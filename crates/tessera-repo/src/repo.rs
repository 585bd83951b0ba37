//! High-level repository operations
//!
//! Turns batches of record writes into signed commits. Formatting a commit is
//! pure with respect to storage: it reads the current tree and produces a
//! [`CommitData`] holding every new block and every block that became
//! unreachable. Applying it is a single atomic [`BlockStore::apply_commit`].

use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;
use smol_str::SmolStr;
use tessera_common::types::crypto::{PublicKey, SigningKey};
use tessera_common::{Did, RecordPath, Tid, TidClock};

use crate::block::{BlockMap, CidSet, decode_block, encode_block};
use crate::car::{parse_car_bytes, write_car, write_car_bytes};
use crate::commit::proof::proof_blocks;
use crate::commit::{Commit, UnsignedCommit};
use crate::error::{RepoError, Result};
use crate::mst::{Mst, MstDiff};
use crate::storage::{self, BlockStore, MemoryBlockStore};

/// Everything one commit changes, ready to apply atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    /// Commit CID
    pub cid: IpldCid,

    /// New revision TID
    pub rev: Tid,

    /// Previous revision TID (None for initial commit)
    pub since: Option<Tid>,

    /// Previous commit CID (None for initial commit)
    pub prev: Option<IpldCid>,

    /// New MST root CID
    pub data: IpldCid,

    /// New blocks to persist (commit, MST nodes, records)
    pub new_blocks: BlockMap,

    /// Blocks no longer reachable from the new commit
    pub removed_cids: CidSet,
}

/// One record write in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
    /// Create a record; fails with `DuplicateKey` if the path exists
    Create {
        /// Record path (collection/rkey)
        path: RecordPath,
        /// Record value
        record: Ipld,
    },

    /// Replace a record; fails with `MissingKey` if the path does not exist
    Update {
        /// Record path (collection/rkey)
        path: RecordPath,
        /// New record value
        record: Ipld,
        /// Expected current CID
        swap: Option<IpldCid>,
    },

    /// Delete a record; fails with `MissingKey` if the path does not exist
    Delete {
        /// Record path (collection/rkey)
        path: RecordPath,
        /// Expected current CID
        swap: Option<IpldCid>,
    },
}

impl RecordWrite {
    /// Path this write targets
    pub fn path(&self) -> &RecordPath {
        match self {
            RecordWrite::Create { path, .. }
            | RecordWrite::Update { path, .. }
            | RecordWrite::Delete { path, .. } => path,
        }
    }
}

/// Kind of change an operation made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoAction {
    /// Record created
    Create,
    /// Record replaced
    Update,
    /// Record removed
    Delete,
}

impl RepoAction {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoAction::Create => "create",
            RepoAction::Update => "update",
            RepoAction::Delete => "delete",
        }
    }
}

impl Display for RepoAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record-level operation produced by a commit
///
/// Serializes with an explicit `null` CID for deletes; `prev` is omitted for
/// creates.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RepoOp {
    /// What happened
    pub action: RepoAction,
    /// Record path
    pub path: SmolStr,
    /// New record CID (None for deletes)
    pub cid: Option<IpldCid>,
    /// Previous record CID (None for creates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<IpldCid>,
}

/// A formatted commit plus the record-level view of what it changed
#[derive(Debug, Clone)]
pub struct FormattedCommit {
    /// Blocks and pointers to apply
    pub commit: CommitData,
    /// Operations in write order
    pub ops: Vec<RepoOp>,
    /// Blob CIDs referenced by created or updated records
    pub blobs: Vec<IpldCid>,
}

struct AppliedWrites<S> {
    mst: Mst<S>,
    records: BlockMap,
    ops: Vec<RepoOp>,
    blobs: Vec<IpldCid>,
}

async fn apply_writes<S: BlockStore + Sync + Send + 'static>(
    mut mst: Mst<S>,
    writes: &[RecordWrite],
) -> Result<AppliedWrites<S>> {
    let mut records = BlockMap::new();
    let mut ops = Vec::with_capacity(writes.len());
    let mut blobs = Vec::new();

    for write in writes {
        let key = write.path().as_str();
        let op = match write {
            RecordWrite::Create { record, .. } => {
                let cid = records.add(record).map_err(|e| {
                    e.with_context(format!("serializing record for {}", key))
                })?;
                collect_blobs(record, &mut blobs);
                mst = mst.add(key, cid).await?.0;
                RepoOp {
                    action: RepoAction::Create,
                    path: SmolStr::new(key),
                    cid: Some(cid),
                    prev: None,
                }
            }
            RecordWrite::Update { record, swap, .. } => {
                let prev = current_value(&mst, key, *swap).await?;
                let cid = records.add(record).map_err(|e| {
                    e.with_context(format!("serializing record for {}", key))
                })?;
                collect_blobs(record, &mut blobs);
                mst = mst.update(key, cid).await?.0;
                RepoOp {
                    action: RepoAction::Update,
                    path: SmolStr::new(key),
                    cid: Some(cid),
                    prev: Some(prev),
                }
            }
            RecordWrite::Delete { swap, .. } => {
                let prev = current_value(&mst, key, *swap).await?;
                mst = mst.delete(key).await?.0;
                RepoOp {
                    action: RepoAction::Delete,
                    path: SmolStr::new(key),
                    cid: None,
                    prev: Some(prev),
                }
            }
        };
        ops.push(op);
    }

    blobs.sort();
    blobs.dedup();
    Ok(AppliedWrites {
        mst,
        records,
        ops,
        blobs,
    })
}

async fn current_value<S: BlockStore + Sync + Send + 'static>(
    mst: &Mst<S>,
    key: &str,
    swap: Option<IpldCid>,
) -> Result<IpldCid> {
    let current = mst
        .get(key)
        .await?
        .ok_or_else(|| RepoError::missing_key(key))?;
    match swap {
        Some(expected) if expected != current => {
            Err(RepoError::swap_mismatch(key, expected, Some(current)))
        }
        _ => Ok(current),
    }
}

/// Collect CIDs of `{"$type": "blob", "ref": <link>}` objects anywhere in `value`
pub fn collect_blobs(value: &Ipld, out: &mut Vec<IpldCid>) {
    match value {
        Ipld::Map(map) => {
            let is_blob = matches!(map.get("$type"), Some(Ipld::String(t)) if t == "blob");
            if let (true, Some(Ipld::Link(cid))) = (is_blob, map.get("ref")) {
                out.push(*cid);
            }
            for inner in map.values() {
                collect_blobs(inner, out);
            }
        }
        Ipld::List(items) => {
            for inner in items {
                collect_blobs(inner, out);
            }
        }
        _ => {}
    }
}

/// Record blocks newly referenced by `diff`
fn referenced_records(diff: &MstDiff, records: &BlockMap) -> BlockMap {
    diff.new_leaf_cids
        .iter()
        .filter_map(|cid| records.get(cid).map(|bytes| (*cid, bytes.clone())))
        .collect()
}

/// High-level repository operations
///
/// Holds the current commit and tree of one repository over a block store.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_repo::{Repository, RecordWrite, MemoryBlockStore};
/// use tessera_common::{Did, Keypair, KeyAlgorithm, RecordPath, TidClock};
///
/// # async fn example() -> tessera_repo::Result<()> {
/// let storage = Arc::new(MemoryBlockStore::new());
/// let key = Keypair::generate(KeyAlgorithm::Secp256k1);
/// let clock = TidClock::new();
/// let did = Did::new("did:plc:example")?;
/// let mut repo = Repository::create(storage, did, &key, &clock).await?;
///
/// let write = RecordWrite::Create {
///     path: RecordPath::parse("com.example.post/3l5yhcgz7y42y")?,
///     record: ipld!({"text": "hello"}),
/// };
/// let formatted = repo.commit(&[write], &key, &clock).await?;
/// # Ok(())
/// # }
/// ```
pub struct Repository<S: BlockStore> {
    mst: Mst<S>,
    storage: Arc<S>,
    commit: Commit,
    commit_cid: IpldCid,
}

impl<S: BlockStore + Sync + Send + 'static> Repository<S> {
    /// Load the repository whose commit the store's root points at
    pub async fn load(storage: Arc<S>) -> Result<Self> {
        let root = storage
            .get_root()
            .await?
            .ok_or_else(|| RepoError::not_found("repository root", "store has no commit"))?;
        Self::from_commit(storage, &root).await
    }

    /// Load from a specific commit CID
    pub async fn from_commit(storage: Arc<S>, commit_cid: &IpldCid) -> Result<Self> {
        let bytes = storage::get_bytes(&*storage, commit_cid).await?;
        let commit = Commit::from_cbor(&bytes)?;
        let mst = Mst::load_checked(storage.clone(), commit.data).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(did = %commit.did, rev = %commit.rev, %commit_cid, "loaded repository");

        Ok(Self {
            mst,
            storage,
            commit,
            commit_cid: *commit_cid,
        })
    }

    /// Format the first commit of a new repository
    ///
    /// `writes` may be empty, giving a commit over the empty tree.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(did = %did, writes = writes.len())))]
    pub async fn format_init_commit<K: SigningKey + ?Sized>(
        storage: Arc<S>,
        did: Did,
        writes: &[RecordWrite],
        key: &K,
        clock: &TidClock,
    ) -> Result<FormattedCommit> {
        let applied = apply_writes(Mst::new(storage), writes).await?;
        let diff = applied.mst.diff_from_empty().await?;

        let mut new_blocks = diff.new_mst_blocks.clone();
        new_blocks.add_map(&referenced_records(&diff, &applied.records));

        let rev = clock.next(None);
        let data = applied.mst.root();
        let commit = UnsignedCommit::new(did, data, rev.clone(), None).sign(key)?;
        let (cid, bytes) = commit.to_block()?;
        new_blocks.set(cid, bytes);

        Ok(FormattedCommit {
            commit: CommitData {
                cid,
                rev,
                since: None,
                prev: None,
                data,
                new_blocks,
                removed_cids: CidSet::new(),
            },
            ops: applied.ops,
            blobs: applied.blobs,
        })
    }

    /// Create a new repository and apply its first commit to `storage`
    pub async fn create<K: SigningKey + ?Sized>(
        storage: Arc<S>,
        did: Did,
        key: &K,
        clock: &TidClock,
    ) -> Result<Self> {
        let formatted = Self::format_init_commit(storage.clone(), did, &[], key, clock).await?;
        storage.apply_commit(&formatted.commit).await?;
        Self::from_commit(storage, &formatted.commit.cid).await
    }

    /// Format a commit applying `writes` in order, without touching storage
    ///
    /// The new revision comes from `clock` and is strictly greater than the
    /// current one.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(did = %self.commit.did, writes = writes.len())))]
    pub async fn format_commit<K: SigningKey + ?Sized>(
        &self,
        writes: &[RecordWrite],
        key: &K,
        clock: &TidClock,
    ) -> Result<FormattedCommit> {
        let applied = apply_writes(self.mst.clone(), writes).await?;
        let diff = self.mst.diff(&applied.mst).await?;

        let mut new_blocks = diff.new_mst_blocks.clone();
        new_blocks.add_map(&referenced_records(&diff, &applied.records));

        let mut removed_cids = diff.removed_mst_blocks.clone();
        let mut dropped_records = diff.removed_leaf_cids.clone();
        dropped_records.subtract_set(&diff.new_leaf_cids);
        if !dropped_records.is_empty() {
            // Identical records share one block; keep any still referenced elsewhere
            for (_, cid) in applied.mst.leaves().await? {
                dropped_records.delete(&cid);
            }
        }
        removed_cids.add_set(&dropped_records);
        removed_cids.add(self.commit_cid);

        let rev = clock.next(Some(&self.commit.rev));
        let data = applied.mst.root();
        let commit = UnsignedCommit::new(
            self.commit.did.clone(),
            data,
            rev.clone(),
            Some(self.commit_cid),
        )
        .sign(key)?;
        let (cid, bytes) = commit.to_block()?;
        new_blocks.set(cid, bytes);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            did = %self.commit.did,
            %rev,
            ops = applied.ops.len(),
            new_blocks = new_blocks.len(),
            removed = removed_cids.len(),
            "formatted commit"
        );

        Ok(FormattedCommit {
            commit: CommitData {
                cid,
                rev,
                since: Some(self.commit.rev.clone()),
                prev: Some(self.commit_cid),
                data,
                new_blocks,
                removed_cids,
            },
            ops: applied.ops,
            blobs: applied.blobs,
        })
    }

    /// Apply a formatted commit to storage and advance to it
    pub async fn apply_commit(&mut self, commit: &CommitData) -> Result<()> {
        self.storage.apply_commit(commit).await?;
        *self = Self::from_commit(self.storage.clone(), &commit.cid).await?;
        Ok(())
    }

    /// Format and apply in one step
    pub async fn commit<K: SigningKey + ?Sized>(
        &mut self,
        writes: &[RecordWrite],
        key: &K,
        clock: &TidClock,
    ) -> Result<FormattedCommit> {
        let formatted = self.format_commit(writes, key, clock).await?;
        self.apply_commit(&formatted.commit).await?;
        Ok(formatted)
    }

    /// CID of the record at `path`
    pub async fn get_record_cid(&self, path: &str) -> Result<Option<IpldCid>> {
        self.mst.get(path).await
    }

    /// Record value at `path`
    pub async fn get_record(&self, path: &str) -> Result<Option<Ipld>> {
        let Some(cid) = self.mst.get(path).await? else {
            return Ok(None);
        };
        let bytes = storage::get_bytes(&*self.storage, &cid).await?;
        decode_block(&bytes).map(Some)
    }

    /// Records in `collection`, in key order
    pub async fn list_records(&self, collection: &str) -> Result<Vec<(SmolStr, IpldCid)>> {
        self.mst.list(&format!("{}/", collection)).await
    }

    /// Every block of the current state, commit first
    async fn export_blocks(&self) -> Result<Vec<(IpldCid, Bytes)>> {
        let commit_bytes = storage::get_bytes(&*self.storage, &self.commit_cid).await?;
        let (nodes, leaves) = self.mst.collect_blocks().await?;
        let (records, missing) = self.storage.get_many(&leaves).await?;
        if let Some(cid) = missing.first() {
            return Err(RepoError::not_found("record block", cid));
        }

        let mut out = Vec::with_capacity(1 + nodes.len() + records.len());
        out.push((self.commit_cid, commit_bytes));
        out.extend(nodes);
        out.extend(records);
        Ok(out)
    }

    /// Export the full repository as CAR bytes rooted at the current commit
    pub async fn export_car(&self) -> Result<Vec<u8>> {
        write_car_bytes(self.commit_cid, self.export_blocks().await?).await
    }

    /// Export the full repository to a CAR file
    pub async fn export_car_file(&self, path: impl AsRef<Path>) -> Result<()> {
        write_car(path, vec![self.commit_cid], self.export_blocks().await?).await
    }

    /// Import a full repository CAR into `storage`
    ///
    /// Every block hash is checked, the tree's shape is validated, and every
    /// record must be present. When `did` or `pubkey` are given the commit
    /// must match them.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(bytes = car.len())))]
    pub async fn import_car(
        storage: Arc<S>,
        car: &[u8],
        did: Option<&Did>,
        pubkey: Option<&PublicKey>,
    ) -> Result<Self> {
        let parsed = parse_car_bytes(car).await?;
        let commit_bytes = parsed
            .blocks
            .get(&parsed.root)
            .ok_or_else(|| RepoError::not_found("commit block", parsed.root))?;
        let commit = Commit::from_cbor(commit_bytes)?;
        if let Some(did) = did {
            commit.check_follows(did, None)?;
        }
        if let Some(pubkey) = pubkey {
            commit.verify(pubkey)?;
        }

        let staged = Mst::load(
            Arc::new(MemoryBlockStore::new_from_blocks(parsed.blocks.clone())),
            commit.data,
        );
        staged.verify_structure().await?;
        let (_, leaves) = staged.collect_blocks().await?;
        if let Some(cid) = leaves.iter().find(|cid| !parsed.blocks.has(cid)) {
            return Err(RepoError::not_found("record block", cid));
        }

        let data = CommitData {
            cid: parsed.root,
            rev: commit.rev.clone(),
            since: None,
            prev: commit.prev,
            data: commit.data,
            new_blocks: parsed.blocks,
            removed_cids: CidSet::new(),
        };
        storage.apply_commit(&data).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(did = %commit.did, rev = %commit.rev, records = leaves.len(), "imported repository");

        Self::from_commit(storage, &data.cid).await
    }

    /// CAR proving the presence or absence of `path` under the current commit
    pub async fn record_proof(&self, path: &str) -> Result<Vec<u8>> {
        let commit_bytes = storage::get_bytes(&*self.storage, &self.commit_cid).await?;
        let mut blocks = vec![(self.commit_cid, commit_bytes)];
        blocks.extend(proof_blocks(&self.mst, path).await?);
        write_car_bytes(self.commit_cid, blocks).await
    }

    /// Get the underlying MST
    pub fn mst(&self) -> &Mst<S> {
        &self.mst
    }

    /// Get reference to the storage
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get the current commit
    pub fn current_commit(&self) -> &Commit {
        &self.commit
    }

    /// Get the current commit CID
    pub fn current_commit_cid(&self) -> &IpldCid {
        &self.commit_cid
    }

    /// Get the DID from the current commit
    pub fn did(&self) -> &Did {
        self.commit.did()
    }

    /// Get the current revision
    pub fn rev(&self) -> &Tid {
        self.commit.rev()
    }
}

impl<S: BlockStore> Display for Repository<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository({} @ {}, commit {})",
            self.commit.did, self.commit.rev, self.commit_cid
        )
    }
}

/// Encode a record the way commits store it
pub fn record_block(record: &Ipld) -> Result<(IpldCid, Bytes)> {
    encode_block(record)
}
