//! Serialized repository writes
//!
//! Each write to a repository runs as one transaction: read the current
//! root, format the commit, sequence it, apply it to storage. [`RepoWriter`]
//! holds a per-DID lock across all four steps so two writers never format
//! against the same root.
//!
//! The new blocks are stored before the event is appended, but the root only
//! moves once the event exists. If sequencing fails the previous commit stays
//! authoritative and the stored blocks are unreachable.

use std::collections::HashMap;
use std::sync::Arc;

use tessera_common::{Did, SigningKey, TidClock};
use tessera_repo::storage::BlockStore;
use tessera_repo::{FormattedCommit, RecordWrite, Repository};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, SequencerError};
use crate::log::EventLog;
use crate::sequencer::Sequencer;

/// Outcome of one write transaction
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// The commit and its ops
    pub commit: FormattedCommit,
    /// Sequence number of the commit event
    pub seq: i64,
}

/// Runs repository writes one at a time per DID and sequences their commits
pub struct RepoWriter<L: EventLog> {
    sequencer: Arc<Sequencer<L>>,
    clock: TidClock,
    locks: Mutex<HashMap<Did, Arc<Mutex<()>>>>,
}

impl<L: EventLog> RepoWriter<L> {
    /// Create a writer sequencing into `sequencer`
    pub fn new(sequencer: Arc<Sequencer<L>>, clock: TidClock) -> Self {
        Self {
            sequencer,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The sequencer commits go to
    pub fn sequencer(&self) -> &Arc<Sequencer<L>> {
        &self.sequencer
    }

    async fn lock(&self, did: &Did) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop locks nobody else holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(did.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Create a repository with `writes` as its first commit, and sequence it
    pub async fn create_repo<S, K>(
        &self,
        storage: Arc<S>,
        did: &Did,
        writes: &[RecordWrite],
        key: &K,
    ) -> Result<WriteResult>
    where
        S: BlockStore + Sync + Send + 'static,
        K: SigningKey + ?Sized,
    {
        let _guard = self.lock(did).await;
        let commit =
            Repository::format_init_commit(storage.clone(), did.clone(), writes, key, &self.clock)
                .await?;
        let seq = self.sequence_then_apply(&*storage, did, &commit).await?;

        tracing::info!(%did, seq, rev = %commit.commit.rev, "created repository");
        Ok(WriteResult { commit, seq })
    }

    /// Apply `writes` to the repository in `storage` as one commit, and
    /// sequence it
    ///
    /// The repository is loaded from storage inside the lock, so the commit
    /// always builds on the latest root.
    pub async fn apply_writes<S, K>(
        &self,
        storage: Arc<S>,
        did: &Did,
        writes: &[RecordWrite],
        key: &K,
    ) -> Result<WriteResult>
    where
        S: BlockStore + Sync + Send + 'static,
        K: SigningKey + ?Sized,
    {
        let _guard = self.lock(did).await;
        let repo = Repository::load(storage.clone()).await?;
        if repo.did() != did {
            return Err(SequencerError::DidMismatch {
                found: repo.did().to_string(),
                expected: did.to_string(),
            });
        }

        let commit = repo.format_commit(writes, key, &self.clock).await?;
        let seq = self.sequence_then_apply(&*storage, did, &commit).await?;

        tracing::debug!(%did, seq, rev = %commit.commit.rev, ops = commit.ops.len(), "applied writes");
        Ok(WriteResult { commit, seq })
    }

    async fn sequence_then_apply<S>(
        &self,
        storage: &S,
        did: &Did,
        commit: &FormattedCommit,
    ) -> Result<i64>
    where
        S: BlockStore + Sync + Send + 'static,
    {
        let data = &commit.commit;
        storage.put_many(data.new_blocks.clone()).await?;
        let seq = self.sequencer.sequence_commit(did, commit).await?;
        if let Err(e) = storage.apply_commit(data).await {
            tracing::error!(%did, seq, rev = %data.rev, error = %e, "commit sequenced but not applied");
            return Err(e.into());
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequencerConfig;
    use crate::events::{EventBody, EventType, RepoSeqRow};
    use crate::log::MemoryEventLog;
    use ipld_core::ipld::Ipld;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tessera_common::{Datetime, KeyAlgorithm, Keypair, RecordPath};
    use tessera_repo::MemoryBlockStore;

    fn create(rkey: &str) -> RecordWrite {
        RecordWrite::Create {
            path: RecordPath::parse(format!("com.example.note/{}", rkey)).unwrap(),
            record: Ipld::String(rkey.to_string()),
        }
    }

    fn writer() -> RepoWriter<MemoryEventLog> {
        let sequencer = Arc::new(Sequencer::new(MemoryEventLog::new(), SequencerConfig::default()));
        RepoWriter::new(sequencer, TidClock::new())
    }

    #[tokio::test]
    async fn concurrent_writes_chain_commits() {
        let writer = Arc::new(writer());
        let storage = Arc::new(MemoryBlockStore::new());
        let key = Arc::new(Keypair::generate(KeyAlgorithm::Secp256k1));
        let did = Did::new("did:plc:writertest").unwrap();
        writer
            .create_repo(storage.clone(), &did, &[], &*key)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let (writer, storage, key, did) = (writer.clone(), storage.clone(), key.clone(), did.clone());
            tasks.push(tokio::spawn(async move {
                writer
                    .apply_writes(storage, &did, &[create(&format!("n{}", i))], &*key)
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let repo = Repository::load(storage).await.unwrap();
        assert_eq!(repo.list_records("com.example.note").await.unwrap().len(), 8);

        // Each commit builds on the one sequenced before it
        let events = writer
            .sequencer()
            .request_seq_range(None, None, 100)
            .await
            .unwrap();
        assert_eq!(events.len(), 9);
        for pair in events.windows(2) {
            let (EventBody::Commit(a), EventBody::Commit(b)) = (&pair[0].body, &pair[1].body) else {
                panic!("expected commits");
            };
            assert_eq!(b.prev, Some(a.commit));
            assert_eq!(b.since.as_ref(), Some(&a.rev));
        }
    }

    /// Memory log whose appends fail while `failing` is set
    #[derive(Debug, Default)]
    struct FlakyLog {
        inner: MemoryEventLog,
        failing: AtomicBool,
    }

    impl EventLog for FlakyLog {
        async fn append(
            &self,
            did: &Did,
            event_type: EventType,
            event: Vec<u8>,
            sequenced_at: Datetime,
        ) -> Result<RepoSeqRow> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SequencerError::log(std::io::Error::other("log unavailable")));
            }
            self.inner.append(did, event_type, event, sequenced_at).await
        }

        async fn range(
            &self,
            after: Option<i64>,
            until: Option<i64>,
            limit: usize,
        ) -> Result<Vec<RepoSeqRow>> {
            self.inner.range(after, until, limit).await
        }

        async fn latest_seq(&self) -> Result<Option<i64>> {
            self.inner.latest_seq().await
        }

        async fn earliest_seq_since(&self, time: &Datetime) -> Result<Option<i64>> {
            self.inner.earliest_seq_since(time).await
        }

        async fn invalidate(&self, did: &Did) -> Result<usize> {
            self.inner.invalidate(did).await
        }
    }

    #[tokio::test]
    async fn failed_append_keeps_previous_root() {
        let sequencer = Arc::new(Sequencer::new(FlakyLog::default(), SequencerConfig::default()));
        let writer = RepoWriter::new(sequencer.clone(), TidClock::new());
        let storage = Arc::new(MemoryBlockStore::new());
        let key = Keypair::generate(KeyAlgorithm::P256);
        let did = Did::new("did:plc:flaky").unwrap();
        let first = writer.create_repo(storage.clone(), &did, &[create("a")], &key).await.unwrap();

        sequencer.log().failing.store(true, Ordering::SeqCst);
        let err = writer
            .apply_writes(storage.clone(), &did, &[create("b")], &key)
            .await
            .unwrap_err();
        assert!(matches!(err, SequencerError::Log(_)));
        assert_eq!(storage.get_root().await.unwrap(), Some(first.commit.commit.cid));
        let repo = Repository::load(storage.clone()).await.unwrap();
        assert_eq!(repo.list_records("com.example.note").await.unwrap().len(), 1);

        // The next commit follows the last sequenced one, leaving no gap
        sequencer.log().failing.store(false, Ordering::SeqCst);
        let second = writer
            .apply_writes(storage.clone(), &did, &[create("b")], &key)
            .await
            .unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.commit.commit.prev, Some(first.commit.commit.cid));
        assert_eq!(second.commit.commit.since.as_ref(), Some(&first.commit.commit.rev));
        assert_eq!(storage.get_root().await.unwrap(), Some(second.commit.commit.cid));
    }

    #[tokio::test]
    async fn failed_create_leaves_no_root() {
        let log = FlakyLog::default();
        log.failing.store(true, Ordering::SeqCst);
        let writer = RepoWriter::new(
            Arc::new(Sequencer::new(log, SequencerConfig::default())),
            TidClock::new(),
        );
        let storage = Arc::new(MemoryBlockStore::new());
        let key = Keypair::generate(KeyAlgorithm::Ed25519);
        let did = Did::new("did:plc:neverborn").unwrap();

        assert!(writer.create_repo(storage.clone(), &did, &[], &key).await.is_err());
        assert_eq!(storage.get_root().await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_did_is_rejected() {
        let writer = writer();
        let storage = Arc::new(MemoryBlockStore::new());
        let key = Keypair::generate(KeyAlgorithm::Ed25519);
        let did = Did::new("did:plc:owner").unwrap();
        writer.create_repo(storage.clone(), &did, &[create("a")], &key).await.unwrap();

        let other = Did::new("did:plc:intruder").unwrap();
        let err = writer
            .apply_writes(storage, &other, &[create("b")], &key)
            .await
            .unwrap_err();
        assert!(matches!(err, SequencerError::DidMismatch { .. }));
    }
}
