//! Event sequencing
//!
//! The [`Sequencer`] appends repository events to an [`EventLog`] and fans
//! them out to live subscribers. Appending and broadcasting happen under one
//! lock, so live receivers see events in exactly the order of their sequence
//! numbers.

use smol_str::SmolStr;
use tessera_common::{Datetime, Did};
use tessera_repo::car::write_car_bytes;
use tessera_repo::storage::BlockStore;
use tessera_repo::{FormattedCommit, Repository};
use tokio::sync::{Mutex, broadcast};

use crate::config::SequencerConfig;
use crate::error::Result;
use crate::events::{
    AccountEvt, AccountStatus, CommitEvt, EventBody, HandleEvt, IdentityEvt, MigrateEvt, SeqEvt,
    TombstoneEvt,
};
use crate::log::EventLog;

/// Durable, strictly ordered event sequencer
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tessera_sequencer::{MemoryEventLog, Sequencer, SequencerConfig};
///
/// # async fn example(did: tessera_common::Did) -> tessera_sequencer::Result<()> {
/// let sequencer = Arc::new(Sequencer::new(MemoryEventLog::new(), SequencerConfig::default()));
/// let seq = sequencer.sequence_identity(&did, None).await?;
/// assert_eq!(sequencer.current_seq().await?, Some(seq));
/// # Ok(())
/// # }
/// ```
pub struct Sequencer<L: EventLog> {
    log: L,
    live: broadcast::Sender<SeqEvt>,
    append_lock: Mutex<()>,
    config: SequencerConfig,
}

impl<L: EventLog> Sequencer<L> {
    /// Create a sequencer over `log`
    pub fn new(log: L, config: SequencerConfig) -> Self {
        let (live, _) = broadcast::channel(config.live_channel_capacity.max(1));
        Self {
            log,
            live,
            append_lock: Mutex::new(()),
            config,
        }
    }

    /// The underlying log
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Settings in use
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Receive every event appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SeqEvt> {
        self.live.subscribe()
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.live.receiver_count()
    }

    async fn append(&self, body: EventBody) -> Result<i64> {
        let _guard = self.append_lock.lock().await;
        self.append_locked(body).await
    }

    /// Append and broadcast; the caller holds `append_lock`
    async fn append_locked(&self, body: EventBody) -> Result<i64> {
        let event = body.to_cbor()?;
        let row = self
            .log
            .append(body.did(), body.event_type(), event, Datetime::now())
            .await?;
        let evt = SeqEvt {
            seq: row.seq,
            time: row.sequenced_at,
            body,
        };

        tracing::debug!(
            seq = evt.seq,
            did = %evt.body.did(),
            kind = evt.body.type_tag(),
            "sequenced event"
        );

        // No receivers is fine: nobody is live right now
        let _ = self.live.send(evt);
        Ok(row.seq)
    }

    /// Build the commit event for a formatted commit
    ///
    /// Large commits are marked `tooBig`: their ops are dropped and the CAR
    /// carries only the commit block.
    pub async fn format_commit_event(&self, did: &Did, formatted: &FormattedCommit) -> Result<CommitEvt> {
        let commit = &formatted.commit;
        let too_big = formatted.ops.len() > self.config.max_event_ops
            || commit.new_blocks.byte_size() > self.config.max_event_bytes;

        let blocks = if too_big {
            let commit_block = commit.new_blocks.get(&commit.cid).cloned();
            write_car_bytes(commit.cid, commit_block.map(|bytes| (commit.cid, bytes))).await?
        } else {
            write_car_bytes(commit.cid, commit.new_blocks.clone()).await?
        };

        if too_big {
            tracing::info!(
                %did,
                rev = %commit.rev,
                ops = formatted.ops.len(),
                bytes = commit.new_blocks.byte_size(),
                "commit event too big, omitting ops and blocks"
            );
        }

        Ok(CommitEvt {
            rebase: false,
            too_big,
            repo: did.clone(),
            commit: commit.cid,
            prev: commit.prev,
            rev: commit.rev.clone(),
            since: commit.since.clone(),
            blocks,
            ops: if too_big { Vec::new() } else { formatted.ops.clone() },
            blobs: formatted.blobs.clone(),
        })
    }

    /// Sequence a commit
    pub async fn sequence_commit(&self, did: &Did, formatted: &FormattedCommit) -> Result<i64> {
        let evt = self.format_commit_event(did, formatted).await?;
        self.append(EventBody::Commit(evt)).await
    }

    /// Sequence a history-replacing commit
    ///
    /// Every earlier event for the repository is invalidated first; the rebase
    /// event carries the full repository CAR.
    pub async fn sequence_rebase<S: BlockStore + Sync + Send + 'static>(
        &self,
        repo: &Repository<S>,
    ) -> Result<i64> {
        let did = repo.did().clone();
        let commit = repo.current_commit();
        let blocks = repo.export_car().await?;

        let _guard = self.append_lock.lock().await;
        let invalidated = self.log.invalidate(&did).await?;
        tracing::info!(%did, invalidated, rev = %commit.rev, "rebasing repository");

        self.append_locked(EventBody::Commit(CommitEvt {
            rebase: true,
            too_big: false,
            repo: did,
            commit: *repo.current_commit_cid(),
            prev: commit.prev,
            rev: commit.rev.clone(),
            since: None,
            blocks,
            ops: Vec::new(),
            blobs: Vec::new(),
        }))
        .await
    }

    /// Sequence a handle change
    pub async fn sequence_handle(&self, did: &Did, handle: impl Into<SmolStr>) -> Result<i64> {
        self.append(EventBody::Handle(HandleEvt {
            did: did.clone(),
            handle: handle.into(),
        }))
        .await
    }

    /// Sequence an identity change
    pub async fn sequence_identity(&self, did: &Did, handle: Option<SmolStr>) -> Result<i64> {
        self.append(EventBody::Identity(IdentityEvt {
            did: did.clone(),
            handle,
        }))
        .await
    }

    /// Sequence an account status change
    pub async fn sequence_account(
        &self,
        did: &Did,
        active: bool,
        status: Option<AccountStatus>,
    ) -> Result<i64> {
        self.append(EventBody::Account(AccountEvt {
            did: did.clone(),
            active,
            status,
        }))
        .await
    }

    /// Sequence a repository deletion
    pub async fn sequence_tombstone(&self, did: &Did) -> Result<i64> {
        self.append(EventBody::Tombstone(TombstoneEvt { did: did.clone() }))
            .await
    }

    /// Sequence a move to another host
    pub async fn sequence_migrate(&self, did: &Did, migrate_to: Option<SmolStr>) -> Result<i64> {
        self.append(EventBody::Migrate(MigrateEvt {
            did: did.clone(),
            migrate_to,
        }))
        .await
    }

    /// Latest assigned sequence number
    pub async fn current_seq(&self) -> Result<Option<i64>> {
        self.log.latest_seq().await
    }

    /// Valid events with `after < seq <= until`, ascending, at most `limit`
    pub async fn request_seq_range(
        &self,
        after: Option<i64>,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SeqEvt>> {
        self.log
            .range(after, until, limit)
            .await?
            .iter()
            .map(|row| row.to_event())
            .collect()
    }

    /// First sequence number sequenced at or after `time`
    pub async fn earliest_seq_since(&self, time: &Datetime) -> Result<Option<i64>> {
        self.log.earliest_seq_since(time).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryEventLog;
    use ipld_core::ipld::Ipld;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tessera_common::{KeyAlgorithm, Keypair, RecordPath, TidClock};
    use tessera_repo::car::parse_car_bytes;
    use tessera_repo::{MemoryBlockStore, RecordWrite};

    fn did() -> Did {
        Did::new("did:plc:seqtest").unwrap()
    }

    fn record(i: usize) -> Ipld {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), Ipld::Integer(i as i128));
        Ipld::Map(map)
    }

    async fn repo_with(
        n: usize,
    ) -> (Repository<MemoryBlockStore>, FormattedCommit, Keypair, TidClock) {
        let key = Keypair::generate(KeyAlgorithm::Secp256k1);
        let clock = TidClock::new();
        let mut repo = Repository::create(Arc::new(MemoryBlockStore::new()), did(), &key, &clock)
            .await
            .unwrap();
        let writes: Vec<_> = (0..n)
            .map(|i| RecordWrite::Create {
                path: RecordPath::parse(format!("com.example.item/{:04}", i)).unwrap(),
                record: record(i),
            })
            .collect();
        let formatted = repo.commit(&writes, &key, &clock).await.unwrap();
        (repo, formatted, key, clock)
    }

    #[tokio::test]
    async fn commit_event_carries_ops_and_blocks() {
        let sequencer = Sequencer::new(MemoryEventLog::new(), SequencerConfig::default());
        let (_, formatted, _, _) = repo_with(3).await;
        let seq = sequencer.sequence_commit(&did(), &formatted).await.unwrap();

        let events = sequencer.request_seq_range(None, None, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, seq);
        let EventBody::Commit(evt) = &events[0].body else {
            panic!("expected a commit");
        };
        assert!(!evt.too_big);
        assert_eq!(evt.ops.len(), 3);
        assert_eq!(evt.since, formatted.commit.since);

        let car = parse_car_bytes(&evt.blocks).await.unwrap();
        assert_eq!(car.root, formatted.commit.cid);
        assert_eq!(car.blocks.len(), formatted.commit.new_blocks.len());
    }

    #[tokio::test]
    async fn too_big_commits_are_trimmed() {
        let config = SequencerConfig::builder().max_event_ops(2).build();
        let sequencer = Sequencer::new(MemoryEventLog::new(), config);
        let (_, formatted, _, _) = repo_with(5).await;
        sequencer.sequence_commit(&did(), &formatted).await.unwrap();

        let events = sequencer.request_seq_range(None, None, 10).await.unwrap();
        let EventBody::Commit(evt) = &events[0].body else {
            panic!("expected a commit");
        };
        assert!(evt.too_big);
        assert!(evt.ops.is_empty());
        let car = parse_car_bytes(&evt.blocks).await.unwrap();
        assert_eq!(car.blocks.len(), 1);
        assert!(car.blocks.has(&formatted.commit.cid));
    }

    #[tokio::test]
    async fn rebase_invalidates_history() {
        let sequencer = Sequencer::new(MemoryEventLog::new(), SequencerConfig::default());
        let (repo, formatted, _, _) = repo_with(2).await;
        let other = Did::new("did:plc:bystander").unwrap();

        sequencer.sequence_commit(&did(), &formatted).await.unwrap();
        sequencer.sequence_handle(&did(), "alice.example.com").await.unwrap();
        sequencer.sequence_identity(&other, None).await.unwrap();
        let rebase_seq = sequencer.sequence_rebase(&repo).await.unwrap();

        let events = sequencer.request_seq_range(None, None, 10).await.unwrap();
        let seqs: Vec<_> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, rebase_seq]);
        let EventBody::Commit(evt) = &events[1].body else {
            panic!("expected a commit");
        };
        assert!(evt.rebase);
        assert_eq!(rebase_seq, 4);
    }

    #[tokio::test]
    async fn live_receivers_see_append_order() {
        let sequencer = Arc::new(Sequencer::new(MemoryEventLog::new(), SequencerConfig::default()));
        let mut rx = sequencer.subscribe();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let sequencer = sequencer.clone();
            tasks.push(tokio::spawn(async move {
                let did = Did::new(format!("did:plc:writer{}", i)).unwrap();
                sequencer.sequence_tombstone(&did).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = 0;
        for _ in 0..20 {
            let evt = rx.recv().await.unwrap();
            assert_eq!(evt.seq, last + 1);
            last = evt.seq;
        }
        assert_eq!(sequencer.current_seq().await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn account_and_migrate_events() {
        let sequencer = Sequencer::new(MemoryEventLog::new(), SequencerConfig::default());
        sequencer
            .sequence_account(&did(), false, Some(AccountStatus::Takendown))
            .await
            .unwrap();
        sequencer
            .sequence_migrate(&did(), Some("pds.example.com".into()))
            .await
            .unwrap();

        let events = sequencer.request_seq_range(Some(0), None, 10).await.unwrap();
        assert_eq!(events[0].body.type_tag(), "#account");
        assert_eq!(events[1].body.type_tag(), "#migrate");
        assert_eq!(
            sequencer.earliest_seq_since(&events[0].time).await.unwrap(),
            Some(1)
        );
    }
}
