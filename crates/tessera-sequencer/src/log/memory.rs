//! In-memory event log

use std::sync::Arc;

use tessera_common::{Datetime, Did};
use tokio::sync::RwLock;

use super::{EventLog, Rows};
use crate::error::Result;
use crate::events::{EventType, RepoSeqRow};

/// In-memory event log
///
/// Clones share the same rows. Nothing survives the process; use
/// [`FileEventLog`](super::FileEventLog) for that.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLog {
    rows: Arc<RwLock<Rows>>,
}

impl MemoryEventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for MemoryEventLog {
    async fn append(
        &self,
        did: &Did,
        event_type: EventType,
        event: Vec<u8>,
        sequenced_at: Datetime,
    ) -> Result<RepoSeqRow> {
        let mut rows = self.rows.write().await;
        let row = RepoSeqRow {
            seq: rows.next_seq(),
            did: did.clone(),
            event_type,
            event,
            invalidated: false,
            sequenced_at: rows.monotonic(sequenced_at),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn range(
        &self,
        after: Option<i64>,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RepoSeqRow>> {
        Ok(self.rows.read().await.range(after, until, limit))
    }

    async fn latest_seq(&self) -> Result<Option<i64>> {
        Ok(self.rows.read().await.latest_seq())
    }

    async fn earliest_seq_since(&self, time: &Datetime) -> Result<Option<i64>> {
        Ok(self.rows.read().await.earliest_seq_since(time))
    }

    async fn invalidate(&self, did: &Did) -> Result<usize> {
        Ok(self.rows.write().await.invalidate(did))
    }
}
