//! Durable event log abstraction
//!
//! The log assigns sequence numbers. Rows are only ever appended; the one
//! mutation allowed afterwards is flagging a repository's rows invalidated.

use tessera_common::{Datetime, Did};

use crate::error::Result;
use crate::events::{EventType, RepoSeqRow};

pub mod file;
pub mod memory;

pub use file::FileEventLog;
pub use memory::MemoryEventLog;

/// Async append-only event log
///
/// Sequence numbers start at 1, increase strictly and are never reused, even
/// for rows that are later invalidated.
#[trait_variant::make(Send)]
pub trait EventLog: Sync {
    /// Append one row, assigning the next sequence number
    async fn append(
        &self,
        did: &Did,
        event_type: EventType,
        event: Vec<u8>,
        sequenced_at: Datetime,
    ) -> Result<RepoSeqRow>;

    /// Valid rows with `after < seq <= until`, ascending, at most `limit`
    ///
    /// Invalidated rows are skipped and do not count toward `limit`.
    async fn range(
        &self,
        after: Option<i64>,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RepoSeqRow>>;

    /// Highest sequence number assigned, if any
    async fn latest_seq(&self) -> Result<Option<i64>>;

    /// Lowest sequence number of a row sequenced at or after `time`
    async fn earliest_seq_since(&self, time: &Datetime) -> Result<Option<i64>>;

    /// Flag every row for `did` invalidated, returning how many changed
    async fn invalidate(&self, did: &Did) -> Result<usize>;
}

/// In-memory row storage shared by the log implementations
#[derive(Debug, Default)]
pub(crate) struct Rows {
    rows: Vec<RepoSeqRow>,
}

impl Rows {
    pub(crate) fn next_seq(&self) -> i64 {
        self.rows.last().map_or(1, |row| row.seq + 1)
    }

    /// `time`, raised to the last row's time if the clock went backwards
    pub(crate) fn monotonic(&self, time: Datetime) -> Datetime {
        match self.rows.last() {
            Some(last) if last.sequenced_at.as_chrono() > time.as_chrono() => {
                last.sequenced_at
            }
            _ => time,
        }
    }

    pub(crate) fn push(&mut self, row: RepoSeqRow) {
        self.rows.push(row);
    }

    pub(crate) fn range(&self, after: Option<i64>, until: Option<i64>, limit: usize) -> Vec<RepoSeqRow> {
        let start = match after {
            Some(after) => self.rows.partition_point(|row| row.seq <= after),
            None => 0,
        };
        self.rows[start..]
            .iter()
            .take_while(|row| until.is_none_or(|until| row.seq <= until))
            .filter(|row| !row.invalidated)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn latest_seq(&self) -> Option<i64> {
        self.rows.last().map(|row| row.seq)
    }

    pub(crate) fn earliest_seq_since(&self, time: &Datetime) -> Option<i64> {
        let idx = self
            .rows
            .partition_point(|row| row.sequenced_at.as_chrono() < time.as_chrono());
        self.rows.get(idx).map(|row| row.seq)
    }

    pub(crate) fn invalidate(&mut self, did: &Did) -> usize {
        let mut changed = 0;
        for row in self.rows.iter_mut().filter(|r| &r.did == did && !r.invalidated) {
            row.invalidated = true;
            changed += 1;
        }
        changed
    }
}
