//! Per-subscriber outbox
//!
//! An [`Outbox`] turns a cursor into one gap-free, ordered stream: it pages
//! through the durable log from the cursor, then switches to the sequencer's
//! live broadcast without losing or repeating anything at the seam.
//!
//! The live subscription is taken when the outbox is created, before the first
//! read, so every event appended after that point is either read from the log
//! or received live. Events are only queued when their seq is above the
//! highest one already queued, which removes the overlap between the two
//! sources.
//!
//! While backfilling, live events are held in a cutover buffer that is pruned
//! as pages pass them. Every live event was appended before it was broadcast,
//! so when the buffer outgrows `max_buffer_size` it is simply emptied and the
//! log reads deliver those events instead. Backfill is therefore paced by the
//! consumer alone, however far behind the writers it starts. Only the live
//! backlog can make a consumer too slow.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use n0_future::Stream;
use tessera_common::Datetime;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_util::sync::CancellationToken;

use crate::config::OutboxOpts;
use crate::error::{Result, SequencerError};
use crate::events::{InfoMsg, OutboxItem, SeqEvt};
use crate::log::EventLog;
use crate::sequencer::Sequencer;

/// Where an outbox is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, cursor not yet checked
    Starting,
    /// Paging through the log while live events are held back
    Backfilling,
    /// Catching up to the tail and draining held-back live events
    CuttingOver,
    /// Delivering live events
    Live,
    /// Finished; yields nothing more
    Closed,
}

/// Ordered event delivery for one subscriber
pub struct Outbox<L: EventLog> {
    sequencer: Arc<Sequencer<L>>,
    opts: OutboxOpts,
    cancel: CancellationToken,
    live: broadcast::Receiver<SeqEvt>,
    phase: Phase,
    cursor: Option<i64>,
    /// Highest seq queued for delivery
    last_read: Option<i64>,
    /// Highest seq handed to the subscriber
    last_seen: Option<i64>,
    out_buffer: VecDeque<OutboxItem>,
    cutover_buffer: VecDeque<SeqEvt>,
}

impl<L: EventLog> Outbox<L> {
    /// Create an outbox starting after `cursor`, or at the live tail if `None`
    pub fn new(
        sequencer: Arc<Sequencer<L>>,
        cursor: Option<i64>,
        opts: OutboxOpts,
        cancel: CancellationToken,
    ) -> Self {
        let live = sequencer.subscribe();
        Self {
            sequencer,
            opts,
            cancel,
            live,
            phase: Phase::Starting,
            cursor,
            last_read: None,
            last_seen: None,
            out_buffer: VecDeque::new(),
            cutover_buffer: VecDeque::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Seq of the last event delivered
    pub fn last_seen(&self) -> Option<i64> {
        self.last_seen
    }

    /// Next item, or `None` once cancelled or closed
    ///
    /// An error ends the session: it is returned once and every later call
    /// yields `None`.
    pub async fn next(&mut self) -> Option<Result<OutboxItem>> {
        match self.step().await {
            Ok(Some(item)) => {
                if let Some(seq) = item.seq() {
                    self.last_seen = Some(seq);
                }
                Some(Ok(item))
            }
            Ok(None) => {
                self.enter(Phase::Closed);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, last_seen = ?self.last_seen, "closing outbox");
                self.enter(Phase::Closed);
                Some(Err(e))
            }
        }
    }

    /// Turn into a stream of items
    pub fn into_stream(self) -> impl Stream<Item = Result<OutboxItem>> {
        n0_future::stream::unfold(self, |mut outbox| async move {
            let item = outbox.next().await?;
            Some((item, outbox))
        })
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, last_read = ?self.last_read, "outbox phase");
            self.phase = phase;
        }
        if phase == Phase::Closed {
            self.out_buffer.clear();
            self.cutover_buffer.clear();
        }
    }

    async fn step(&mut self) -> Result<Option<OutboxItem>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(item) = self.out_buffer.pop_front() {
                return Ok(Some(item));
            }
            match self.phase {
                Phase::Starting => self.start().await?,
                Phase::Backfilling => self.backfill_page().await?,
                Phase::CuttingOver => self.cut_over().await?,
                Phase::Live => {
                    if !self.recv_live().await? {
                        return Ok(None);
                    }
                }
                Phase::Closed => return Ok(None),
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        let Some(cursor) = self.cursor else {
            self.enter(Phase::Live);
            return Ok(());
        };

        let latest = self.sequencer.current_seq().await?;
        if cursor > latest.unwrap_or(0) {
            return Err(SequencerError::FutureCursor { cursor, latest });
        }

        let mut from = cursor;
        if let Some(cutoff) = self.horizon_cutoff() {
            // Everything at or below `floor` is outside the window
            let floor = match self.sequencer.earliest_seq_since(&cutoff).await? {
                Some(earliest) => earliest - 1,
                None => latest.unwrap_or(0),
            };
            if cursor < floor {
                tracing::debug!(cursor, floor, "cursor older than backfill window");
                self.out_buffer
                    .push_back(OutboxItem::Info(InfoMsg::outdated_cursor()));
                from = floor;
            }
        }

        self.last_read = Some(from);
        self.enter(Phase::Backfilling);
        Ok(())
    }

    fn horizon_cutoff(&self) -> Option<Datetime> {
        let horizon = chrono::Duration::from_std(self.opts.backfill_horizon?).ok()?;
        Utc::now().checked_sub_signed(horizon).map(Datetime::new)
    }

    async fn backfill_page(&mut self) -> Result<()> {
        self.buffer_live();
        let page = self
            .sequencer
            .request_seq_range(self.last_read, None, self.opts.page_size)
            .await?;
        let page_len = page.len();
        for evt in page {
            self.queue(evt);
        }
        self.prune_buffer();

        let latest = self.sequencer.current_seq().await?.unwrap_or(0);
        let behind = latest - self.last_read.unwrap_or(0);
        tracing::trace!(page_len, last_read = ?self.last_read, behind, "backfill page");

        if page_len == 0 || behind < (self.opts.page_size / 2) as i64 {
            self.enter(Phase::CuttingOver);
        }
        Ok(())
    }

    async fn cut_over(&mut self) -> Result<()> {
        self.buffer_live();
        let latest = self.sequencer.current_seq().await?;
        let rest = self
            .sequencer
            .request_seq_range(self.last_read, latest, usize::MAX)
            .await?;
        for evt in rest {
            self.queue(evt);
        }
        while let Some(evt) = self.cutover_buffer.pop_front() {
            self.queue(evt);
        }
        self.enter(Phase::Live);
        Ok(())
    }

    /// Wait for one live event; `false` when cancelled or the sequencer is gone
    async fn recv_live(&mut self) -> Result<bool> {
        let pending = self.live.len();
        if pending > self.opts.max_buffer_size {
            return Err(self.too_slow(pending));
        }

        let received = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            msg = self.live.recv() => Some(msg),
        };
        match received {
            None | Some(Err(RecvError::Closed)) => Ok(false),
            Some(Ok(evt)) => {
                self.queue(evt);
                Ok(true)
            }
            Some(Err(RecvError::Lagged(skipped))) => {
                Err(self.too_slow(pending.max(skipped as usize)))
            }
        }
    }

    /// Move live events received so far into the cutover buffer
    ///
    /// Anything dropped here, whether by a lagged receiver or by emptying an
    /// oversized buffer, precedes the current log tail, so the next log read
    /// covers it.
    fn buffer_live(&mut self) {
        loop {
            match self.live.try_recv() {
                Ok(evt) => {
                    if self.last_read.is_none_or(|last| evt.seq > last) {
                        self.cutover_buffer.push_back(evt);
                    }
                }
                Err(TryRecvError::Lagged(_)) => self.cutover_buffer.clear(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if self.cutover_buffer.len() > self.opts.max_buffer_size {
            tracing::trace!(
                dropped = self.cutover_buffer.len(),
                last_read = ?self.last_read,
                "cutover buffer full, leaving live events to the log"
            );
            self.cutover_buffer.clear();
        }
    }

    /// Drop buffered events that a log page has already delivered
    fn prune_buffer(&mut self) {
        let Some(last) = self.last_read else {
            return;
        };
        while self.cutover_buffer.front().is_some_and(|evt| evt.seq <= last) {
            self.cutover_buffer.pop_front();
        }
    }

    fn queue(&mut self, evt: SeqEvt) {
        if self.last_read.is_none_or(|last| evt.seq > last) {
            self.last_read = Some(evt.seq);
            self.out_buffer.push_back(OutboxItem::Event(evt));
        }
    }

    fn too_slow(&self, buffered: usize) -> SequencerError {
        SequencerError::ConsumerTooSlow {
            buffered,
            max: self.opts.max_buffer_size,
        }
    }
}

/// Subscribe to the event stream from `cursor` until `cancel` fires
pub fn subscribe_repos<L: EventLog>(
    sequencer: Arc<Sequencer<L>>,
    cursor: Option<i64>,
    opts: OutboxOpts,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<OutboxItem>> {
    Outbox::new(sequencer, cursor, opts, cancel).into_stream()
}
