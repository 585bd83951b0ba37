//! Ordered repository event feed
//!
//! Turns repository commits and account changes into a durable, strictly
//! ordered log, and serves it to subscribers as one resumable stream:
//!
//! - **Event log**: append-only storage assigning sequence numbers ([`EventLog`])
//! - **Sequencer**: appends events and broadcasts them to live subscribers
//! - **Outbox**: per-subscriber backfill from a cursor, cut over to live delivery
//! - **Writer**: per-repository serialized write transactions feeding the sequencer
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use n0_future::StreamExt;
//! use tessera_sequencer::{MemoryEventLog, OutboxOpts, Sequencer, SequencerConfig, subscribe_repos};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> tessera_sequencer::Result<()> {
//! let sequencer = Arc::new(Sequencer::new(MemoryEventLog::new(), SequencerConfig::default()));
//! let cancel = CancellationToken::new();
//! let mut events = Box::pin(subscribe_repos(sequencer, Some(0), OutboxOpts::default(), cancel));
//! while let Some(item) = events.next().await {
//!     println!("{:?}", item?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Sequencer and outbox settings
pub mod config;
pub mod error;
/// Sequenced event types
pub mod events;
/// Durable event log abstraction
pub mod log;
/// Per-subscriber outbox
pub mod outbox;
/// Event sequencing
pub mod sequencer;
/// Serialized repository writes
pub mod writer;

pub use config::{OutboxOpts, SequencerConfig};
pub use error::{Result, SequencerError};
pub use events::{EventBody, EventType, InfoMsg, OutboxItem, RepoSeqRow, SeqEvt};
pub use log::{EventLog, FileEventLog, MemoryEventLog};
pub use outbox::{Outbox, Phase, subscribe_repos};
pub use sequencer::Sequencer;
pub use writer::{RepoWriter, WriteResult};
