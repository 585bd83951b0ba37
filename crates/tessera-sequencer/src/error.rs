//! Error types for sequencing and subscriptions

use miette::Diagnostic;
use tessera_repo::RepoError;
use thiserror::Error;

/// Boxed error type for error sources
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for sequencer operations
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Sequencer and outbox errors
///
/// `FutureCursor` and `ConsumerTooSlow` end a subscription; the sequencer
/// itself keeps running. Cancelling a subscription is not an error, the
/// stream just ends.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum SequencerError {
    #[error("cursor {cursor} is ahead of the latest sequence number {latest:?}")]
    #[diagnostic(
        code(tessera_sequencer::future_cursor),
        help("resume from a sequence number this server has already emitted")
    )]
    FutureCursor { cursor: i64, latest: Option<i64> },

    #[error("consumer too slow: {buffered} events pending, limit {max}")]
    #[diagnostic(
        code(tessera_sequencer::consumer_too_slow),
        help("reconnect with the last seen cursor to resume")
    )]
    ConsumerTooSlow { buffered: usize, max: usize },

    #[error("event log error: {0}")]
    #[diagnostic(code(tessera_sequencer::log))]
    Log(#[source] BoxError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(tessera_sequencer::io))]
    Io(#[from] std::io::Error),

    #[error("malformed event log: {0}")]
    #[diagnostic(
        code(tessera_sequencer::corrupt_log),
        help("the log file was written by something else or damaged in the middle")
    )]
    CorruptLog(String),

    #[error("serialization error: {0}")]
    #[diagnostic(code(tessera_sequencer::serialization))]
    Serialization(#[source] BoxError),

    #[error("repository {found} does not match {expected}")]
    #[diagnostic(code(tessera_sequencer::did_mismatch))]
    DidMismatch { found: String, expected: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Repo(#[from] RepoError),
}

impl SequencerError {
    /// Wrap an event log backend failure
    pub fn log(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Log(Box::new(source))
    }

    /// Wrap an encode or decode failure
    pub fn serialization(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Serialization(Box::new(source))
    }

    /// Whether this error ends a subscription in a way the consumer should
    /// be told about by name
    pub fn protocol_name(&self) -> Option<&'static str> {
        match self {
            Self::FutureCursor { .. } => Some("FutureCursor"),
            Self::ConsumerTooSlow { .. } => Some("ConsumerTooSlow"),
            _ => None,
        }
    }
}
