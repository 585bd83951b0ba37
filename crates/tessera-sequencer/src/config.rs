//! Sequencer and outbox settings
//!
//! Both structs build with `bon` and deserialize from any serde format;
//! missing fields take their defaults.

use std::time::Duration;

/// Commits with more ops than this are emitted as `tooBig`
pub const DEFAULT_MAX_EVENT_OPS: usize = 200;

/// Commits with more new block bytes than this are emitted as `tooBig`
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1_000_000;

/// Sequencer settings
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SequencerConfig {
    /// Capacity of the live broadcast channel
    ///
    /// A subscriber more than this many events behind is dropped as too slow.
    #[builder(default = 1024)]
    pub live_channel_capacity: usize,

    /// Op count above which commit events are emitted as `tooBig`
    #[builder(default = DEFAULT_MAX_EVENT_OPS)]
    pub max_event_ops: usize,

    /// New-block byte size above which commit events are emitted as `tooBig`
    #[builder(default = DEFAULT_MAX_EVENT_BYTES)]
    pub max_event_bytes: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-subscription settings
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboxOpts {
    /// Rows read per backfill page
    #[builder(default = 500)]
    pub page_size: usize,

    /// Events a subscriber may have pending before it is dropped
    #[builder(default = 500)]
    pub max_buffer_size: usize,

    /// How far back a cursor may reach
    ///
    /// Cursors older than this get an `OutdatedCursor` notice and resume at
    /// the first event inside the window. `None` serves the whole log.
    pub backfill_horizon: Option<Duration>,
}

impl Default for OutboxOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = OutboxOpts::default();
        assert_eq!(opts.page_size, 500);
        assert_eq!(opts.max_buffer_size, 500);
        assert_eq!(opts.backfill_horizon, None);
        assert_eq!(SequencerConfig::default().live_channel_capacity, 1024);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let opts: OutboxOpts = serde_json::from_str(r#"{"pageSize": 50}"#).unwrap();
        assert_eq!(opts.page_size, 50);
        assert_eq!(opts.max_buffer_size, 500);

        let config: SequencerConfig = serde_json::from_str(r#"{"maxEventOps": 10}"#).unwrap();
        assert_eq!(config.max_event_ops, 10);
        assert_eq!(config.max_event_bytes, DEFAULT_MAX_EVENT_BYTES);
    }

    #[test]
    fn builder_overrides() {
        let opts = OutboxOpts::builder()
            .page_size(10)
            .backfill_horizon(Duration::from_secs(3600))
            .build();
        assert_eq!(opts.page_size, 10);
        assert_eq!(opts.backfill_horizon, Some(Duration::from_secs(3600)));
    }
}
