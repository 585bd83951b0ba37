//! Sequenced event types
//!
//! A log row stores one payload as DAG-CBOR, typed by its [`EventType`]. On
//! the way out a row becomes a [`SeqEvt`]: the decoded [`EventBody`] plus its
//! sequence number and time. The wire form is the body's map with `$type`,
//! `seq` and `time` added.

use std::collections::BTreeMap;

use bytes::Bytes;
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;
use smol_str::SmolStr;
use tessera_common::{Datetime, Did, Tid};
use tessera_repo::RepoOp;

use crate::error::{Result, SequencerError};

/// Kind of a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Ordinary commit
    Append,
    /// Commit replacing the repository's history
    Rebase,
    /// Handle change
    Handle,
    /// Move to another host
    Migrate,
    /// Identity document change
    Identity,
    /// Account status change
    Account,
    /// Repository deleted
    Tombstone,
}

/// A row of the event log
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSeqRow {
    /// Sequence number, strictly increasing, never reused
    pub seq: i64,
    /// Repository the event is about
    pub did: Did,
    /// Payload kind
    pub event_type: EventType,
    /// DAG-CBOR payload
    #[serde(with = "serde_bytes")]
    pub event: Vec<u8>,
    /// Skipped by readers; set when a later event supersedes this one
    pub invalidated: bool,
    /// When the row was appended
    pub sequenced_at: Datetime,
}

impl RepoSeqRow {
    /// Decode the payload into a deliverable event
    pub fn to_event(&self) -> Result<SeqEvt> {
        let body = match self.event_type {
            EventType::Append | EventType::Rebase => EventBody::Commit(decode(&self.event)?),
            EventType::Handle => EventBody::Handle(decode(&self.event)?),
            EventType::Migrate => EventBody::Migrate(decode(&self.event)?),
            EventType::Identity => EventBody::Identity(decode(&self.event)?),
            EventType::Account => EventBody::Account(decode(&self.event)?),
            EventType::Tombstone => EventBody::Tombstone(decode(&self.event)?),
        };
        Ok(SeqEvt {
            seq: self.seq,
            time: self.sequenced_at,
            body,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(SequencerError::serialization)
}

/// Repository commit event
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvt {
    /// Whether this commit replaces the repository's history
    pub rebase: bool,
    /// Whether ops and blocks were left out for size
    pub too_big: bool,
    /// Repository DID
    pub repo: Did,
    /// Commit CID
    pub commit: IpldCid,
    /// Previous commit CID
    pub prev: Option<IpldCid>,
    /// Commit revision
    pub rev: Tid,
    /// Revision of the previous commit
    pub since: Option<Tid>,
    /// CAR of the blocks this commit added, rooted at the commit
    #[serde(with = "serde_bytes")]
    pub blocks: Vec<u8>,
    /// Record operations
    pub ops: Vec<RepoOp>,
    /// Blobs referenced by new records
    pub blobs: Vec<IpldCid>,
}

/// Handle change
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HandleEvt {
    /// Account DID
    pub did: Did,
    /// New handle
    pub handle: SmolStr,
}

/// Identity change; consumers should refresh the DID document
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdentityEvt {
    /// Account DID
    pub did: Did,
    /// Current handle, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<SmolStr>,
}

/// Account status change
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountEvt {
    /// Account DID
    pub did: Did,
    /// Whether the account's repository is served
    pub active: bool,
    /// Reason an inactive account is inactive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
}

/// Why an account is inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Removed by the host
    Takendown,
    /// Suspended for a limited time
    Suspended,
    /// Deleted by its owner
    Deleted,
    /// Deactivated by its owner
    Deactivated,
}

/// Repository deleted
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TombstoneEvt {
    /// Account DID
    pub did: Did,
}

/// Account moved to another host
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateEvt {
    /// Account DID
    pub did: Did,
    /// Destination host, if known
    pub migrate_to: Option<SmolStr>,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    /// `#commit`
    Commit(CommitEvt),
    /// `#handle`
    Handle(HandleEvt),
    /// `#identity`
    Identity(IdentityEvt),
    /// `#account`
    Account(AccountEvt),
    /// `#tombstone`
    Tombstone(TombstoneEvt),
    /// `#migrate`
    Migrate(MigrateEvt),
}

impl EventBody {
    /// Wire `$type` tag
    pub fn type_tag(&self) -> &'static str {
        match self {
            EventBody::Commit(_) => "#commit",
            EventBody::Handle(_) => "#handle",
            EventBody::Identity(_) => "#identity",
            EventBody::Account(_) => "#account",
            EventBody::Tombstone(_) => "#tombstone",
            EventBody::Migrate(_) => "#migrate",
        }
    }

    /// Repository the event is about
    pub fn did(&self) -> &Did {
        match self {
            EventBody::Commit(evt) => &evt.repo,
            EventBody::Handle(evt) => &evt.did,
            EventBody::Identity(evt) => &evt.did,
            EventBody::Account(evt) => &evt.did,
            EventBody::Tombstone(evt) => &evt.did,
            EventBody::Migrate(evt) => &evt.did,
        }
    }

    /// Log row kind for this payload
    pub fn event_type(&self) -> EventType {
        match self {
            EventBody::Commit(evt) if evt.rebase => EventType::Rebase,
            EventBody::Commit(_) => EventType::Append,
            EventBody::Handle(_) => EventType::Handle,
            EventBody::Identity(_) => EventType::Identity,
            EventBody::Account(_) => EventType::Account,
            EventBody::Tombstone(_) => EventType::Tombstone,
            EventBody::Migrate(_) => EventType::Migrate,
        }
    }

    /// DAG-CBOR payload as stored in the log
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            EventBody::Commit(evt) => serde_ipld_dagcbor::to_vec(evt),
            EventBody::Handle(evt) => serde_ipld_dagcbor::to_vec(evt),
            EventBody::Identity(evt) => serde_ipld_dagcbor::to_vec(evt),
            EventBody::Account(evt) => serde_ipld_dagcbor::to_vec(evt),
            EventBody::Tombstone(evt) => serde_ipld_dagcbor::to_vec(evt),
            EventBody::Migrate(evt) => serde_ipld_dagcbor::to_vec(evt),
        };
        encoded.map_err(SequencerError::serialization)
    }

    fn to_ipld(&self) -> Result<Ipld> {
        let converted = match self {
            EventBody::Commit(evt) => ipld_core::serde::to_ipld(evt),
            EventBody::Handle(evt) => ipld_core::serde::to_ipld(evt),
            EventBody::Identity(evt) => ipld_core::serde::to_ipld(evt),
            EventBody::Account(evt) => ipld_core::serde::to_ipld(evt),
            EventBody::Tombstone(evt) => ipld_core::serde::to_ipld(evt),
            EventBody::Migrate(evt) => ipld_core::serde::to_ipld(evt),
        };
        converted.map_err(SequencerError::serialization)
    }
}

/// A sequenced event ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqEvt {
    /// Sequence number
    pub seq: i64,
    /// When it was sequenced
    pub time: Datetime,
    /// Payload
    pub body: EventBody,
}

impl SeqEvt {
    /// Envelope map: the payload's fields plus `$type`, `seq` and `time`
    pub fn to_envelope(&self) -> Result<Ipld> {
        let Ipld::Map(mut map) = self.body.to_ipld()? else {
            return Err(SequencerError::CorruptLog(format!(
                "{} payload is not a map",
                self.body.type_tag()
            )));
        };
        map.insert("$type".into(), Ipld::String(self.body.type_tag().into()));
        map.insert("seq".into(), Ipld::Integer(self.seq.into()));
        map.insert("time".into(), Ipld::String(self.time.to_iso().to_string()));
        Ok(Ipld::Map(map))
    }

    /// Envelope encoded as DAG-CBOR
    pub fn to_cbor(&self) -> Result<Bytes> {
        let envelope = self.to_envelope()?;
        serde_ipld_dagcbor::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(SequencerError::serialization)
    }
}

/// Advisory notice sent to a subscriber
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InfoMsg {
    /// Notice name, e.g. `OutdatedCursor`
    pub name: SmolStr,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InfoMsg {
    /// The requested cursor is older than the backfill window
    pub fn outdated_cursor() -> Self {
        Self {
            name: SmolStr::new_static("OutdatedCursor"),
            message: Some("Requested cursor exceeded limit. Possibly missing events".into()),
        }
    }

    /// Envelope map with `$type: "#info"`
    pub fn to_envelope(&self) -> Ipld {
        let mut map = BTreeMap::new();
        map.insert("$type".to_string(), Ipld::String("#info".into()));
        map.insert("name".to_string(), Ipld::String(self.name.to_string()));
        if let Some(message) = &self.message {
            map.insert("message".to_string(), Ipld::String(message.clone()));
        }
        Ipld::Map(map)
    }
}

/// One item of a subscription stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxItem {
    /// A sequenced event
    Event(SeqEvt),
    /// An advisory notice
    Info(InfoMsg),
}

impl OutboxItem {
    /// Sequence number, for events
    pub fn seq(&self) -> Option<i64> {
        match self {
            OutboxItem::Event(evt) => Some(evt.seq),
            OutboxItem::Info(_) => None,
        }
    }

    /// Wire map for the item
    pub fn to_envelope(&self) -> Result<Ipld> {
        match self {
            OutboxItem::Event(evt) => evt.to_envelope(),
            OutboxItem::Info(info) => Ok(info.to_envelope()),
        }
    }

    /// Wire map for the item, DAG-CBOR encoded
    pub fn to_cbor(&self) -> Result<Bytes> {
        match self {
            OutboxItem::Event(evt) => evt.to_cbor(),
            OutboxItem::Info(info) => serde_ipld_dagcbor::to_vec(&info.to_envelope())
                .map(Bytes::from)
                .map_err(SequencerError::serialization),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::types::cid::cbor_cid;

    fn did() -> Did {
        Did::new("did:plc:eventtest").unwrap()
    }

    fn commit_evt() -> CommitEvt {
        CommitEvt {
            rebase: false,
            too_big: false,
            repo: did(),
            commit: cbor_cid(b"commit"),
            prev: None,
            rev: Tid::from_parts(1_700_000_000_000_000, 1),
            since: None,
            blocks: vec![1, 2, 3],
            ops: vec![RepoOp {
                action: tessera_repo::RepoAction::Delete,
                path: "com.example.post/a".into(),
                cid: None,
                prev: Some(cbor_cid(b"old")),
            }],
            blobs: vec![],
        }
    }

    #[test]
    fn row_decodes_by_type() {
        let body = EventBody::Commit(commit_evt());
        let row = RepoSeqRow {
            seq: 7,
            did: did(),
            event_type: body.event_type(),
            event: body.to_cbor().unwrap(),
            invalidated: false,
            sequenced_at: Datetime::now(),
        };
        let evt = row.to_event().unwrap();
        assert_eq!(evt.seq, 7);
        assert_eq!(evt.body, body);
    }

    #[test]
    fn envelope_carries_type_seq_and_time() {
        let evt = SeqEvt {
            seq: 12,
            time: Datetime::now(),
            body: EventBody::Commit(commit_evt()),
        };
        let bytes = evt.to_cbor().unwrap();
        let Ipld::Map(map) = serde_ipld_dagcbor::from_slice::<Ipld>(&bytes).unwrap() else {
            panic!("envelope is not a map");
        };
        assert_eq!(map.get("$type"), Some(&Ipld::String("#commit".into())));
        assert_eq!(map.get("seq"), Some(&Ipld::Integer(12)));
        assert_eq!(map.get("tooBig"), Some(&Ipld::Bool(false)));
        assert!(matches!(map.get("blocks"), Some(Ipld::Bytes(b)) if b == &[1, 2, 3]));

        let Some(Ipld::List(ops)) = map.get("ops") else {
            panic!("ops missing");
        };
        let Ipld::Map(op) = &ops[0] else {
            panic!("op is not a map");
        };
        assert_eq!(op.get("action"), Some(&Ipld::String("delete".into())));
        assert_eq!(op.get("cid"), Some(&Ipld::Null));
    }

    #[test]
    fn info_envelope() {
        let Ipld::Map(map) = InfoMsg::outdated_cursor().to_envelope() else {
            panic!("info is not a map");
        };
        assert_eq!(map.get("$type"), Some(&Ipld::String("#info".into())));
        assert_eq!(map.get("name"), Some(&Ipld::String("OutdatedCursor".into())));
    }
}
