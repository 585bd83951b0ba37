//! Common types for the tessera repository stack
//!
//! Identifiers and primitives that every other crate in the workspace speaks:
//!
//! - [`Cid`](types::cid) helpers: codec constants, hashing, strict byte parsing
//! - [`Tid`](types::tid::Tid) and the monotonic [`TidClock`](types::tid::TidClock)
//! - [`Did`](types::did::Did) and [`RecordPath`](types::recordkey::RecordPath) validation
//! - Signing keys and `did:key` public identifiers in [`types::crypto`]
//! - [`Datetime`](types::datetime::Datetime) for wire timestamps

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub use smol_str;

pub mod error;
/// Baseline data types used across the workspace.
pub mod types;

pub use error::{StrError, StrParseKind};
pub use types::cid::Cid;
pub use types::crypto::{Keypair, KeyAlgorithm, PublicKey, SigningKey};
pub use types::datetime::Datetime;
pub use types::did::Did;
pub use types::recordkey::{Nsid, RecordKey, RecordPath};
pub use types::tid::{Tid, TidClock, TimeSource};
