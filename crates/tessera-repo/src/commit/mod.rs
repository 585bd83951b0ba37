//! Commit structures and signature verification
//!
//! A commit anchors an MST root to a revision and signs it. The signature
//! covers the DAG-CBOR encoding of the [`UnsignedCommit`] (every field except
//! `sig`); the commit's CID is the hash of the signed encoding.

pub mod proof;

use bytes::Bytes;
use cid::Cid as IpldCid;
use tessera_common::types::crypto::{PublicKey, SigningKey};
use tessera_common::{Did, Tid};

use crate::block::{decode_block, encode_block};
use crate::error::{CommitError, RepoError, Result};

/// Commit format version produced and accepted
pub const COMMIT_VERSION: i64 = 3;

/// Commit fields covered by the signature
///
/// Field order matches DAG-CBOR canonical key order (shorter keys first).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UnsignedCommit {
    /// Repository DID
    pub did: Did,

    /// Revision TID, strictly increasing per repository
    pub rev: Tid,

    /// MST root CID
    pub data: IpldCid,

    /// Previous commit CID; explicit `null` for the first commit
    pub prev: Option<IpldCid>,

    /// Commit version, always 3
    pub version: i64,
}

impl UnsignedCommit {
    /// Create a version 3 commit body
    pub fn new(did: Did, data: IpldCid, rev: Tid, prev: Option<IpldCid>) -> Self {
        Self {
            did,
            rev,
            data,
            prev,
            version: COMMIT_VERSION,
        }
    }

    /// The bytes a signer signs
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self)
            .map_err(|e| CommitError::Serialization(Box::new(e)).into())
    }

    /// Sign with `key`
    pub fn sign<K: SigningKey + ?Sized>(self, key: &K) -> Result<Commit> {
        let sig = key.sign(&self.signing_bytes()?)?;
        Ok(Commit {
            did: self.did,
            rev: self.rev,
            sig,
            data: self.data,
            prev: self.prev,
            version: self.version,
        })
    }
}

/// Signed repository commit, stored as a block
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commit {
    /// Repository DID
    pub did: Did,

    /// Revision TID
    pub rev: Tid,

    /// Signature over the unsigned encoding
    #[serde(with = "sig_bytes")]
    pub sig: Bytes,

    /// MST root CID
    pub data: IpldCid,

    /// Previous commit CID (None for initial commit)
    pub prev: Option<IpldCid>,

    /// Commit version
    pub version: i64,
}

impl Commit {
    /// Get the repository DID
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Get the MST root CID
    pub fn data(&self) -> &IpldCid {
        &self.data
    }

    /// Get the revision TID
    pub fn rev(&self) -> &Tid {
        &self.rev
    }

    /// Get the previous commit CID
    pub fn prev(&self) -> Option<&IpldCid> {
        self.prev.as_ref()
    }

    /// Get the signature bytes
    pub fn sig(&self) -> &Bytes {
        &self.sig
    }

    /// The signed-over portion
    pub fn unsigned(&self) -> UnsignedCommit {
        UnsignedCommit {
            did: self.did.clone(),
            rev: self.rev.clone(),
            data: self.data,
            prev: self.prev,
            version: self.version,
        }
    }

    /// Encode to a block, returning its CID and bytes
    pub fn to_block(&self) -> Result<(IpldCid, Bytes)> {
        encode_block(self)
    }

    /// Compute CID of this commit
    pub fn to_cid(&self) -> Result<IpldCid> {
        Ok(self.to_block()?.0)
    }

    /// Decode a commit block, rejecting versions other than 3
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let commit: Commit = decode_block(data)?;
        if commit.version != COMMIT_VERSION {
            return Err(CommitError::InvalidVersion(commit.version).into());
        }
        Ok(commit)
    }

    /// Verify the signature against `pubkey`
    ///
    /// `InvalidSignature` when it does not verify; `UnsupportedAlgorithm` is
    /// raised earlier, when a key of an unknown type is decoded.
    pub fn verify(&self, pubkey: &PublicKey) -> Result<()> {
        let unsigned = self.unsigned().signing_bytes()?;
        pubkey
            .verify(&unsigned, &self.sig)
            .map_err(CommitError::Signature)?;
        Ok(())
    }

    /// Verify against a `did:key:` identifier
    pub fn verify_did_key(&self, did_key: &str) -> Result<()> {
        let pubkey = PublicKey::from_did_key(did_key).map_err(RepoError::from)?;
        self.verify(&pubkey)
    }

    /// Check this commit can follow `prev_rev` in the same repository
    pub fn check_follows(&self, did: &Did, prev_rev: Option<&Tid>) -> Result<()> {
        if &self.did != did {
            return Err(CommitError::DidMismatch {
                found: self.did.to_string(),
                expected: did.to_string(),
            }
            .into());
        }
        if let Some(prev_rev) = prev_rev {
            if !self.rev.newer_than(prev_rev) {
                return Err(CommitError::RevNotIncreasing {
                    rev: self.rev.to_string(),
                    prev_rev: prev_rev.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

mod sig_bytes {
    use bytes::Bytes;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(bytes.as_ref(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let buf: serde_bytes::ByteBuf = serde_bytes::deserialize(deserializer)?;
        Ok(Bytes::from(buf.into_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepoErrorKind;
    use tessera_common::types::cid::cbor_cid;
    use tessera_common::{KeyAlgorithm, Keypair};

    fn did() -> Did {
        Did::new("did:plc:abc123xyz").unwrap()
    }

    fn unsigned(prev: Option<IpldCid>) -> UnsignedCommit {
        UnsignedCommit::new(did(), cbor_cid(b"root"), Tid::from_parts(1_700_000_000_000_000, 3), prev)
    }

    #[test]
    fn sign_and_verify_each_algorithm() {
        for alg in [KeyAlgorithm::Secp256k1, KeyAlgorithm::P256, KeyAlgorithm::Ed25519] {
            let key = Keypair::generate(alg);
            let commit = unsigned(None).sign(&key).unwrap();
            commit.verify(&key.public_key()).unwrap();
            commit.verify_did_key(&key.did_key()).unwrap();
        }
    }

    #[test]
    fn tamper_is_detected() {
        let key = Keypair::generate(KeyAlgorithm::Secp256k1);
        let mut commit = unsigned(None).sign(&key).unwrap();
        commit.data = cbor_cid(b"other root");
        let err = commit.verify(&key.public_key()).unwrap_err();
        assert_eq!(err.kind(), RepoErrorKind::InvalidSignature);

        let other = Keypair::generate(KeyAlgorithm::Secp256k1);
        let commit = unsigned(None).sign(&key).unwrap();
        assert!(commit.verify(&other.public_key()).is_err());
    }

    #[test]
    fn block_round_trip_keeps_null_prev() {
        let key = Keypair::generate(KeyAlgorithm::P256);
        let commit = unsigned(None).sign(&key).unwrap();
        let (cid, bytes) = commit.to_block().unwrap();
        assert_eq!(cid, cbor_cid(&bytes));

        let decoded = Commit::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, commit);
        let value: ipld_core::ipld::Ipld = decode_block(&bytes).unwrap();
        let ipld_core::ipld::Ipld::Map(map) = value else {
            panic!("commit is not a map");
        };
        assert_eq!(map.get("prev"), Some(&ipld_core::ipld::Ipld::Null));
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn rejects_other_versions() {
        let key = Keypair::generate(KeyAlgorithm::Ed25519);
        let mut commit = unsigned(Some(cbor_cid(b"prev"))).sign(&key).unwrap();
        commit.version = 2;
        let (_, bytes) = commit.to_block().unwrap();
        let err = Commit::from_cbor(&bytes).unwrap_err();
        assert_eq!(err.kind(), RepoErrorKind::InvalidCommit);
    }

    #[test]
    fn rev_must_increase() {
        let key = Keypair::generate(KeyAlgorithm::Secp256k1);
        let commit = unsigned(None).sign(&key).unwrap();
        commit.check_follows(&did(), None).unwrap();
        let older = Tid::from_parts(1_600_000_000_000_000, 0);
        commit.check_follows(&did(), Some(&older)).unwrap();
        assert!(commit.check_follows(&did(), Some(commit.rev())).is_err());
        let stranger = Did::new("did:plc:someoneelse").unwrap();
        assert!(commit.check_follows(&stranger, None).is_err());
    }

    #[test]
    fn malformed_did_key_rejected() {
        let key = Keypair::generate(KeyAlgorithm::Secp256k1);
        let commit = unsigned(None).sign(&key).unwrap();
        assert!(commit.verify_did_key("did:key:z5TcCZ").is_err());
        assert!(commit.verify_did_key("did:web:example.com").is_err());
    }
}
