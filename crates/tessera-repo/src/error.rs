//! Error types for repository operations

use std::error::Error;
use std::fmt;

use tessera_common::StrError;
use tessera_common::types::cid::CidError;
use tessera_common::types::crypto::CryptoError;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Block store I/O failed
    Storage,
    /// A referenced block or record is absent
    NotFound,
    /// Key failed `collection/rkey` validation
    InvalidKey,
    /// Insert of a key that already exists
    DuplicateKey,
    /// Update or delete of a key that does not exist
    MissingKey,
    /// Expected current value of a key did not match
    SwapMismatch,
    /// Block bytes do not hash to their CID
    HashMismatch,
    /// Commit signature failed verification
    InvalidSignature,
    /// Signing key type is outside the supported set
    UnsupportedAlgorithm,
    /// Other key handling failure
    Crypto,
    /// Malformed tree node
    InvalidMst,
    /// Malformed commit
    InvalidCommit,
    /// Malformed CID
    InvalidCid,
    /// Encode or decode failed
    Serialization,
    /// Malformed CAR archive
    Car,
    /// Filesystem I/O failed
    Io,
}

impl RepoError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> RepoErrorKind {
        self.kind
    }

    /// Create a storage error
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Storage, Some(Box::new(source)))
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidKey, None)
            .with_help("keys are `<collection>/<rkey>`, rkey 1-512 chars of [A-Za-z0-9._:~-]")
            .with_context(format!("key: {}", key.into()))
    }

    /// Create a duplicate key error
    pub fn duplicate_key(key: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::DuplicateKey, None)
            .with_context(format!("key already present: {}", key))
            .with_help("use an update to replace an existing record")
    }

    /// Create a missing key error
    pub fn missing_key(key: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::MissingKey, None)
            .with_context(format!("key not present: {}", key))
    }

    /// Create a swap mismatch error
    pub fn swap_mismatch(
        key: impl fmt::Display,
        expected: impl fmt::Display,
        found: Option<impl fmt::Display>,
    ) -> Self {
        let found = found.map_or_else(|| "nothing".to_string(), |f| f.to_string());
        Self::new(RepoErrorKind::SwapMismatch, None).with_context(format!(
            "{}: expected {}, found {}",
            key, expected, found
        ))
    }

    /// Create an invalid MST error
    pub fn invalid_mst(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidMst, Some(msg.into().into()))
            .with_help("MST nodes must follow protocol structure")
    }

    /// Create an invalid commit error
    pub fn invalid_commit(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidCommit, Some(msg.into().into()))
    }

    /// Create an invalid CID error
    pub fn invalid_cid(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidCid, Some(msg.into().into()))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create a CAR file error
    pub fn car(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Car, Some(Box::new(source)))
    }

    /// Create a CAR parse error
    pub fn car_parse(source: impl Error + Send + Sync + 'static) -> Self {
        Self::car(source).with_context("failed to parse CAR data".to_string())
    }

    /// Create an I/O error
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

impl From<CidError> for RepoError {
    fn from(e: CidError) -> Self {
        match e {
            CidError::HashMismatch { .. } => {
                RepoError::new(RepoErrorKind::HashMismatch, Some(Box::new(e)))
            }
            other => RepoError::new(RepoErrorKind::InvalidCid, Some(Box::new(other))),
        }
    }
}

impl From<CryptoError> for RepoError {
    fn from(e: CryptoError) -> Self {
        let kind = match e {
            CryptoError::InvalidSignature | CryptoError::MalformedSignature(_) => {
                RepoErrorKind::InvalidSignature
            }
            CryptoError::UnsupportedAlgorithm(_) => RepoErrorKind::UnsupportedAlgorithm,
            _ => RepoErrorKind::Crypto,
        };
        RepoError::new(kind, Some(Box::new(e)))
    }
}

impl From<StrError> for RepoError {
    fn from(e: StrError) -> Self {
        let source = e.source.clone();
        RepoError::new(RepoErrorKind::InvalidKey, Some(Box::new(e))).with_context(source)
    }
}

// Internal granular errors

/// MST-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum MstError {
    /// Node structure invalid
    #[error("Node structure invalid: {0}")]
    #[diagnostic(code(mst::invalid_node))]
    InvalidNode(String),

    /// Node keys out of order or at the wrong layer
    #[error("Node at layer {layer} holds key {key} of layer {key_layer}")]
    #[diagnostic(
        code(mst::wrong_layer),
        help("every key in a node must hash to that node's layer")
    )]
    WrongLayer {
        /// Layer of the node
        layer: u32,
        /// Offending key
        key: String,
        /// Layer the key hashes to
        key_layer: u32,
    },

    /// Serialization failed
    #[error("Serialization failed")]
    #[diagnostic(code(mst::serialization))]
    Serialization(#[source] BoxError),
}

impl From<MstError> for RepoError {
    fn from(e: MstError) -> Self {
        match e {
            MstError::InvalidNode(msg) => RepoError::invalid_mst(msg),
            e @ MstError::WrongLayer { .. } => {
                RepoError::new(RepoErrorKind::InvalidMst, Some(Box::new(e)))
            }
            MstError::Serialization(e) => RepoError::new(RepoErrorKind::Serialization, Some(e)),
        }
    }
}

/// Commit-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CommitError {
    /// Invalid commit version
    #[error("Invalid commit version: {0}")]
    #[diagnostic(code(commit::version), help("only version 3 commits are produced or accepted"))]
    InvalidVersion(i64),

    /// Commit DID differs from the repository's
    #[error("Commit is for {found}, expected {expected}")]
    #[diagnostic(code(commit::did_mismatch))]
    DidMismatch {
        /// DID in the commit
        found: String,
        /// DID expected
        expected: String,
    },

    /// Revision does not advance past the previous commit
    #[error("Revision {rev} is not newer than {prev_rev}")]
    #[diagnostic(code(commit::rev_not_increasing))]
    RevNotIncreasing {
        /// New revision
        rev: String,
        /// Previous revision
        prev_rev: String,
    },

    /// Signature verification failed
    #[error("Signature verification failed")]
    #[diagnostic(code(commit::signature))]
    Signature(#[source] CryptoError),

    /// Serialization failed
    #[error("Serialization failed")]
    #[diagnostic(code(commit::serialization))]
    Serialization(#[source] BoxError),
}

impl From<CommitError> for RepoError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::Signature(inner) => RepoError::from(inner),
            CommitError::Serialization(e) => RepoError::new(RepoErrorKind::Serialization, Some(e)),
            other => RepoError::new(RepoErrorKind::InvalidCommit, Some(Box::new(other))),
        }
    }
}

/// Proof verification errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ProofError {
    /// Commit block not found in CAR
    #[error("Commit block not found in CAR")]
    #[diagnostic(
        code(proof::commit_not_found),
        help("The CAR root CID must point to a valid commit block")
    )]
    CommitNotFound,

    /// DID mismatch between commit and expected
    #[error("DID mismatch: commit has {commit_did}, expected {expected_did}")]
    #[diagnostic(
        code(proof::did_mismatch),
        help("The commit must be signed by the expected DID")
    )]
    DidMismatch {
        /// DID in the commit
        commit_did: String,
        /// Expected DID
        expected_did: String,
    },

    /// MST block missing from CAR
    #[error("MST block missing from CAR: {cid}")]
    #[diagnostic(
        code(proof::missing_mst_block),
        help("All MST blocks along the proof path must be included in the CAR file")
    )]
    MissingMstBlock {
        /// The missing CID
        cid: String,
    },

    /// Record CID in the tree doesn't match the record block
    #[error("Record block for {key} missing or mismatched")]
    #[diagnostic(code(proof::record_mismatch))]
    RecordMismatch {
        /// Key being proven
        key: String,
    },
}

impl From<ProofError> for RepoError {
    fn from(e: ProofError) -> Self {
        let kind = match &e {
            ProofError::CommitNotFound | ProofError::MissingMstBlock { .. } => {
                RepoErrorKind::NotFound
            }
            ProofError::DidMismatch { .. } => RepoErrorKind::InvalidCommit,
            ProofError::RecordMismatch { .. } => RepoErrorKind::HashMismatch,
        };
        RepoError::new(kind, Some(Box::new(e)))
    }
}
