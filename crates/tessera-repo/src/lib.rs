//! Content-addressed repository primitives
//!
//! This crate provides the building blocks of a signed, content-addressed
//! record repository:
//!
//! - **Blocks**: DAG-CBOR encoding with SHA-256 CIDs, and in-memory block/CID sets
//! - **MST (Merkle Search Tree)**: Immutable, deterministic key/value tree with efficient diffs
//! - **Commits**: Signed version 3 commits and record inclusion proofs
//! - **CAR I/O**: Import and export repositories as CAR v1 archives
//! - **Storage**: Pluggable block storage with in-memory, layered and file-backed stores
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_repo::{Mst, MemoryBlockStore};
//!
//! # async fn example() -> tessera_repo::Result<()> {
//! let storage = Arc::new(MemoryBlockStore::new());
//! let mst = Mst::new(storage);
//!
//! let cid = /* ... */;
//! let (mst, _new_blocks) = mst.add("com.example.post/3l5yhcgz7y42y", cid).await?;
//!
//! if let Some(value) = mst.get("com.example.post/3l5yhcgz7y42y").await? {
//!     println!("Found: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Block codec and in-memory block collections
pub mod block;
/// CAR (Content Addressable aRchive) utilities
pub mod car;
/// Commit structures and signature verification
pub mod commit;
pub mod error;
/// Merkle Search Tree implementation
pub mod mst;
/// High-level repository operations
pub mod repo;
/// Block storage abstraction
pub mod storage;

pub use block::{BlockMap, CidSet};
pub use commit::{Commit, UnsignedCommit};
pub use error::{RepoError, RepoErrorKind, Result};
pub use mst::{Mst, MstDiff, WriteOp};
pub use repo::{CommitData, FormattedCommit, RecordWrite, RepoAction, RepoOp, Repository};
pub use storage::{BlockStore, FileBlockStore, LayeredBlockStore, MemoryBlockStore};
