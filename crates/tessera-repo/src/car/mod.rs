//! CAR (Content Addressable aRchive) I/O
//!
//! The interchange format for block bundles: a varint-prefixed DAG-CBOR
//! header `{roots, version: 1}`, then varint-prefixed `cid ++ bytes` records.
//! Framing is handled by `iroh-car`; every read here additionally checks each
//! block's bytes against its CID and fails with `HashMismatch` on a mismatch.
//!
//! ```ignore
//! use tessera_repo::car::{parse_car_bytes, write_car_bytes};
//!
//! let bytes = write_car_bytes(root, blocks).await?;
//! let parsed = parse_car_bytes(&bytes).await?;
//! assert_eq!(parsed.root, root);
//! ```

pub mod reader;
pub mod writer;

pub use reader::{CarBlockStream, ParsedCar, parse_car_bytes, read_car, stream_car};
pub use writer::{write_car, write_car_bytes};
