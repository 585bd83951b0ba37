//! Content identifier helpers
//!
//! [`Cid`] itself comes from the `cid` crate; this module pins the codec and
//! hash constants the repository format uses and adds strict parsing and
//! hash verification on top.

pub use cid::Cid;
use sha2::{Digest, Sha256};

/// DAG-CBOR multicodec (0x71), used for every structured block
pub const DAG_CBOR: u64 = 0x71;

/// Raw multicodec (0x55), used for blobs
pub const RAW: u64 = 0x55;

/// DAG-PB multicodec (0x70), the only codec a CIDv0 can carry
pub const DAG_PB: u64 = 0x70;

/// SHA2-256 multihash code
pub const SHA2_256: u64 = 0x12;

/// Default multibase for string-encoded CIDv1 (lowercase base32, `b` prefix)
pub const CID_BASE: multibase::Base = multibase::Base::Base32Lower;

/// Errors from building, parsing or checking a CID
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CidError {
    /// Underlying cid crate failure
    #[error("invalid CID: {0}")]
    #[diagnostic(code(tessera::cid::invalid))]
    Invalid(#[from] cid::Error),

    /// Bytes left over after a complete CID was read
    #[error("{0} trailing bytes after CID")]
    #[diagnostic(
        code(tessera::cid::trailing_bytes),
        help("a CID byte string must contain exactly one CID")
    )]
    TrailingBytes(usize),

    /// Hash function not supported for verification
    #[error("unsupported multihash code 0x{0:x}")]
    #[diagnostic(code(tessera::cid::unsupported_hash), help("only sha2-256 is supported"))]
    UnsupportedHash(u64),

    /// Block bytes do not hash to the digest carried by the CID
    #[error("hash mismatch for {cid}: bytes hash to {actual}")]
    #[diagnostic(code(tessera::cid::hash_mismatch))]
    HashMismatch {
        /// CID the bytes were claimed to have
        cid: Cid,
        /// CID the bytes actually hash to
        actual: Cid,
    },
}

/// Compute a CIDv1 for `data` using sha2-256 and the given codec
pub fn compute_cid(codec: u64, data: &[u8]) -> Cid {
    Cid::new_v1(codec, sha256_multihash(data))
}

/// CIDv1 for a DAG-CBOR block
pub fn cbor_cid(data: &[u8]) -> Cid {
    compute_cid(DAG_CBOR, data)
}

/// CIDv0 for `data` (sha2-256, implicit dag-pb codec)
pub fn compute_cid_v0(data: &[u8]) -> Result<Cid, CidError> {
    Ok(Cid::new_v0(sha256_multihash(data))?)
}

fn sha256_multihash(data: &[u8]) -> multihash::Multihash<64> {
    let digest = Sha256::digest(data);
    // A 32-byte digest always fits the 64-byte multihash buffer
    multihash::Multihash::<64>::wrap(SHA2_256, digest.as_slice())
        .unwrap_or_default()
}

/// Parse a binary CID, rejecting trailing bytes
///
/// `parse_cid_bytes(&cid.to_bytes())` returns `cid` for both v0 and v1.
pub fn parse_cid_bytes(bytes: &[u8]) -> Result<Cid, CidError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let cid = Cid::read_bytes(&mut cursor)?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(CidError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(cid)
}

/// Check that `data` is the content addressed by `cid`
pub fn verify_cid(cid: &Cid, data: &[u8]) -> Result<(), CidError> {
    let code = cid.hash().code();
    if code != SHA2_256 {
        return Err(CidError::UnsupportedHash(code));
    }
    let digest = Sha256::digest(data);
    if cid.hash().digest() != digest.as_slice() {
        let actual = Cid::new_v1(cid.codec(), sha256_multihash(data));
        return Err(CidError::HashMismatch { cid: *cid, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_bytes_round_trip() {
        let cid = cbor_cid(b"hello");
        assert_eq!(cid.version(), cid::Version::V1);
        assert_eq!(cid.codec(), DAG_CBOR);
        let parsed = parse_cid_bytes(&cid.to_bytes()).unwrap();
        assert_eq!(parsed, cid);
    }

    #[test]
    fn v0_bytes_round_trip() {
        let cid = compute_cid_v0(b"hello").unwrap();
        assert_eq!(cid.version(), cid::Version::V0);
        assert_eq!(cid.codec(), DAG_PB);
        let parsed = parse_cid_bytes(&cid.to_bytes()).unwrap();
        assert_eq!(parsed, cid);
        assert!(cid.to_string().starts_with("Qm"));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = cbor_cid(b"x").to_bytes();
        bytes.push(0);
        assert!(matches!(
            parse_cid_bytes(&bytes),
            Err(CidError::TrailingBytes(1))
        ));
    }

    #[test]
    fn raw_and_cbor_codecs_differ() {
        let raw = compute_cid(RAW, b"blob");
        let cbor = cbor_cid(b"blob");
        assert_ne!(raw, cbor);
        assert_eq!(raw.hash(), cbor.hash());
    }

    #[test]
    fn verify_detects_tampering() {
        let cid = cbor_cid(b"original");
        assert!(verify_cid(&cid, b"original").is_ok());
        assert!(matches!(
            verify_cid(&cid, b"tampered"),
            Err(CidError::HashMismatch { .. })
        ));
    }

    #[test]
    fn string_form_is_base32() {
        let cid = cbor_cid(b"hello");
        let s = cid.to_string_of_base(CID_BASE).unwrap();
        assert!(s.starts_with('b'));
        assert_eq!(Cid::try_from(s.as_str()).unwrap(), cid);
    }
}
