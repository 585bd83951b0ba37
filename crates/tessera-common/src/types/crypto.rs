//! Signing keys, multikey public keys and `did:key` identifiers
//!
//! The set of supported algorithms is closed: [`KeyAlgorithm`] enumerates
//! them, and every key type here dispatches on it exhaustively. Public keys
//! travel as multikey strings (multicodec varint prefix + compressed key,
//! base58btc multibase), optionally wrapped in a `did:key:` DID.
//!
//! ```
//! use tessera_common::types::crypto::{Keypair, KeyAlgorithm, PublicKey, SigningKey};
//!
//! let key = Keypair::generate(KeyAlgorithm::Secp256k1);
//! let sig = key.sign(b"hello").unwrap();
//! let did_key = key.public_key().did_key();
//! let public = PublicKey::from_did_key(&did_key).unwrap();
//! public.verify(b"hello", &sig).unwrap();
//! ```

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

const DID_KEY_PREFIX: &str = "did:key:";

/// Signature algorithms a repository may be signed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// ECDSA over secp256k1 (`ES256K`)
    Secp256k1,
    /// ECDSA over NIST P-256 (`ES256`)
    P256,
    /// Ed25519
    Ed25519,
}

impl KeyAlgorithm {
    /// Multicodec code for the public key type
    pub const fn multicodec(self) -> u64 {
        match self {
            KeyAlgorithm::Secp256k1 => 0xE7,
            KeyAlgorithm::P256 => 0x1200,
            KeyAlgorithm::Ed25519 => 0xED,
        }
    }

    /// Reverse of [`multicodec`](Self::multicodec)
    pub fn from_multicodec(code: u64) -> Result<Self, CryptoError> {
        match code {
            0xE7 => Ok(KeyAlgorithm::Secp256k1),
            0x1200 => Ok(KeyAlgorithm::P256),
            0xED => Ok(KeyAlgorithm::Ed25519),
            other => Err(CryptoError::UnsupportedAlgorithm(other)),
        }
    }

    /// JOSE-style algorithm name
    pub const fn jwt_alg(self) -> &'static str {
        match self {
            KeyAlgorithm::Secp256k1 => "ES256K",
            KeyAlgorithm::P256 => "ES256",
            KeyAlgorithm::Ed25519 => "EdDSA",
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "k256" | "es256k" => Ok(KeyAlgorithm::Secp256k1),
            "p256" | "p-256" | "es256" => Ok(KeyAlgorithm::P256),
            "ed25519" | "eddsa" => Ok(KeyAlgorithm::Ed25519),
            _ => Err(CryptoError::UnknownAlgorithmName(s.to_string())),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyAlgorithm::Secp256k1 => "secp256k1",
            KeyAlgorithm::P256 => "p256",
            KeyAlgorithm::Ed25519 => "ed25519",
        })
    }
}

/// Errors from key handling, signing and verification
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic, PartialEq, Eq)]
pub enum CryptoError {
    /// Multibase decode failure
    #[error("failed to decode multibase")]
    #[diagnostic(code(tessera::crypto::multibase))]
    MultibaseDecode,
    /// Multicodec varint decode failure
    #[error("failed to decode multicodec varint")]
    #[diagnostic(code(tessera::crypto::multicodec))]
    MulticodecDecode,
    /// Key type outside the supported set
    #[error("unsupported key algorithm: multicodec 0x{0:x}")]
    #[diagnostic(
        code(tessera::crypto::unsupported_algorithm),
        help("supported: secp256k1 (0xe7), p256 (0x1200), ed25519 (0xed)")
    )]
    UnsupportedAlgorithm(u64),
    /// Algorithm name not recognized
    #[error("unknown key algorithm name `{0}`")]
    #[diagnostic(code(tessera::crypto::unknown_algorithm_name))]
    UnknownAlgorithmName(String),
    /// Not a `did:key:` identifier
    #[error("not a did:key identifier")]
    #[diagnostic(code(tessera::crypto::not_did_key))]
    NotDidKey,
    /// Wrong key length
    #[error("invalid key length: expected {expected}, got {got}")]
    #[diagnostic(code(tessera::crypto::invalid_length))]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        got: usize,
    },
    /// Key bytes don't form a valid key
    #[error("invalid key material: {0}")]
    #[diagnostic(code(tessera::crypto::invalid_key))]
    InvalidKey(String),
    /// Signature bytes malformed
    #[error("malformed signature: {0}")]
    #[diagnostic(code(tessera::crypto::malformed_signature))]
    MalformedSignature(String),
    /// Signature doesn't verify, or is not in low-S form
    #[error("signature verification failed")]
    #[diagnostic(code(tessera::crypto::invalid_signature))]
    InvalidSignature,
}

/// Anything that can sign repository commits
///
/// The host supplies an implementation; [`Keypair`] is the in-process one.
pub trait SigningKey: Send + Sync {
    /// Algorithm of this key
    fn algorithm(&self) -> KeyAlgorithm;

    /// Sign `data`, returning the compact signature bytes
    fn sign(&self, data: &[u8]) -> Result<Bytes, CryptoError>;

    /// The matching public key
    fn public_key(&self) -> PublicKey;

    /// Public identifier in `did:key:` form
    fn did_key(&self) -> String {
        self.public_key().did_key()
    }
}

/// A public key of a supported algorithm, stored in compressed form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    algorithm: KeyAlgorithm,
    bytes: Bytes,
}

impl PublicKey {
    /// Validate raw public key bytes (compressed or uncompressed SEC1 for the
    /// ECDSA curves, 32 bytes for Ed25519); stored compressed
    pub fn from_bytes(algorithm: KeyAlgorithm, bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes = match algorithm {
            KeyAlgorithm::Secp256k1 => {
                let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Bytes::copy_from_slice(vk.to_encoded_point(true).as_bytes())
            }
            KeyAlgorithm::P256 => {
                let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Bytes::copy_from_slice(vk.to_encoded_point(true).as_bytes())
            }
            KeyAlgorithm::Ed25519 => {
                let raw: &[u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                    expected: 32,
                    got: bytes.len(),
                })?;
                ed25519_dalek::VerifyingKey::from_bytes(raw)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Bytes::copy_from_slice(raw)
            }
        };
        Ok(Self { algorithm, bytes })
    }

    /// Decode a multibase multikey string (`z...`)
    pub fn decode_multikey(multikey: &str) -> Result<Self, CryptoError> {
        let (_base, data) = multibase::decode(multikey).map_err(|_| CryptoError::MultibaseDecode)?;
        let (code, offset) = decode_uvarint(&data).ok_or(CryptoError::MulticodecDecode)?;
        let algorithm = KeyAlgorithm::from_multicodec(code)?;
        Self::from_bytes(algorithm, &data[offset..])
    }

    /// Decode a `did:key:z...` identifier
    pub fn from_did_key(did: &str) -> Result<Self, CryptoError> {
        let multikey = did
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or(CryptoError::NotDidKey)?;
        Self::decode_multikey(multikey)
    }

    /// Multibase multikey encoding
    pub fn multikey(&self) -> String {
        let mut buf = encode_uvarint(self.algorithm.multicodec());
        buf.extend_from_slice(&self.bytes);
        multibase::encode(multibase::Base::Base58Btc, buf)
    }

    /// `did:key:` identifier
    pub fn did_key(&self) -> String {
        format!("{DID_KEY_PREFIX}{}", self.multikey())
    }

    /// Algorithm of this key
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Compressed key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Verify a compact signature over `data`
    ///
    /// ECDSA signatures must be in low-S form.
    pub fn verify(&self, data: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        match self.algorithm {
            KeyAlgorithm::Secp256k1 => {
                use k256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
                let vk = VerifyingKey::from_sec1_bytes(&self.bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let sig = Signature::from_slice(sig)
                    .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
                if sig.normalize_s().is_some() {
                    return Err(CryptoError::InvalidSignature);
                }
                vk.verify(data, &sig)
                    .map_err(|_| CryptoError::InvalidSignature)
            }
            KeyAlgorithm::P256 => {
                use p256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
                let vk = VerifyingKey::from_sec1_bytes(&self.bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let sig = Signature::from_slice(sig)
                    .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
                if sig.normalize_s().is_some() {
                    return Err(CryptoError::InvalidSignature);
                }
                vk.verify(data, &sig)
                    .map_err(|_| CryptoError::InvalidSignature)
            }
            KeyAlgorithm::Ed25519 => {
                let raw: &[u8; 32] =
                    self.bytes
                        .as_ref()
                        .try_into()
                        .map_err(|_| CryptoError::InvalidLength {
                            expected: 32,
                            got: self.bytes.len(),
                        })?;
                let vk = ed25519_dalek::VerifyingKey::from_bytes(raw)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let sig = ed25519_dalek::Signature::from_slice(sig)
                    .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
                vk.verify_strict(data, &sig)
                    .map_err(|_| CryptoError::InvalidSignature)
            }
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.did_key())
    }
}

/// An in-process private key
#[derive(Clone)]
pub enum Keypair {
    /// secp256k1
    Secp256k1(k256::ecdsa::SigningKey),
    /// P-256
    P256(p256::ecdsa::SigningKey),
    /// Ed25519
    Ed25519(ed25519_dalek::SigningKey),
}

impl Keypair {
    /// Fresh random key from the OS RNG
    pub fn generate(algorithm: KeyAlgorithm) -> Self {
        let mut rng = rand::rngs::OsRng;
        match algorithm {
            KeyAlgorithm::Secp256k1 => Keypair::Secp256k1(k256::ecdsa::SigningKey::random(&mut rng)),
            KeyAlgorithm::P256 => Keypair::P256(p256::ecdsa::SigningKey::random(&mut rng)),
            KeyAlgorithm::Ed25519 => Keypair::Ed25519(ed25519_dalek::SigningKey::generate(&mut rng)),
        }
    }

    /// Import a 32-byte secret scalar / seed
    pub fn from_secret_bytes(algorithm: KeyAlgorithm, secret: &[u8]) -> Result<Self, CryptoError> {
        match algorithm {
            KeyAlgorithm::Secp256k1 => k256::ecdsa::SigningKey::from_slice(secret)
                .map(Keypair::Secp256k1)
                .map_err(|e| CryptoError::InvalidKey(e.to_string())),
            KeyAlgorithm::P256 => p256::ecdsa::SigningKey::from_slice(secret)
                .map(Keypair::P256)
                .map_err(|e| CryptoError::InvalidKey(e.to_string())),
            KeyAlgorithm::Ed25519 => {
                let seed: &[u8; 32] = secret.try_into().map_err(|_| CryptoError::InvalidLength {
                    expected: 32,
                    got: secret.len(),
                })?;
                Ok(Keypair::Ed25519(ed25519_dalek::SigningKey::from_bytes(seed)))
            }
        }
    }

    /// Export the 32-byte secret
    pub fn secret_bytes(&self) -> [u8; 32] {
        match self {
            Keypair::Secp256k1(k) => k.to_bytes().into(),
            Keypair::P256(k) => k.to_bytes().into(),
            Keypair::Ed25519(k) => k.to_bytes(),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("algorithm", &self.algorithm())
            .field("public", &self.public_key().did_key())
            .finish_non_exhaustive()
    }
}

impl SigningKey for Keypair {
    fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Keypair::Secp256k1(_) => KeyAlgorithm::Secp256k1,
            Keypair::P256(_) => KeyAlgorithm::P256,
            Keypair::Ed25519(_) => KeyAlgorithm::Ed25519,
        }
    }

    fn sign(&self, data: &[u8]) -> Result<Bytes, CryptoError> {
        match self {
            Keypair::Secp256k1(key) => {
                use k256::ecdsa::signature::Signer;
                let sig: k256::ecdsa::Signature = key.sign(data);
                let sig = sig.normalize_s().unwrap_or(sig);
                Ok(Bytes::copy_from_slice(&sig.to_bytes()))
            }
            Keypair::P256(key) => {
                use p256::ecdsa::signature::Signer;
                let sig: p256::ecdsa::Signature = key.sign(data);
                let sig = sig.normalize_s().unwrap_or(sig);
                Ok(Bytes::copy_from_slice(&sig.to_bytes()))
            }
            Keypair::Ed25519(key) => {
                use ed25519_dalek::Signer;
                let sig = key.sign(data);
                Ok(Bytes::copy_from_slice(&sig.to_bytes()))
            }
        }
    }

    fn public_key(&self) -> PublicKey {
        let (algorithm, bytes) = match self {
            Keypair::Secp256k1(k) => (
                KeyAlgorithm::Secp256k1,
                Bytes::copy_from_slice(k.verifying_key().to_encoded_point(true).as_bytes()),
            ),
            Keypair::P256(k) => (
                KeyAlgorithm::P256,
                Bytes::copy_from_slice(k.verifying_key().to_encoded_point(true).as_bytes()),
            ),
            Keypair::Ed25519(k) => (
                KeyAlgorithm::Ed25519,
                Bytes::copy_from_slice(k.verifying_key().as_bytes()),
            ),
        };
        PublicKey { algorithm, bytes }
    }
}

fn encode_uvarint(mut x: u64) -> Vec<u8> {
    let mut out = Vec::new();
    while x >= 0x80 {
        out.push(((x as u8) & 0x7F) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
    out
}

fn decode_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut x: u64 = 0;
    let mut s: u32 = 0;
    for (i, b) in data.iter().copied().enumerate() {
        if b < 0x80 {
            if i > 9 || (i == 9 && b > 1) {
                return None;
            }
            return Some((x | ((b as u64) << s), i + 1));
        }
        x |= ((b & 0x7F) as u64) << s;
        s += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [KeyAlgorithm; 3] = [
        KeyAlgorithm::Secp256k1,
        KeyAlgorithm::P256,
        KeyAlgorithm::Ed25519,
    ];

    #[test]
    fn sign_verify_each_algorithm() {
        for alg in ALL {
            let key = Keypair::generate(alg);
            let sig = key.sign(b"payload").unwrap();
            let public = key.public_key();
            assert_eq!(public.algorithm(), alg);
            public.verify(b"payload", &sig).unwrap();
            assert_eq!(
                public.verify(b"payload!", &sig),
                Err(CryptoError::InvalidSignature)
            );
        }
    }

    #[test]
    fn did_key_round_trip() {
        for alg in ALL {
            let public = Keypair::generate(alg).public_key();
            let did = public.did_key();
            assert!(did.starts_with("did:key:z"));
            assert_eq!(PublicKey::from_did_key(&did).unwrap(), public);
        }
    }

    #[test]
    fn k256_did_key_prefix() {
        // secp256k1 multikeys start with zQ3s, p256 with zDn
        let k = Keypair::generate(KeyAlgorithm::Secp256k1).public_key();
        assert!(k.multikey().starts_with("zQ3s"));
        let p = Keypair::generate(KeyAlgorithm::P256).public_key();
        assert!(p.multikey().starts_with("zDn"));
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let mut buf = encode_uvarint(0x1205);
        buf.extend_from_slice(&[2u8; 33]);
        let s = multibase::encode(multibase::Base::Base58Btc, buf);
        assert_eq!(
            PublicKey::decode_multikey(&s),
            Err(CryptoError::UnsupportedAlgorithm(0x1205))
        );
    }

    #[test]
    fn wrong_key_rejects() {
        let a = Keypair::generate(KeyAlgorithm::P256);
        let b = Keypair::generate(KeyAlgorithm::P256);
        let sig = a.sign(b"data").unwrap();
        assert!(b.public_key().verify(b"data", &sig).is_err());
    }

    #[test]
    fn secret_round_trip() {
        for alg in ALL {
            let key = Keypair::generate(alg);
            let restored = Keypair::from_secret_bytes(alg, &key.secret_bytes()).unwrap();
            assert_eq!(restored.public_key(), key.public_key());
        }
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("ES256K".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Secp256k1);
        assert_eq!("p256".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::P256);
        assert!("rsa".parse::<KeyAlgorithm>().is_err());
    }
}
