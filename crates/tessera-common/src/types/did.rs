//! Decentralized identifiers

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::StrError;

/// Grammar for DIDs: lowercase method, then identifier characters that may not end in `:` or `%`
pub static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

/// A validated DID such as `did:plc:abc123` or `did:web:example.com`
///
/// Only syntax is checked. Resolution happens elsewhere.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

impl Did {
    /// Parse and validate
    pub fn new(did: impl AsRef<str>) -> Result<Self, StrError> {
        let did = did.as_ref();
        if did.len() > 2048 {
            Err(StrError::too_long("did", did, 2048, did.len()))
        } else if !DID_REGEX.is_match(did) {
            Err(StrError::regex(
                "did",
                did,
                SmolStr::new_static("expected did:<method>:<identifier>"),
            ))
        } else {
            Ok(Self(SmolStr::new(did)))
        }
    }

    /// The DID method (`plc`, `web`, `key`, ...)
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// The DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_dids() {
        for s in [
            "did:plc:z72i7hdynmk6r22z27h6tvur",
            "did:web:example.com",
            "did:example:abc",
            "did:key:zQ3shokFTS3brHcDQrn82RUDfCZESWL1ZdCEJwekUDPQiYBme",
        ] {
            assert!(Did::new(s).is_ok(), "{s}");
        }
        assert_eq!(Did::new("did:web:example.com").unwrap().method(), "web");
    }

    #[test]
    fn invalid_dids() {
        for s in ["", "did:", "did:PLC:abc", "did:plc:", "did:plc:abc:", "plc:abc"] {
            assert!(Did::new(s).is_err(), "{s}");
        }
    }
}
