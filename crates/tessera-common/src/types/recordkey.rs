//! Collection names, record keys and the `collection/rkey` paths that key a repository

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::{SmolStr, format_smolstr};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::StrError;

/// Namespaced identifier grammar (reverse-DNS authority plus a name segment)
pub static NSID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+(\.[a-zA-Z][a-zA-Z0-9]{0,62})$").unwrap()
});

/// Record key grammar
pub static RKEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.\-_:~]{1,512}$").unwrap());

/// Collection name, e.g. `app.bsky.feed.post`
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash, Debug)]
#[serde(transparent)]
pub struct Nsid(SmolStr);

impl Nsid {
    /// Parse and validate
    pub fn new(nsid: impl AsRef<str>) -> Result<Self, StrError> {
        let nsid = nsid.as_ref();
        if nsid.len() > 317 {
            Err(StrError::too_long("nsid", nsid, 317, nsid.len()))
        } else if !NSID_REGEX.is_match(nsid) {
            Err(StrError::regex("nsid", nsid, SmolStr::new_static("invalid")))
        } else {
            Ok(Self(SmolStr::new(nsid)))
        }
    }

    /// As a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Nsid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

/// Record key: 1 to 512 characters of `[A-Za-z0-9._:~-]`, never `.` or `..`
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash, Debug)]
#[serde(transparent)]
pub struct RecordKey(SmolStr);

impl RecordKey {
    /// Parse and validate
    pub fn new(rkey: impl AsRef<str>) -> Result<Self, StrError> {
        let rkey = rkey.as_ref();
        if rkey == "." || rkey == ".." {
            Err(StrError::disallowed("record-key", rkey, &[".", ".."]))
        } else if rkey.len() > 512 {
            Err(StrError::too_long("record-key", rkey, 512, rkey.len()))
        } else if !RKEY_REGEX.is_match(rkey) {
            Err(StrError::regex(
                "record-key",
                rkey,
                SmolStr::new_static("allowed characters are [A-Za-z0-9._:~-]"),
            ))
        } else {
            Ok(Self(SmolStr::new(rkey)))
        }
    }

    /// As a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

/// A repository key: `<collection>/<record-key>`
///
/// Collections are checked loosely (non-empty, no `/`, same character set as
/// record keys) so repositories holding non-NSID collections still load; use
/// [`RecordPath::new_strict`] to require a full NSID.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RecordPath {
    full: SmolStr,
    split: usize,
}

impl RecordPath {
    /// Parse `collection/rkey`
    pub fn parse(path: impl AsRef<str>) -> Result<Self, StrError> {
        let path = path.as_ref();
        let Some(split) = path.find('/') else {
            return Err(StrError::missing("repo-path", path, "/"));
        };
        let (collection, rkey) = (&path[..split], &path[split + 1..]);
        if collection.is_empty() {
            return Err(StrError::too_short("repo-path", path, 1, 0));
        }
        if !RKEY_REGEX.is_match(collection) {
            return Err(StrError::regex(
                "repo-path",
                path,
                SmolStr::new_static("collection has invalid characters"),
            ));
        }
        RecordKey::new(rkey)?;
        Ok(Self {
            full: SmolStr::new(path),
            split,
        })
    }

    /// Parse `collection/rkey`, requiring the collection to be an NSID
    pub fn new_strict(path: impl AsRef<str>) -> Result<Self, StrError> {
        let parsed = Self::parse(path)?;
        Nsid::new(parsed.collection())?;
        Ok(parsed)
    }

    /// Join a collection and record key
    pub fn from_parts(collection: &Nsid, rkey: &RecordKey) -> Self {
        let full = format_smolstr!("{}/{}", collection, rkey);
        Self {
            split: collection.as_str().len(),
            full,
        }
    }

    /// Collection half
    pub fn collection(&self) -> &str {
        &self.full[..self.split]
    }

    /// Record key half
    pub fn rkey(&self) -> &str {
        &self.full[self.split + 1..]
    }

    /// The full key
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl FromStr for RecordPath {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for RecordPath {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl Serialize for RecordPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}

impl<'de> Deserialize<'de> for RecordPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::parse(value).map_err(D::Error::custom)
    }
}
