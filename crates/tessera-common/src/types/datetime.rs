//! UTC timestamps as they appear on the wire

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::str::FromStr;

use crate::error::StrError;

/// An instant in UTC, serialized as ISO 8601 with millisecond precision and a `Z` suffix
///
/// Example: `"2024-03-01T12:00:00.123Z"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime(DateTime<Utc>);

impl Datetime {
    /// The current instant
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap a chrono instant
    pub fn new(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// From milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The inner chrono value
    pub fn as_chrono(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Wire form
    pub fn to_iso(&self) -> SmolStr {
        SmolStr::new(self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl From<DateTime<Utc>> for Datetime {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl FromStr for Datetime {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| StrError::regex("datetime", s, SmolStr::new(e.to_string())))
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

impl Serialize for Datetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

impl<'de> Deserialize<'de> for Datetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::from_str(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_z_suffix() {
        let dt = Datetime::from_millis(1_700_000_000_123).unwrap();
        assert_eq!(dt.to_iso(), "2023-11-14T22:13:20.123Z");
        assert_eq!(dt.to_iso().parse::<Datetime>().unwrap(), dt);
    }

    #[test]
    fn offsets_normalize_to_utc() {
        let dt: Datetime = "2023-11-14T23:13:20.123+01:00".parse().unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }
}
