//! Timestamp identifiers and the monotonic clock that issues them

use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::{SmolStr, SmolStrBuilder};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex};

use crate::error::StrError;
use regex::Regex;

const S32_CHAR: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Highest clock id a [`TidClock`] will pick
pub const MAX_CLOCK_ID: u32 = 31;

fn s32_encode(mut i: u64) -> SmolStr {
    let mut chars = [0u8; 13];
    for slot in chars.iter_mut().rev() {
        *slot = S32_CHAR[(i & 0x1F) as usize];
        i >>= 5;
    }
    let mut builder = SmolStrBuilder::new();
    for c in chars {
        builder.push(c as char);
    }
    builder.finish()
}

fn s32_decode(s: &str) -> u64 {
    s.bytes().fold(0u64, |acc, b| {
        let v = S32_CHAR.iter().position(|c| *c == b).unwrap_or(0) as u64;
        (acc << 5) | v
    })
}

static TID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[234567abcdefghij][234567abcdefghijklmnopqrstuvwxyz]{12}$").unwrap()
});

/// A timestamp identifier
///
/// 13 characters of sortable base32 over a 64-bit integer laid out as
/// `0 | 53 bits of microseconds since the epoch | 10 bits of clock id`.
/// Lexicographic order of the string equals numeric order of the integer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tid(SmolStr);

impl Tid {
    /// Parse and validate a TID string
    pub fn new(tid: impl AsRef<str>) -> Result<Self, StrError> {
        let tid = tid.as_ref();
        if tid.len() > 13 {
            Err(StrError::too_long("tid", tid, 13, tid.len()))
        } else if tid.len() < 13 {
            Err(StrError::too_short("tid", tid, 13, tid.len()))
        } else if !TID_REGEX.is_match(tid) {
            Err(StrError::regex(
                "tid",
                tid,
                SmolStr::new_static("must be 13 sortable base32 characters"),
            ))
        } else {
            Ok(Self(SmolStr::new_inline(tid)))
        }
    }

    /// Build a TID from a microsecond timestamp and a clock id
    pub fn from_parts(micros: u64, clock_id: u32) -> Self {
        let n = ((micros << 10) & 0x7FFF_FFFF_FFFF_FC00) | (clock_id as u64 & 0x3FF);
        Self(s32_encode(n))
    }

    /// Build a TID for a wall-clock instant
    pub fn from_datetime(clock_id: u32, time: chrono::DateTime<chrono::Utc>) -> Self {
        Self::from_parts(time.timestamp_micros().max(0) as u64, clock_id)
    }

    /// The TID as a 64-bit integer
    pub fn as_u64(&self) -> u64 {
        s32_decode(&self.0)
    }

    /// Microsecond timestamp component
    pub fn timestamp(&self) -> u64 {
        self.as_u64() >> 10
    }

    /// Clock id component
    pub fn clock_id(&self) -> u32 {
        (self.as_u64() & 0x3FF) as u32
    }

    /// Whether this TID sorts after `other`
    pub fn newer_than(&self, other: &Tid) -> bool {
        self > other
    }

    /// Returns the TID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tid {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: SmolStr = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<Tid> for SmolStr {
    fn from(value: Tid) -> Self {
        value.0
    }
}

/// Source of wall-clock time for a [`TidClock`]
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

/// Reads the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A settable clock, for deterministic tests and replay
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    millis: Arc<Mutex<u64>>,
}

impl ManualTime {
    /// Start at the given epoch milliseconds
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(Mutex::new(millis)),
        }
    }

    /// Jump to an absolute time (backwards jumps are allowed)
    pub fn set(&self, millis: u64) {
        if let Ok(mut m) = self.millis.lock() {
            *m = millis;
        }
    }

    /// Move forward by `delta` milliseconds
    pub fn advance(&self, delta: u64) {
        if let Ok(mut m) = self.millis.lock() {
            *m = m.saturating_add(delta);
        }
    }
}

impl TimeSource for ManualTime {
    fn now_millis(&self) -> u64 {
        self.millis.lock().map(|m| *m).unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct ClockState {
    /// Timestamp of the last TID issued, in microseconds
    last_micros: u64,
}

/// Issues strictly increasing TIDs
///
/// The timestamp used is the wall clock in microseconds, raised to one past
/// the last TID issued and one past `prev` when either is ahead. Calls within
/// the same millisecond count up through its microseconds, and a clock that
/// runs backwards never produces a smaller TID.
///
/// Each clock owns its state; share it with `Arc` when several writers must
/// draw from one sequence.
#[derive(Debug)]
pub struct TidClock {
    source: Arc<dyn TimeSource>,
    clock_id: u32,
    state: Mutex<ClockState>,
}

impl TidClock {
    /// Clock over the system time with a random clock id in `0..=31`
    pub fn new() -> Self {
        Self::with_source(Arc::new(SystemTime))
    }

    /// Clock over an arbitrary time source with a random clock id
    pub fn with_source(source: Arc<dyn TimeSource>) -> Self {
        let clock_id = rand::random::<u32>() % (MAX_CLOCK_ID + 1);
        Self::with_clock_id(source, clock_id)
    }

    /// Clock with a fixed clock id (masked to 10 bits)
    pub fn with_clock_id(source: Arc<dyn TimeSource>, clock_id: u32) -> Self {
        Self {
            source,
            clock_id: clock_id & 0x3FF,
            state: Mutex::new(ClockState::default()),
        }
    }

    /// This clock's id
    pub fn clock_id(&self) -> u32 {
        self.clock_id
    }

    /// Next TID, strictly greater than every TID this clock issued before
    /// and than `prev` when supplied
    pub fn next(&self, prev: Option<&Tid>) -> Tid {
        let now = self.source.now_millis().saturating_mul(1000);
        let micros = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut micros = now.max(state.last_micros.saturating_add(1));
            if let Some(prev) = prev {
                let floor = prev.timestamp().saturating_add(1);
                if micros < floor {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%prev, micros, "clock behind previous rev, bumping");
                    micros = floor;
                }
            }
            state.last_micros = micros;
            micros
        };
        Tid::from_parts(micros, self.clock_id)
    }
}

impl Default for TidClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_thirteen_sortable_chars() {
        let tid = Tid::from_parts(1_700_000_000_000_000, 5);
        assert_eq!(tid.as_str().len(), 13);
        assert!(Tid::new(tid.as_str()).is_ok());
        assert_eq!(tid.timestamp(), 1_700_000_000_000_000);
        assert_eq!(tid.clock_id(), 5);
    }

    #[test]
    fn zero_encodes_as_all_twos() {
        assert_eq!(Tid::from_parts(0, 0).as_str(), "2222222222222");
    }

    #[test]
    fn string_order_matches_time_order() {
        let a = Tid::from_parts(1_000, 31);
        let b = Tid::from_parts(1_001, 0);
        assert!(a.as_str() < b.as_str());
        assert!(b.newer_than(&a));
    }

    #[test]
    fn rejects_bad_strings() {
        assert!(Tid::new("3jzfcijpj2z2").is_err());
        assert!(Tid::new("3jzfcijpj2z2aa").is_err());
        assert!(Tid::new("zzzzzzzzzzzzz").is_err());
        assert!(Tid::new("3JZFCIJPJ2Z2A").is_err());
        assert!(Tid::new("3jzfcijpj2z2a").is_ok());
    }

    #[test]
    fn monotonic_under_frozen_clock() {
        let time = ManualTime::new(1_700_000_000_000);
        let clock = TidClock::with_clock_id(Arc::new(time), 7);
        let mut prev = clock.next(None);
        for _ in 0..500 {
            let next = clock.next(None);
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn monotonic_when_clock_runs_backwards() {
        let time = ManualTime::new(1_700_000_000_000);
        let clock = TidClock::with_clock_id(Arc::new(time.clone()), 0);
        let first = clock.next(None);
        time.set(1_600_000_000_000);
        let second = clock.next(None);
        assert!(second > first);
    }

    #[test]
    fn newer_than_prev_from_elsewhere() {
        let time = ManualTime::new(1_000);
        let clock = TidClock::with_clock_id(Arc::new(time), 3);
        let far_future = Tid::from_parts(9_000_000_000_000_000, 0);
        let next = clock.next(Some(&far_future));
        assert!(next > far_future);
        assert_eq!(next.clock_id(), 3);
    }

    #[test]
    fn bump_from_prev_is_remembered() {
        let time = ManualTime::new(1_000);
        let clock = TidClock::with_clock_id(Arc::new(time.clone()), 3);
        let far = Tid::from_parts(9_000_000_000_000_000, 0);

        let a = clock.next(Some(&far));
        let b = clock.next(Some(&far));
        let c = clock.next(None);
        time.advance(5);
        let d = clock.next(None);
        assert!(a > far);
        assert!(b > a, "{b} not after {a}");
        assert!(c > b, "{c} not after {b}");
        assert!(d > c, "{d} not after {c}");
    }

    #[test]
    fn wall_clock_wins_once_past_last_issued() {
        let time = ManualTime::new(1_000);
        let clock = TidClock::with_clock_id(Arc::new(time.clone()), 0);
        let prev = Tid::from_parts(2_000_000, 0);
        let bumped = clock.next(Some(&prev));
        assert_eq!(bumped.timestamp(), 2_000_001);

        time.set(5_000);
        assert_eq!(clock.next(None).timestamp(), 5_000_000);
    }

    #[test]
    fn random_clock_id_in_range() {
        for _ in 0..64 {
            assert!(TidClock::new().clock_id() <= MAX_CLOCK_ID);
        }
    }

    #[test]
    fn serde_validates() {
        let ok: Tid = serde_json::from_str("\"3jzfcijpj2z2a\"").unwrap();
        assert_eq!(ok.as_str(), "3jzfcijpj2z2a");
        assert!(serde_json::from_str::<Tid>("\"nope\"").is_err());
    }
}
