//! Implementation of the canonical UUID wrapper and time-prefixed identifiers.

use crate::{UuidError, UuidResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::{fmt, str::FromStr};

use ::uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// Canonical UUID representation (32 lowercase hex characters, no hyphens).
///
/// Once you have a `ShardableUuid`, the contained UUID is valid and canonical, and its
/// [`Display`](fmt::Display) output is always the 32-character form.
///
/// # Construction
/// - [`ShardableUuid::new`] generates a fresh v4 UUID.
/// - [`ShardableUuid::parse`] validates an externally supplied identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardableUuid(Uuid);

impl Default for ShardableUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardableUuid {
    /// Generates a new random (v4) UUID in canonical form.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses a UUID string that must already be in canonical form.
    ///
    /// This does **not** normalise hyphenated or uppercase input.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not canonical.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UuidError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| UuidError::InvalidInput(e.to_string()))
    }

    /// Returns true if `input` is exactly 32 characters of `0-9a-f`.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<uuid>/` where `s1`/`s2` are the first two pairs of hex
    /// characters of this UUID.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        let s1 = &canonical[0..2];
        let s2 = &canonical[2..4];
        parent_dir.join(s1).join(s2).join(&canonical)
    }
}

impl fmt::Display for ShardableUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ShardableUuid {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShardableUuid::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ShardableUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ShardableUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ShardableUuid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A time-prefixed unique identifier.
///
/// Format: `YYYYMMDDTHHMMSS.mmmZ-<canonical_uuid>`
///
/// Example: `20260111T143522.045Z-550e8400e29b41d4a716446655440000`
///
/// Ids produced by one [`TimestampIdGenerator`] are strictly increasing in both timestamp and
/// lexical order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampId {
    timestamp: DateTime<Utc>,
    uuid: ShardableUuid,
}

impl TimestampId {
    pub fn new(timestamp: DateTime<Utc>, uuid: ShardableUuid) -> Self {
        Self { timestamp, uuid }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl FromStr for TimestampId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts_str, uuid_str) = s.split_once('-').ok_or_else(|| {
            UuidError::InvalidInput(format!("Invalid timestamp id format: '{}'", s))
        })?;

        let ts_no_z = ts_str.strip_suffix('Z').ok_or_else(|| {
            UuidError::InvalidInput(format!("Timestamp must end with 'Z': '{}'", ts_str))
        })?;

        let naive = NaiveDateTime::parse_from_str(ts_no_z, TIMESTAMP_FORMAT).map_err(|e| {
            UuidError::InvalidInput(format!("Invalid timestamp format '{}': {}", ts_str, e))
        })?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
            uuid: ShardableUuid::parse(uuid_str)?,
        })
    }
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z-{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.uuid
        )
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TimestampId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TimestampId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generates strictly increasing [`TimestampId`]s.
///
/// Timestamps are truncated to millisecond precision (the precision of the string form). If the
/// requested time is not after the last issued timestamp, the new id is issued 1 ms after it.
#[derive(Debug, Default)]
pub struct TimestampIdGenerator {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl TimestampIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the generator so the next id is issued after `last`.
    pub fn starting_after(last: DateTime<Utc>) -> Self {
        Self {
            last: Mutex::new(Some(truncate_to_millis(last))),
        }
    }

    /// Issues an id for time `now`.
    pub fn generate(&self, now: DateTime<Utc>) -> TimestampId {
        let now = truncate_to_millis(now);
        // A poisoned lock only means another thread panicked mid-generate; the stored
        // timestamp is still a valid lower bound.
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        let timestamp = match *last {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(timestamp);

        TimestampId {
            timestamp,
            uuid: ShardableUuid::new(),
        }
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn new_generates_canonical_uuid() {
        let id = ShardableUuid::new();
        let canonical = id.to_string();
        assert_eq!(canonical.len(), 32);
        assert!(ShardableUuid::is_canonical(&canonical));
    }

    #[test]
    fn parse_accepts_canonical() {
        let canonical = "550e8400e29b41d4a716446655440000";
        assert_eq!(
            ShardableUuid::parse(canonical).unwrap().to_string(),
            canonical
        );
    }

    #[test]
    fn parse_rejects_hyphenated_uuid() {
        match ShardableUuid::parse("550e8400-e29b-41d4-a716-446655440000") {
            Err(UuidError::InvalidInput(msg)) => {
                assert!(msg.contains("32 lowercase hex characters"));
            }
            other => panic!("Expected InvalidInput error, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_non_canonical_forms() {
        for bad in [
            "550E8400E29B41D4A716446655440000",
            "550e8400e29b41d4a71644665544000",
            "550e8400e29b41d4a7164466554400000",
            "550e8400e29b41d4a716446655440zzz",
            "",
        ] {
            assert!(ShardableUuid::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn sharded_dir_structure() {
        let id = ShardableUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(
            id.sharded_dir(Path::new("/data/patients")),
            PathBuf::from("/data/patients/55/0e/550e8400e29b41d4a716446655440000")
        );
    }

    #[test]
    fn serde_uses_canonical_string() {
        let id = ShardableUuid::parse("aabbccddeeff00112233445566778899").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"aabbccddeeff00112233445566778899\"");
        assert!(serde_json::from_str::<ShardableUuid>("\"AABB\"").is_err());
    }

    #[test]
    fn timestamp_id_display_and_parse() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 11, 14, 35, 22).unwrap()
            + Duration::milliseconds(45);
        let uuid = ShardableUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        let id = TimestampId::new(ts, uuid);

        let text = id.to_string();
        assert_eq!(text, "20260111T143522.045Z-550e8400e29b41d4a716446655440000");
        assert_eq!(text.parse::<TimestampId>().unwrap(), id);
    }

    #[test]
    fn timestamp_id_rejects_missing_z() {
        assert!("20260111T143522.045-550e8400e29b41d4a716446655440000"
            .parse::<TimestampId>()
            .is_err());
    }

    #[test]
    fn generator_is_strictly_increasing_for_same_instant() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let generator = TimestampIdGenerator::new();

        let first = generator.generate(now);
        let second = generator.generate(now);
        let third = generator.generate(now - Duration::seconds(5));

        assert!(second.timestamp() > first.timestamp());
        assert!(third.timestamp() > second.timestamp());
        assert!(second.to_string() > first.to_string());
    }

    #[test]
    fn generator_seeded_after_last() {
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let generator = TimestampIdGenerator::starting_after(last);
        let id = generator.generate(last);
        assert_eq!(id.timestamp(), last + Duration::milliseconds(1));
    }
}
