//! Core data types used throughout the engine
//!
//! # Key Types
//!
//! - **`Granularity`**: one of the four fixed time resolutions, ordered
//!   finest to coarsest
//! - **`MetricId`**: unique identifier for a metric (64-bit integer)
//! - **`TagSet`**: key/value metadata identifying a metric; values may be
//!   scalars or nested maps
//! - **`PointId`**: sortable 16-byte datapoint identifier encoding the
//!   timestamp and owning metric
//! - **`Datapoint`** / **`PointValue`**: one raw or aggregated sample
//!
//! # Example
//!
//! ```rust
//! use datastream::types::{Granularity, TagSet};
//!
//! let mut tags = TagSet::new();
//! tags.insert("node", "gw-01");
//! tags.insert("port", 3);
//!
//! // Rounding truncates to the granularity boundary
//! assert_eq!(Granularity::Minutes.round(125), 120);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Unique identifier for a metric
///
/// Assigned sequentially at creation time and never reused.
pub type MetricId = u64;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Mapping from single-letter aggregate codes to numbers
///
/// Stored for every closed downsample bucket. See [`crate::downsamplers`]
/// for the code vocabulary.
pub type ValueMap = BTreeMap<String, f64>;

/// Tag keys the engine reserves for synthesized entries
pub const RESERVED_TAGS: [&str; 3] = ["metric_id", "downsamplers", "highest_granularity"];

/// Largest timestamp a [`PointId`] can encode (u32 seconds)
pub const MAX_ENCODABLE_TIMESTAMP: Timestamp = u32::MAX as Timestamp;

/// Current wall-clock time as a Unix timestamp
pub(crate) fn unix_now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Granularity
// =============================================================================

/// Time resolution at which datapoints are stored
///
/// Ordered finest to coarsest. A metric stores raw points at its
/// `highest_granularity` and aggregates into every coarser one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One-second resolution
    Seconds,
    /// One-minute resolution
    Minutes,
    /// One-hour resolution
    Hours,
    /// One-day resolution
    Days,
}

impl Granularity {
    /// All granularities, finest first
    pub const ALL: [Granularity; 4] = [
        Granularity::Seconds,
        Granularity::Minutes,
        Granularity::Hours,
        Granularity::Days,
    ];

    /// Canonical name used at the API boundary
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Seconds => "seconds",
            Granularity::Minutes => "minutes",
            Granularity::Hours => "hours",
            Granularity::Days => "days",
        }
    }

    /// Parse a granularity name
    pub fn from_name(name: &str) -> Option<Self> {
        Granularity::ALL.into_iter().find(|g| g.as_str() == name)
    }

    /// Position in [`Granularity::ALL`]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Bucket span in seconds
    pub fn span_secs(self) -> i64 {
        match self {
            Granularity::Seconds => 1,
            Granularity::Minutes => 60,
            Granularity::Hours => 3_600,
            Granularity::Days => 86_400,
        }
    }

    /// Round a timestamp down to this granularity's boundary
    ///
    /// Component truncation in UTC: minutes zero the seconds, hours zero
    /// minutes and seconds, days truncate to midnight.
    pub fn round(self, timestamp: Timestamp) -> Timestamp {
        let span = self.span_secs();
        timestamp.div_euclid(span) * span
    }

    /// Granularities strictly coarser than this one, finest first
    pub fn coarser(self) -> impl Iterator<Item = Granularity> {
        Granularity::ALL.into_iter().skip(self.index() + 1)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Granularity::from_name(s).ok_or_else(|| Error::UnsupportedGranularity(s.to_string()))
    }
}

// =============================================================================
// Point identifiers
// =============================================================================

/// Sortable 16-byte datapoint identifier
///
/// Layout, all fields big-endian:
///
/// ```text
/// | bytes 0..4          | bytes 4..12        | bytes 12..16        |
/// | Unix seconds (u32)  | metric id (u64)    | sequence (u32)      |
/// ```
///
/// Lexicographic order over the raw bytes equals time order, so range
/// queries by time reduce to identifier range scans. The sequence
/// disambiguates raw inserts landing on the same second; aggregate points
/// always carry sequence 0, giving exactly one identifier per
/// (metric, rounded timestamp) and making bucket writes upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId([u8; 16]);

impl PointId {
    /// Encode an identifier, validating the timestamp range
    pub fn new(timestamp: Timestamp, metric: MetricId, sequence: u32) -> Result<Self> {
        if !(0..=MAX_ENCODABLE_TIMESTAMP).contains(&timestamp) {
            return Err(Error::InvalidTimestamp(timestamp));
        }
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&(timestamp as u32).to_be_bytes());
        bytes[4..12].copy_from_slice(&metric.to_be_bytes());
        bytes[12..16].copy_from_slice(&sequence.to_be_bytes());
        Ok(Self(bytes))
    }

    /// Identifier for an aggregate bucket (sequence pinned to 0)
    pub fn aggregate(rounded_timestamp: Timestamp, metric: MetricId) -> Result<Self> {
        Self::new(rounded_timestamp, metric, 0)
    }

    /// Smallest identifier with the given timestamp, for range scans
    pub fn lower_bound(timestamp: Timestamp) -> Result<Self> {
        Self::new(timestamp, 0, 0)
    }

    /// Timestamp encoded in the identifier
    pub fn timestamp(self) -> Timestamp {
        let mut ts = [0u8; 4];
        ts.copy_from_slice(&self.0[0..4]);
        u32::from_be_bytes(ts) as Timestamp
    }

    /// Metric id encoded in the identifier
    pub fn metric_id(self) -> MetricId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[4..12]);
        u64::from_be_bytes(id)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// =============================================================================
// Datapoints
// =============================================================================

/// Value carried by a stored datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    /// Raw sample
    Scalar(f64),
    /// Closed downsample bucket
    Bucket(ValueMap),
}

/// One raw or aggregated sample
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    /// Identifier encoding timestamp and owning metric
    pub id: PointId,
    /// Owning metric
    pub metric: MetricId,
    /// Sample payload
    pub value: PointValue,
}

impl Datapoint {
    /// Timestamp encoded in the identifier
    pub fn timestamp(&self) -> Timestamp {
        self.id.timestamp()
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Key/value metadata identifying a metric
///
/// Values are arbitrary JSON scalars or nested maps. Two tag sets compare
/// independent of insertion order. Lookup treats a metric as matching a
/// query when its tags are a superset of the query's entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, Value>,
}

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tag
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Get a tag value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the set holds no tags
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.tags.iter()
    }

    /// Whether every entry of `query` is present with an equal value
    pub fn contains_all(&self, query: &TagSet) -> bool {
        query
            .tags
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }

    /// Reject reserved keys
    pub fn check_reserved(&self) -> Result<()> {
        for reserved in RESERVED_TAGS {
            if self.tags.contains_key(reserved) {
                return Err(Error::ReservedTagName(reserved.to_string()));
            }
        }
        Ok(())
    }

    /// Union of two tag sets; entries of `other` win on key collisions
    pub fn merged(&self, other: &TagSet) -> TagSet {
        let mut tags = self.tags.clone();
        for (key, value) in &other.tags {
            tags.insert(key.clone(), value.clone());
        }
        TagSet { tags }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for (key, value) in iter {
            set.insert(key, value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_round() {
        assert_eq!(Granularity::Seconds.round(1234), 1234);
        assert_eq!(Granularity::Minutes.round(125), 120);
        assert_eq!(Granularity::Hours.round(7300), 7200);
        assert_eq!(Granularity::Days.round(90_000), 86_400);
    }

    #[test]
    fn test_granularity_coarser() {
        let coarser: Vec<_> = Granularity::Seconds.coarser().collect();
        assert_eq!(
            coarser,
            vec![Granularity::Minutes, Granularity::Hours, Granularity::Days]
        );
        assert_eq!(Granularity::Days.coarser().count(), 0);
    }

    #[test]
    fn test_granularity_names() {
        for g in Granularity::ALL {
            assert_eq!(Granularity::from_name(g.as_str()), Some(g));
        }
        assert!(Granularity::from_name("weeks").is_none());
        assert!(matches!(
            "weeks".parse::<Granularity>(),
            Err(Error::UnsupportedGranularity(_))
        ));
    }

    #[test]
    fn test_point_id_roundtrip() {
        let id = PointId::new(1_600_000_000, 42, 7).unwrap();
        assert_eq!(id.timestamp(), 1_600_000_000);
        assert_eq!(id.metric_id(), 42);
    }

    #[test]
    fn test_point_id_orders_by_time_first() {
        let early = PointId::new(100, u64::MAX, u32::MAX).unwrap();
        let late = PointId::new(101, 0, 0).unwrap();
        assert!(early < late);

        let a = PointId::new(100, 1, 1).unwrap();
        let b = PointId::new(100, 1, 2).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_point_id_rejects_out_of_range() {
        assert!(matches!(
            PointId::new(-1, 1, 0),
            Err(Error::InvalidTimestamp(-1))
        ));
        assert!(PointId::new(MAX_ENCODABLE_TIMESTAMP + 1, 1, 0).is_err());
        assert!(PointId::new(MAX_ENCODABLE_TIMESTAMP, 1, 0).is_ok());
    }

    #[test]
    fn test_tag_set_contains_all() {
        let metric_tags: TagSet = [("node", "gw-01"), ("iface", "eth0")].into_iter().collect();
        let query: TagSet = [("node", "gw-01")].into_iter().collect();
        assert!(metric_tags.contains_all(&query));
        assert!(metric_tags.contains_all(&TagSet::new()));

        let other: TagSet = [("node", "gw-02")].into_iter().collect();
        assert!(!metric_tags.contains_all(&other));
    }

    #[test]
    fn test_tag_set_nested_values() {
        let mut tags = TagSet::new();
        tags.insert("location", serde_json::json!({ "lat": 46.05, "lon": 14.51 }));
        let query_hit: TagSet =
            [("location", serde_json::json!({ "lon": 14.51, "lat": 46.05 }))]
                .into_iter()
                .collect();
        assert!(tags.contains_all(&query_hit));
    }

    #[test]
    fn test_tag_set_reserved() {
        let mut tags = TagSet::new();
        tags.insert("metric_id", 5);
        assert!(matches!(
            tags.check_reserved(),
            Err(Error::ReservedTagName(_))
        ));

        let clean: TagSet = [("node", "gw-01")].into_iter().collect();
        assert!(clean.check_reserved().is_ok());
    }

    #[test]
    fn test_tag_set_merged() {
        let base: TagSet = [("node", "gw-01"), ("iface", "eth0")].into_iter().collect();
        let extra: TagSet = [("iface", "eth1"), ("vlan", "7")].into_iter().collect();
        let merged = base.merged(&extra);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("iface"), Some(&Value::from("eth1")));
    }
}
