//! Datapoint storage partitioned by granularity
//!
//! One ordered collection per granularity. Raw points for a metric live in
//! the collection named after its `highest_granularity`; closed downsample
//! buckets live in the collection of the granularity they were aggregated
//! into. All writes are appends or per-identifier upserts; identifiers sort
//! by time, so time-range reads are identifier range scans.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::types::{Datapoint, Granularity, MetricId, PointId, PointValue, Timestamp, ValueMap};
use crate::Result;

/// Append/upsert-only storage for raw and aggregated datapoints
#[derive(Debug)]
pub struct DatapointStore {
    /// One collection per granularity, indexed by [`Granularity::index`]
    collections: [RwLock<BTreeMap<PointId, PointValue>>; 4],

    /// Disambiguates raw inserts landing on the same second.
    /// Sequence 0 is reserved for aggregate identifiers.
    sequence: AtomicU32,
}

impl Default for DatapointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DatapointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            collections: std::array::from_fn(|_| RwLock::new(BTreeMap::new())),
            sequence: AtomicU32::new(1),
        }
    }

    /// Append one raw point
    pub fn insert_raw(
        &self,
        granularity: Granularity,
        metric: MetricId,
        timestamp: Timestamp,
        value: f64,
    ) -> Result<PointId> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = PointId::new(timestamp, metric, sequence)?;
        self.collections[granularity.index()]
            .write()
            .insert(id, PointValue::Scalar(value));
        Ok(id)
    }

    /// Write or replace exactly one aggregate bucket
    pub fn upsert_aggregate(
        &self,
        granularity: Granularity,
        metric: MetricId,
        rounded_timestamp: Timestamp,
        values: ValueMap,
    ) -> Result<PointId> {
        let id = PointId::aggregate(rounded_timestamp, metric)?;
        self.collections[granularity.index()]
            .write()
            .insert(id, PointValue::Bucket(values));
        Ok(id)
    }

    /// Points for one metric in ascending time order
    ///
    /// With a lower bound, returns points whose identifier is at or past
    /// the encoded timestamp; the bound is inclusive. The returned snapshot
    /// is finite and a scan can be restarted from any point's timestamp.
    pub fn scan(
        &self,
        granularity: Granularity,
        metric: MetricId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Datapoint>> {
        let lower = match since {
            Some(timestamp) => Bound::Included(PointId::lower_bound(timestamp)?),
            None => Bound::Unbounded,
        };
        let collection = self.collections[granularity.index()].read();
        let points = collection
            .range((lower, Bound::Unbounded))
            .filter(|(id, _)| id.metric_id() == metric)
            .map(|(id, value)| Datapoint {
                id: *id,
                metric,
                value: value.clone(),
            })
            .collect();
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_points_scan_in_time_order() {
        let store = DatapointStore::new();
        store
            .insert_raw(Granularity::Seconds, 1, 1_000, 3.0)
            .unwrap();
        store.insert_raw(Granularity::Seconds, 1, 999, 1.0).unwrap();
        store
            .insert_raw(Granularity::Seconds, 1, 1_001, 2.0)
            .unwrap();

        let points = store.scan(Granularity::Seconds, 1, None).unwrap();
        let timestamps: Vec<_> = points.iter().map(|p| p.timestamp()).collect();
        assert_eq!(timestamps, vec![999, 1_000, 1_001]);
    }

    #[test]
    fn test_same_second_inserts_are_distinct() {
        let store = DatapointStore::new();
        let a = store
            .insert_raw(Granularity::Seconds, 1, 1_000, 1.0)
            .unwrap();
        let b = store
            .insert_raw(Granularity::Seconds, 1, 1_000, 2.0)
            .unwrap();
        assert_ne!(a, b);
        assert!(a < b);

        let points = store.scan(Granularity::Seconds, 1, None).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_scan_filters_by_metric() {
        let store = DatapointStore::new();
        store
            .insert_raw(Granularity::Seconds, 1, 1_000, 1.0)
            .unwrap();
        store
            .insert_raw(Granularity::Seconds, 2, 1_000, 2.0)
            .unwrap();

        let points = store.scan(Granularity::Seconds, 1, None).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metric, 1);
    }

    #[test]
    fn test_scan_lower_bound_is_inclusive() {
        let store = DatapointStore::new();
        store.insert_raw(Granularity::Seconds, 1, 100, 1.0).unwrap();
        store.insert_raw(Granularity::Seconds, 1, 200, 2.0).unwrap();
        store.insert_raw(Granularity::Seconds, 1, 300, 3.0).unwrap();

        let points = store.scan(Granularity::Seconds, 1, Some(200)).unwrap();
        let timestamps: Vec<_> = points.iter().map(|p| p.timestamp()).collect();
        assert_eq!(timestamps, vec![200, 300]);
    }

    #[test]
    fn test_upsert_aggregate_replaces_bucket() {
        let store = DatapointStore::new();
        let mut first = ValueMap::new();
        first.insert("c".to_string(), 1.0);
        let mut second = ValueMap::new();
        second.insert("c".to_string(), 2.0);

        let a = store
            .upsert_aggregate(Granularity::Minutes, 1, 600, first)
            .unwrap();
        let b = store
            .upsert_aggregate(Granularity::Minutes, 1, 600, second.clone())
            .unwrap();
        assert_eq!(a, b);

        let points = store.scan(Granularity::Minutes, 1, None).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, PointValue::Bucket(second));
    }

    #[test]
    fn test_collections_are_partitioned_by_granularity() {
        let store = DatapointStore::new();
        store
            .insert_raw(Granularity::Minutes, 1, 1_000, 1.0)
            .unwrap();

        assert!(store.scan(Granularity::Seconds, 1, None).unwrap().is_empty());
        assert_eq!(store.scan(Granularity::Minutes, 1, None).unwrap().len(), 1);
    }
}
