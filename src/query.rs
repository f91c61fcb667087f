//! Point reads with derived-aggregate postprocessing
//!
//! The read surface for one metric over a time range. Raw scalars come
//! back untouched; aggregate buckets get the metric's derived downsamplers
//! (`mean`, `std_dev`) applied from the stored aggregate codes. Derived
//! values are never stored, only computed here.

use crate::downsamplers;
use crate::registry::MetricStore;
use crate::store::DatapointStore;
use crate::types::{
    Granularity, MetricId, PointValue, Timestamp, MAX_ENCODABLE_TIMESTAMP,
};
use crate::Result;

/// One point returned by a read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPoint {
    /// Timestamp of the raw sample, or the bucket's rounded timestamp
    pub timestamp: Timestamp,
    /// Scalar for raw reads, postprocessed value map for aggregate reads
    pub value: PointValue,
}

/// Fetch points for one metric in `[from, to]` at the given granularity
///
/// A granularity finer than the metric's `highest_granularity` is clamped
/// to it; the finest stored data is what comes back.
pub(crate) fn get_data(
    metrics: &MetricStore,
    datapoints: &DatapointStore,
    metric_id: MetricId,
    granularity: Granularity,
    from: Timestamp,
    to: Timestamp,
) -> Result<Vec<ReadPoint>> {
    let metric = metrics.get(metric_id)?;
    let granularity = granularity.max(metric.highest_granularity);

    if to < 0 || from > MAX_ENCODABLE_TIMESTAMP || from > to {
        return Ok(Vec::new());
    }
    let since = from.max(0);

    let points = datapoints.scan(granularity, metric_id, Some(since))?;
    let result = points
        .into_iter()
        .take_while(|point| point.timestamp() <= to)
        .map(|point| {
            let timestamp = point.timestamp();
            let value = match point.value {
                PointValue::Scalar(value) => PointValue::Scalar(value),
                PointValue::Bucket(mut values) => {
                    downsamplers::postprocess(&metric.downsamplers, &mut values);
                    PointValue::Bucket(values)
                }
            };
            ReadPoint { timestamp, value }
        })
        .collect();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::downsamplers::codes;
    use crate::types::{TagSet, ValueMap};

    fn fixture(downsamplers: &[&str]) -> (MetricStore, DatapointStore, MetricId) {
        let metrics = MetricStore::new();
        let datapoints = DatapointStore::new();
        let tags: TagSet = [("node", "gw-01")].into_iter().collect();
        let id = metrics
            .ensure(
                &tags,
                &TagSet::new(),
                downsamplers,
                "seconds",
                EngineConfig::default().lease_backdate_secs,
            )
            .unwrap();
        (metrics, datapoints, id)
    }

    #[test]
    fn test_raw_read_respects_range() {
        let (metrics, datapoints, id) = fixture(&["count"]);
        for timestamp in [100, 200, 300] {
            datapoints
                .insert_raw(Granularity::Seconds, id, timestamp, 1.0)
                .unwrap();
        }

        let points = get_data(&metrics, &datapoints, id, Granularity::Seconds, 150, 250).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 200);
    }

    #[test]
    fn test_finer_than_stored_is_clamped() {
        let metrics = MetricStore::new();
        let datapoints = DatapointStore::new();
        let tags: TagSet = [("node", "gw-01")].into_iter().collect();
        let id = metrics
            .ensure(&tags, &TagSet::new(), &["count"], "minutes", 3_600)
            .unwrap();
        datapoints
            .insert_raw(Granularity::Minutes, id, 600, 4.0)
            .unwrap();

        let points = get_data(&metrics, &datapoints, id, Granularity::Seconds, 0, 1_000).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, PointValue::Scalar(4.0));
    }

    #[test]
    fn test_aggregate_read_derives_mean() {
        let (metrics, datapoints, id) = fixture(&["mean"]);
        let mut values = ValueMap::new();
        values.insert(codes::COUNT.to_string(), 2.0);
        values.insert(codes::SUM.to_string(), 3.0);
        datapoints
            .upsert_aggregate(Granularity::Minutes, id, 600, values)
            .unwrap();

        let points = get_data(&metrics, &datapoints, id, Granularity::Minutes, 0, 1_000).unwrap();
        let PointValue::Bucket(bucket) = &points[0].value else {
            panic!("expected aggregate bucket");
        };
        assert_eq!(bucket[codes::MEAN], 1.5);
    }

    #[test]
    fn test_empty_for_inverted_or_out_of_range_window() {
        let (metrics, datapoints, id) = fixture(&["count"]);
        datapoints
            .insert_raw(Granularity::Seconds, id, 100, 1.0)
            .unwrap();

        assert!(get_data(&metrics, &datapoints, id, Granularity::Seconds, 300, 200)
            .unwrap()
            .is_empty());
        assert!(get_data(
            &metrics,
            &datapoints,
            id,
            Granularity::Seconds,
            MAX_ENCODABLE_TIMESTAMP + 1,
            MAX_ENCODABLE_TIMESTAMP + 2
        )
        .unwrap()
        .is_empty());
    }
}
