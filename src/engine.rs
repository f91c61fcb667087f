//! Engine facade
//!
//! [`Datastream`] owns the metric registry and the datapoint store and
//! exposes the boundary API the surrounding platform calls: tag-based
//! metric management, datapoint insertion, point reads, and the periodic
//! maintenance trigger. Everything else in the crate is reached through
//! this type.
//!
//! # Example
//!
//! ```rust
//! use datastream::{Datastream, TagSet};
//!
//! let engine = Datastream::default();
//!
//! let mut tags = TagSet::new();
//! tags.insert("node", "gw-01");
//! let metric = engine
//!     .ensure_metric(&tags, &TagSet::new(), &["count", "sum"], "seconds")
//!     .unwrap();
//!
//! engine.insert(metric, 0.25).unwrap();
//! ```

use tracing::warn;

use crate::config::EngineConfig;
use crate::executor::DownsampleExecutor;
use crate::query::{self, ReadPoint};
use crate::registry::{Metric, MetricStore};
use crate::store::DatapointStore;
use crate::types::{unix_now, Granularity, MetricId, PointId, TagSet, Timestamp};
use crate::Result;

/// Metric storage and downsampling engine
///
/// Cheap to share behind an `Arc`; every operation takes `&self` and any
/// number of threads may insert and downsample concurrently.
#[derive(Debug)]
pub struct Datastream {
    config: EngineConfig,
    metrics: MetricStore,
    datapoints: DatapointStore,
}

impl Default for Datastream {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            metrics: MetricStore::new(),
            datapoints: DatapointStore::new(),
        }
    }
}

impl Datastream {
    /// Create an engine with the given configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: MetricStore::new(),
            datapoints: DatapointStore::new(),
        })
    }

    /// Ensure a metric exists for the given tag query
    ///
    /// `tags`, `downsamplers` and `highest_granularity` apply only when
    /// the query matches nothing and a metric is created; an existing
    /// match returns its id unchanged.
    pub fn ensure_metric<S: AsRef<str>>(
        &self,
        query_tags: &TagSet,
        tags: &TagSet,
        downsamplers: &[S],
        highest_granularity: &str,
    ) -> Result<MetricId> {
        self.metrics.ensure(
            query_tags,
            tags,
            downsamplers,
            highest_granularity,
            self.config.lease_backdate_secs,
        )
    }

    /// A metric's tags, with `metric_id`, `downsamplers` and
    /// `highest_granularity` synthesized into the result
    pub fn get_tags(&self, metric_id: MetricId) -> Result<TagSet> {
        self.metrics.get_tags(metric_id)
    }

    /// Replace a metric's tags
    pub fn update_tags(&self, metric_id: MetricId, tags: TagSet) -> Result<()> {
        self.metrics.update_tags(metric_id, tags)
    }

    /// Insert a datapoint stamped with the current wall-clock time
    pub fn insert(&self, metric_id: MetricId, value: f64) -> Result<PointId> {
        self.insert_at(metric_id, value, unix_now())
    }

    /// Insert a datapoint with an explicit timestamp
    ///
    /// The point lands in the metric's `highest_granularity` collection,
    /// then every coarser granularity is checked: when the point's rounded
    /// timestamp differs from that granularity's checkpoint, a bucket
    /// boundary was crossed and the downsample executor runs inline.
    /// Executor outcomes never affect the insert; a raw point is stored
    /// regardless of what downsampling does afterwards.
    pub fn insert_at(
        &self,
        metric_id: MetricId,
        value: f64,
        timestamp: Timestamp,
    ) -> Result<PointId> {
        let metric = self.metrics.get(metric_id)?;
        let id =
            self.datapoints
                .insert_raw(metric.highest_granularity, metric_id, timestamp, value)?;
        self.downsample_check(&metric, timestamp);
        Ok(id)
    }

    /// Fetch points for one metric in `[from, to]`
    ///
    /// At the metric's `highest_granularity` this returns raw scalars;
    /// at coarser granularities, aggregate buckets with derived values
    /// applied. Requests finer than the stored resolution are clamped.
    pub fn get_data(
        &self,
        metric_id: MetricId,
        granularity: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ReadPoint>> {
        let granularity: Granularity = granularity.parse()?;
        query::get_data(
            &self.metrics,
            &self.datapoints,
            metric_id,
            granularity,
            from,
            to,
        )
    }

    /// Run downsampling for every metric matching a tag query
    ///
    /// An empty query matches all metrics. Uses the current wall-clock
    /// time as the reference, so buckets the data stream has moved past
    /// get finalized even when no new inserts arrive. Returns the number
    /// of metrics processed.
    pub fn downsample_metrics(&self, query_tags: &TagSet) -> Result<usize> {
        let now = unix_now();
        let ids = self.metrics.matching(query_tags);
        let processed = ids.len();
        for id in ids {
            let metric = self.metrics.get(id)?;
            self.downsample_check(&metric, now);
        }
        Ok(processed)
    }

    /// Trigger the executor for every granularity whose bucket boundary
    /// the given timestamp has crossed
    fn downsample_check(&self, metric: &Metric, timestamp: Timestamp) {
        let executor = DownsampleExecutor::new(&self.metrics, &self.datapoints, &self.config);
        for granularity in metric.highest_granularity.coarser() {
            let rounded = granularity.round(timestamp);
            let checkpoint = metric
                .downsample_state
                .get(&granularity)
                .and_then(|state| state.timestamp);
            if checkpoint == Some(rounded) {
                continue;
            }
            if let Err(error) = executor.run(metric.id, granularity, rounded) {
                warn!(
                    metric_id = metric.id,
                    granularity = %granularity,
                    %error,
                    "downsample run failed"
                );
            }
        }
    }
}
