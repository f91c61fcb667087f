//! Downsample executor
//!
//! Folds raw datapoints into coarser buckets for one (metric, granularity)
//! pair. A run goes through four steps:
//!
//! 1. **Reserve** the granularity's lease with a conditional update.
//!    Losing the race is a no-op, not an error.
//! 2. **Determine the window**: scan raw points from the checkpoint
//!    (inclusive), or everything on the first run. The first scanned point
//!    re-closes the checkpoint's own bucket, which is safe because bucket
//!    writes are idempotent upserts.
//! 3. **Stream-aggregate** in ascending time order, closing a bucket each
//!    time the rounded timestamp changes. The run stops when it reaches the
//!    reference bucket without closing it; more raw points may still land
//!    there, so it is re-aggregated on the next crossing.
//! 4. **Checkpoint and release**: advance the checkpoint to the last folded
//!    bucket and backdate the lease in one update.
//!
//! A fault mid-run leaves the lease held until natural expiry; the next
//! attempt retries the same window and every write repeats idempotently.

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::registry::MetricStore;
use crate::store::DatapointStore;
use crate::types::{unix_now, Granularity, MetricId, PointValue, Timestamp, ValueMap};
use crate::Result;

/// What a single executor run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleOutcome {
    /// Another executor holds the lease; nothing was done
    Skipped,
    /// The run completed and released its lease
    Completed {
        /// Buckets closed and upserted during this run
        buckets_closed: usize,
        /// Checkpoint written at the end of the run, if any bucket was folded
        checkpoint: Option<Timestamp>,
    },
}

/// Executor for one downsampling pass
pub struct DownsampleExecutor<'a> {
    metrics: &'a MetricStore,
    datapoints: &'a DatapointStore,
    config: &'a EngineConfig,
}

impl<'a> DownsampleExecutor<'a> {
    /// Borrow the stores the run will operate on
    pub fn new(
        metrics: &'a MetricStore,
        datapoints: &'a DatapointStore,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            metrics,
            datapoints,
            config,
        }
    }

    /// Run one downsampling pass
    ///
    /// `reference` is the rounded timestamp of the bucket that triggered
    /// the run; aggregation stops there and leaves that bucket open.
    pub fn run(
        &self,
        metric_id: MetricId,
        granularity: Granularity,
        reference: Timestamp,
    ) -> Result<DownsampleOutcome> {
        let now = unix_now();
        let until = now + self.config.lease_duration_secs as i64;
        let Some(metric) = self.metrics.try_reserve(metric_id, granularity, now, until) else {
            debug!(
                metric_id,
                granularity = %granularity,
                "downsample lease unavailable, skipping"
            );
            return Ok(DownsampleOutcome::Skipped);
        };

        let since = metric
            .downsample_state
            .get(&granularity)
            .and_then(|state| state.timestamp);
        let points = self
            .datapoints
            .scan(metric.highest_granularity, metric_id, since)?;

        let mut accumulators: Vec<_> = metric
            .downsamplers
            .iter()
            .filter_map(|d| d.accumulator())
            .collect();

        let mut last_bucket: Option<Timestamp> = None;
        let mut buckets_closed = 0usize;
        for point in points {
            let rounded = granularity.round(point.timestamp());
            let PointValue::Scalar(value) = point.value else {
                warn!(
                    metric_id,
                    point_id = %point.id,
                    "non-scalar point in raw collection, skipping"
                );
                continue;
            };

            match last_bucket {
                None => {
                    for accumulator in &mut accumulators {
                        accumulator.reset();
                    }
                }
                Some(closing) if closing != rounded => {
                    let mut values = ValueMap::new();
                    for accumulator in &mut accumulators {
                        accumulator.finish(&mut values);
                        accumulator.reset();
                    }
                    self.datapoints
                        .upsert_aggregate(granularity, metric_id, closing, values)?;
                    buckets_closed += 1;
                }
                Some(_) => {}
            }

            // The reference bucket stays open; later points belong to the
            // next run.
            if rounded >= reference {
                break;
            }

            for accumulator in &mut accumulators {
                accumulator.update(value);
            }
            last_bucket = Some(rounded);
        }

        let released = now - self.config.lease_backdate_secs as i64;
        self.metrics
            .complete_run(metric_id, granularity, last_bucket, released);
        debug!(
            metric_id,
            granularity = %granularity,
            buckets_closed,
            checkpoint = ?last_bucket,
            "downsample run completed"
        );
        Ok(DownsampleOutcome::Completed {
            buckets_closed,
            checkpoint: last_bucket,
        })
    }
}
