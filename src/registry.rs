//! Metric registry
//!
//! Metrics are identified by their tag-set and created on first use. Each
//! metric document carries the expanded downsampler list, the granularity
//! its raw points are stored at, and per-granularity downsample state (the
//! checkpoint timestamp plus the `running_until` lease).
//!
//! The metric document is the only shared mutable resource in the engine.
//! Every mutation goes through a single-document operation holding that
//! entry's exclusive lock; there are no multi-document transactions. The
//! lease reservation in [`MetricStore::try_reserve`] is the engine's one
//! synchronization primitive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downsamplers::Downsampler;
use crate::error::{Error, Result};
use crate::types::{unix_now, Granularity, MetricId, TagSet, Timestamp};

/// Downsample progress for one (metric, granularity) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsampleState {
    /// Rounded time of the last bucket finalized into this granularity
    pub timestamp: Option<Timestamp>,

    /// Lease expiry used as a mutual-exclusion token
    ///
    /// A value in the past means no executor is running. Initialized
    /// backdated, so a fresh metric is immediately reservable.
    pub running_until: Timestamp,
}

/// One registered metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Sequentially assigned identifier, immutable after creation
    pub id: MetricId,

    /// Identifying tag-set; replaceable, never containing reserved keys
    pub tags: TagSet,

    /// Expanded downsampler list in canonical order, fixed at creation
    pub downsamplers: Vec<Downsampler>,

    /// Finest granularity this metric stores raw points at, fixed at creation
    pub highest_granularity: Granularity,

    /// Per-granularity checkpoint and lease, one entry for every
    /// granularity coarser than `highest_granularity`
    pub downsample_state: BTreeMap<Granularity, DownsampleState>,
}

/// Registry of metric documents
#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: DashMap<MetricId, Metric>,
    next_id: AtomicU64,
}

impl MetricStore {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Ids of every metric whose tag-set contains all of `query`, ascending
    pub fn matching(&self, query: &TagSet) -> Vec<MetricId> {
        let mut ids: Vec<MetricId> = self
            .metrics
            .iter()
            .filter(|entry| entry.tags.contains_all(query))
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Look up the single metric matching a tag query
    pub fn find_by_tags(&self, query: &TagSet) -> Result<Option<MetricId>> {
        let matches = self.matching(query);
        match matches.as_slice() {
            [] => Ok(None),
            [id] => Ok(Some(*id)),
            _ => Err(Error::MultipleMetricsReturned),
        }
    }

    /// Ensure a metric exists for the given tag query
    ///
    /// Returns the existing metric's id when the query matches one;
    /// `extra_tags`, `downsamplers` and `highest_granularity` only apply
    /// when a new metric is created. Validation happens before any write,
    /// so a failed creation commits nothing.
    ///
    /// Lookup and creation are not atomic against each other: two callers
    /// racing on the same unseen tag-set can both create a metric. Callers
    /// needing stronger guarantees must serialize their first `ensure` per
    /// tag-set.
    pub fn ensure<S: AsRef<str>>(
        &self,
        query_tags: &TagSet,
        extra_tags: &TagSet,
        downsamplers: &[S],
        highest_granularity: &str,
        lease_backdate_secs: u64,
    ) -> Result<MetricId> {
        if let Some(id) = self.find_by_tags(query_tags)? {
            return Ok(id);
        }

        let granularity: Granularity = highest_granularity.parse()?;
        let downsamplers = Downsampler::expand(downsamplers)?;
        let tags = query_tags.merged(extra_tags);
        tags.check_reserved()?;

        let released = unix_now() - lease_backdate_secs as i64;
        let downsample_state = granularity
            .coarser()
            .map(|g| {
                (
                    g,
                    DownsampleState {
                        timestamp: None,
                        running_until: released,
                    },
                )
            })
            .collect();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let metric = Metric {
            id,
            tags,
            downsamplers,
            highest_granularity: granularity,
            downsample_state,
        };
        debug!(
            metric_id = id,
            granularity = %granularity,
            "created metric"
        );
        self.metrics.insert(id, metric);
        Ok(id)
    }

    /// Snapshot of one metric document
    pub fn get(&self, id: MetricId) -> Result<Metric> {
        self.metrics
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::MetricNotFound(id))
    }

    /// A metric's tags plus the synthesized reserved entries
    pub fn get_tags(&self, id: MetricId) -> Result<TagSet> {
        let metric = self.get(id)?;
        let names: Vec<String> = metric
            .downsamplers
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        let mut tags = metric.tags;
        tags.insert("metric_id", metric.id);
        tags.insert("downsamplers", names);
        tags.insert("highest_granularity", metric.highest_granularity.as_str());
        Ok(tags)
    }

    /// Replace a metric's tag-set
    pub fn update_tags(&self, id: MetricId, tags: TagSet) -> Result<()> {
        tags.check_reserved()?;
        let mut entry = self.metrics.get_mut(&id).ok_or(Error::MetricNotFound(id))?;
        entry.tags = tags;
        Ok(())
    }

    /// Atomically reserve the downsample lease for one granularity
    ///
    /// Succeeds only when `running_until` has passed; on success the lease
    /// is extended to `until` and a snapshot of the document is returned.
    /// A `None` result means another executor holds the lease (or the
    /// metric or state entry is gone) and the caller must do nothing.
    pub fn try_reserve(
        &self,
        id: MetricId,
        granularity: Granularity,
        now: Timestamp,
        until: Timestamp,
    ) -> Option<Metric> {
        let mut entry = self.metrics.get_mut(&id)?;
        {
            let state = entry.downsample_state.get_mut(&granularity)?;
            if state.running_until >= now {
                return None;
            }
            state.running_until = until;
        }
        Some(entry.value().clone())
    }

    /// Advance the checkpoint and release the lease in one update
    ///
    /// The checkpoint only moves when the run closed a bucket; it never
    /// regresses. The lease is released unconditionally by backdating
    /// `running_until`.
    pub fn complete_run(
        &self,
        id: MetricId,
        granularity: Granularity,
        closed_through: Option<Timestamp>,
        released_until: Timestamp,
    ) {
        if let Some(mut entry) = self.metrics.get_mut(&id) {
            if let Some(state) = entry.downsample_state.get_mut(&granularity) {
                if closed_through.is_some() {
                    state.timestamp = closed_through;
                }
                state.running_until = released_until;
            }
        }
    }
}
