//! Datastream - embedded metric storage and multi-granularity downsampling
//!
//! This library provides the time-series core of a network-monitoring
//! platform:
//!
//! - Metrics identified and deduplicated by an arbitrary, unordered tag-set
//! - Raw datapoints progressively aggregated into coarser granularities
//!   without re-processing a datapoint twice
//! - At most one downsampling pass per (metric, granularity) pair across
//!   any number of concurrent writers, coordinated by a self-expiring
//!   lease instead of a global lock
//! - Streaming aggregates (count, sum, sum of squares, min, max, and
//!   derived mean/standard deviation) in bounded memory
//!
//! The surrounding platform talks to the engine through the narrow
//! [`Datastream`] API: `ensure_metric`, `get_tags`/`update_tags`,
//! `insert`/`insert_at`, `get_data`, and `downsample_metrics`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod downsamplers;
pub mod error;
pub mod types;

/// Metric registry and downsample state
pub mod registry;

/// Datapoint storage partitioned by granularity
pub mod store;

/// Downsample executor
pub mod executor;

/// Point reads with derived-aggregate postprocessing
pub mod query;

/// Engine facade
pub mod engine;

// Re-export main types
pub use config::EngineConfig;
pub use downsamplers::Downsampler;
pub use engine::Datastream;
pub use error::{Error, Result};
pub use executor::DownsampleOutcome;
pub use query::ReadPoint;
pub use types::{Datapoint, Granularity, MetricId, PointId, PointValue, TagSet, Timestamp, ValueMap};
