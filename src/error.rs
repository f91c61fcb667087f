//! Error types for the engine

use thiserror::Error;

use crate::types::MetricId;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// A supplied tag uses one of the reserved keys
    #[error("Tag uses reserved key: {0}")]
    ReservedTagName(String),

    /// The requested granularity is not one of the known set
    #[error("Unsupported granularity: {0}")]
    UnsupportedGranularity(String),

    /// An unknown downsampler name was requested
    #[error("Unsupported downsampler: {0}")]
    UnsupportedDownsampler(String),

    /// An operation referenced a metric id that does not exist
    #[error("Metric not found: {0}")]
    MetricNotFound(MetricId),

    /// A tag query matched more than one metric
    #[error("Tag query matched more than one metric")]
    MultipleMetricsReturned,

    /// A timestamp falls outside the range the point identifier can encode
    #[error("Timestamp {0} outside the encodable range")]
    InvalidTimestamp(i64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
