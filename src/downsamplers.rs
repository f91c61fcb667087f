//! Downsampler plugins
//!
//! Aggregation strategies applied when raw datapoints are folded into
//! coarser buckets. The set is closed:
//!
//! - **Streaming**: Count, Sum, SumSquares, Min, Max. Each folds raw
//!   samples through an accumulator and writes its aggregate code when a
//!   bucket closes.
//! - **Derived**: Mean, StdDev. Never folded during the streaming pass;
//!   they declare dependencies on streaming kinds and compute their code
//!   from already-stored aggregates at read time.
//!
//! Aggregate codes are single letters: `c` count, `s` sum, `q` sum of
//! squares, `l` min, `u` max, `m` mean, `d` standard deviation.
//!
//! # Example
//!
//! ```rust
//! use datastream::downsamplers::Downsampler;
//!
//! // Requesting mean pulls in its dependencies
//! let expanded = Downsampler::expand(&["mean"]).unwrap();
//! assert_eq!(
//!     expanded,
//!     vec![Downsampler::Count, Downsampler::Sum, Downsampler::Mean]
//! );
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ValueMap;

/// Aggregate code vocabulary written into bucket value maps
pub mod codes {
    /// Number of datapoints in the bucket
    pub const COUNT: &str = "c";
    /// Sum of the datapoint values
    pub const SUM: &str = "s";
    /// Sum of the squared datapoint values
    pub const SUM_SQUARES: &str = "q";
    /// Minimum datapoint value
    pub const MIN: &str = "l";
    /// Maximum datapoint value
    pub const MAX: &str = "u";
    /// Mean, derived from sum and count
    pub const MEAN: &str = "m";
    /// Standard deviation, derived from sum, count and sum of squares
    pub const STD_DEV: &str = "d";
}

// =============================================================================
// Downsampler kinds
// =============================================================================

/// One downsampling strategy
///
/// The variant order is the canonical storage order for a metric's
/// expanded downsampler list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Downsampler {
    /// Counts the datapoints in a bucket
    Count,
    /// Sums the datapoint values
    Sum,
    /// Sums the squared datapoint values
    SumSquares,
    /// Tracks the minimum value
    Min,
    /// Tracks the maximum value
    Max,
    /// Mean of the values, derived from sum and count
    Mean,
    /// Standard deviation, derived from sum, count and sum of squares
    StdDev,
}

impl Downsampler {
    /// All downsampler kinds in canonical order
    pub const ALL: [Downsampler; 7] = [
        Downsampler::Count,
        Downsampler::Sum,
        Downsampler::SumSquares,
        Downsampler::Min,
        Downsampler::Max,
        Downsampler::Mean,
        Downsampler::StdDev,
    ];

    /// Name used at the API boundary
    pub fn name(self) -> &'static str {
        match self {
            Downsampler::Count => "count",
            Downsampler::Sum => "sum",
            Downsampler::SumSquares => "sum_squares",
            Downsampler::Min => "min",
            Downsampler::Max => "max",
            Downsampler::Mean => "mean",
            Downsampler::StdDev => "std_dev",
        }
    }

    /// Parse a downsampler name
    pub fn from_name(name: &str) -> Option<Self> {
        Downsampler::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Streaming kinds whose aggregates this kind needs
    ///
    /// Empty for streaming kinds themselves.
    pub fn dependencies(self) -> &'static [Downsampler] {
        match self {
            Downsampler::Mean => &[Downsampler::Sum, Downsampler::Count],
            Downsampler::StdDev => {
                &[Downsampler::Sum, Downsampler::Count, Downsampler::SumSquares]
            }
            _ => &[],
        }
    }

    /// Whether this kind is computed from other aggregates at read time
    pub fn is_derived(self) -> bool {
        !self.dependencies().is_empty()
    }

    /// Fresh accumulator for a streaming kind, `None` for derived kinds
    pub fn accumulator(self) -> Option<Accumulator> {
        match self {
            Downsampler::Count => Some(Accumulator::Count(0)),
            Downsampler::Sum => Some(Accumulator::Sum(0.0)),
            Downsampler::SumSquares => Some(Accumulator::SumSquares(0.0)),
            Downsampler::Min => Some(Accumulator::Min(None)),
            Downsampler::Max => Some(Accumulator::Max(None)),
            Downsampler::Mean | Downsampler::StdDev => None,
        }
    }

    /// Resolve requested names into the full downsampler list
    ///
    /// Unknown names fail with [`Error::UnsupportedDownsampler`].
    /// Dependencies are pulled in transitively and the result is returned
    /// in canonical order. Resolution happens once, at metric creation.
    pub fn expand<S: AsRef<str>>(requested: &[S]) -> Result<Vec<Downsampler>> {
        let mut selected = BTreeSet::new();
        for name in requested {
            let name = name.as_ref();
            let kind = Downsampler::from_name(name)
                .ok_or_else(|| Error::UnsupportedDownsampler(name.to_string()))?;
            selected.insert(kind);
        }

        let mut pending: Vec<Downsampler> = selected.iter().copied().collect();
        while let Some(kind) = pending.pop() {
            for dep in kind.dependencies() {
                if selected.insert(*dep) {
                    pending.push(*dep);
                }
            }
        }

        Ok(selected.into_iter().collect())
    }
}

// =============================================================================
// Streaming accumulators
// =============================================================================

/// Per-bucket accumulator state for one streaming downsampler
///
/// Bounded memory regardless of how many samples fold into the bucket.
#[derive(Debug, Clone)]
pub enum Accumulator {
    /// Datapoint count
    Count(u64),
    /// Running sum
    Sum(f64),
    /// Running sum of squares
    SumSquares(f64),
    /// Smallest value seen, `None` before the first sample
    Min(Option<f64>),
    /// Largest value seen, `None` before the first sample
    Max(Option<f64>),
}

impl Accumulator {
    /// Reset to the empty-bucket state
    pub fn reset(&mut self) {
        match self {
            Accumulator::Count(count) => *count = 0,
            Accumulator::Sum(sum) | Accumulator::SumSquares(sum) => *sum = 0.0,
            Accumulator::Min(value) | Accumulator::Max(value) => *value = None,
        }
    }

    /// Fold one raw sample
    pub fn update(&mut self, datum: f64) {
        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::Sum(sum) => *sum += datum,
            Accumulator::SumSquares(sum) => *sum += datum * datum,
            Accumulator::Min(value) => {
                *value = Some(value.map_or(datum, |current| current.min(datum)));
            }
            Accumulator::Max(value) => {
                *value = Some(value.map_or(datum, |current| current.max(datum)));
            }
        }
    }

    /// Write this accumulator's aggregate code into the bucket being closed
    pub fn finish(&self, output: &mut ValueMap) {
        match self {
            Accumulator::Count(count) => {
                output.insert(codes::COUNT.to_string(), *count as f64);
            }
            Accumulator::Sum(sum) => {
                output.insert(codes::SUM.to_string(), *sum);
            }
            Accumulator::SumSquares(sum) => {
                output.insert(codes::SUM_SQUARES.to_string(), *sum);
            }
            Accumulator::Min(value) => {
                if let Some(min) = value {
                    output.insert(codes::MIN.to_string(), *min);
                }
            }
            Accumulator::Max(value) => {
                if let Some(max) = value {
                    output.insert(codes::MAX.to_string(), *max);
                }
            }
        }
    }
}

// =============================================================================
// Derived postprocessing
// =============================================================================

/// Apply derived downsamplers to a stored bucket value map
///
/// `m = s / c` when mean is enabled. `d = (n·q − s²) / (n·(n−1))` when
/// std_dev is enabled; undefined for `n <= 1`, in which case `d` is
/// omitted rather than emitted as a wrong value.
pub fn postprocess(downsamplers: &[Downsampler], values: &mut ValueMap) {
    let count = values.get(codes::COUNT).copied();
    let sum = values.get(codes::SUM).copied();
    let sum_squares = values.get(codes::SUM_SQUARES).copied();

    if downsamplers.contains(&Downsampler::Mean) {
        if let (Some(s), Some(c)) = (sum, count) {
            if c > 0.0 {
                values.insert(codes::MEAN.to_string(), s / c);
            }
        }
    }

    if downsamplers.contains(&Downsampler::StdDev) {
        if let (Some(s), Some(n), Some(q)) = (sum, count, sum_squares) {
            if n > 1.0 {
                values.insert(codes::STD_DEV.to_string(), (n * q - s * s) / (n * (n - 1.0)));
            }
        }
    }
}
