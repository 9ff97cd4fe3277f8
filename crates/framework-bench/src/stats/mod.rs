//! Summary statistics for sample sets
//!
//! # Examples
//!
//! ```
//! use framework_bench::stats::Summary;
//!
//! let summary = Summary::from_samples(&[30.0, 45.0, 32.5, 41.0]).unwrap();
//! assert_eq!(summary.count, 4);
//! assert_eq!(summary.median, 36.75);
//! ```

pub mod percentiles;

pub use percentiles::{median, percentile};

use serde::{Deserialize, Serialize};

/// Statistics written next to the raw values of a result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Zero when any sample is zero or negative
    pub geometric_mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
}

impl Summary {
    /// `None` for an empty sample set
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let sorted = percentiles::sorted(samples);
        let count = sorted.len();
        let min = sorted[0];
        let max = sorted[count - 1];

        // Rounding can push the mean of near-identical values out of range
        let mean = (sorted.iter().sum::<f64>() / count as f64).clamp(min, max);

        let std_dev = if count > 1 {
            let squared: f64 = sorted.iter().map(|&x| (x - mean).powi(2)).sum();
            (squared / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        let geometric_mean = if min > 0.0 {
            let log_mean = sorted.iter().map(|x| x.ln()).sum::<f64>() / count as f64;
            log_mean.exp().clamp(min, max)
        } else {
            0.0
        };

        Some(Summary {
            count,
            min,
            max,
            mean,
            median: median(&sorted)?,
            geometric_mean,
            std_dev,
        })
    }

    /// `std_dev / mean`, infinite for a zero mean
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            f64::INFINITY
        } else {
            self.std_dev / self.mean
        }
    }
}
