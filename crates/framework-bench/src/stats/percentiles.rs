//! Percentiles over benchmark samples

use std::cmp::Ordering;

/// Sorted copy of `samples`; NaN compares equal to everything
pub(crate) fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Percentile `p` (0 to 100) of `samples`, linearly interpolated between
/// the nearest ranks.
///
/// Returns `None` when `samples` is empty or `p` is out of range.
///
/// ```
/// use framework_bench::stats::percentile;
///
/// assert_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 50.0), Some(2.5));
/// ```
pub fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    if samples.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }

    let sorted = sorted(samples);
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }

    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        Some(sorted[lower])
    } else {
        let fraction = rank - lower as f64;
        Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
    }
}

/// The 50th percentile
pub fn median(samples: &[f64]) -> Option<f64> {
    percentile(samples, 50.0)
}
