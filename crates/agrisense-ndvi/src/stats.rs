//! Summary statistics over an [`IndexGrid`].
//!
//! All functions treat the grid as dense: there are no missing-data
//! markers, so every cell counts toward every statistic.

use serde::{Deserialize, Serialize};

use crate::types::{IndexGrid, PipelineError};

/// Number of histogram bins spanning `[-1, 1]`.
pub const HISTOGRAM_BINS: usize = 10;

/// Lower edge of the histogram range.
pub const HISTOGRAM_MIN: f64 = -1.0;

/// Upper edge of the histogram range (inclusive for the last bin).
pub const HISTOGRAM_MAX: f64 = 1.0;

/// Default index value below which a cell counts as stressed.
pub const DEFAULT_STRESS_THRESHOLD: f64 = 0.3;

/// Equal-width histogram of index values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Cell count per bin.
    pub bins: Vec<u64>,
    /// Bin edges; `edges.len() == bins.len() + 1`.
    pub edges: Vec<f64>,
}

/// Statistics derived from one index grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean: f64,
    pub median: f64,
    /// Fraction of cells strictly below the stress threshold.
    pub stress_fraction: f64,
    pub histogram: Histogram,
}

impl Statistics {
    /// Compute every statistic for `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyGrid`] if the grid has no cells and
    /// [`PipelineError::InvalidInput`] if `threshold` is not finite.
    pub fn from_index(index: &IndexGrid, threshold: f64) -> Result<Self, PipelineError> {
        let values = index.values();
        Ok(Self {
            mean: mean(values)?,
            median: median(values)?,
            stress_fraction: stress_fraction(values, threshold)?,
            histogram: histogram(values),
        })
    }
}

/// Arithmetic mean.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyGrid`] for an empty slice.
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f32]) -> Result<f64, PipelineError> {
    if values.is_empty() {
        return Err(PipelineError::EmptyGrid);
    }
    let sum: f64 = values.iter().map(|&v| f64::from(v)).sum();
    Ok(sum / values.len() as f64)
}

/// Median; for an even count, the mean of the two middle values.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyGrid`] for an empty slice.
pub fn median(values: &[f32]) -> Result<f64, PipelineError> {
    if values.is_empty() {
        return Err(PipelineError::EmptyGrid);
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(f64::from(sorted[mid]))
    } else {
        Ok((f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0)
    }
}

/// Fraction of values strictly below `threshold`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyGrid`] for an empty slice; an empty grid
/// has no meaningful stress fraction. Returns
/// [`PipelineError::InvalidInput`] if `threshold` is NaN or infinite.
#[allow(clippy::cast_precision_loss)]
pub fn stress_fraction(values: &[f32], threshold: f64) -> Result<f64, PipelineError> {
    if !threshold.is_finite() {
        return Err(PipelineError::InvalidInput(format!(
            "stress threshold must be finite, got {threshold}"
        )));
    }
    if values.is_empty() {
        return Err(PipelineError::EmptyGrid);
    }
    let below = values
        .iter()
        .filter(|&&v| f64::from(v) < threshold)
        .count();
    Ok(below as f64 / values.len() as f64)
}

/// Histogram with [`HISTOGRAM_BINS`] equal-width bins over `[-1, 1]`.
///
/// Bins are half-open `[lo, hi)` except the last, which also includes
/// `1.0`. Values outside the range are not counted; index values are
/// always inside it, so counts sum to the number of cells.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn histogram(values: &[f32]) -> Histogram {
    let bins_f = HISTOGRAM_BINS as f64;
    let width = HISTOGRAM_MAX - HISTOGRAM_MIN;
    let mut bins = vec![0_u64; HISTOGRAM_BINS];
    for &v in values {
        let v = f64::from(v);
        if !(HISTOGRAM_MIN..=HISTOGRAM_MAX).contains(&v) {
            continue;
        }
        let slot = (((v - HISTOGRAM_MIN) / width) * bins_f).floor() as usize;
        bins[slot.min(HISTOGRAM_BINS - 1)] += 1;
    }
    Histogram {
        bins,
        edges: histogram_edges(),
    }
}

/// The [`HISTOGRAM_BINS`]` + 1` bin edges from `-1.0` to `1.0`.
#[must_use]
#[allow(clippy::suboptimal_flops)] // unfused keeps the midpoint edge at exactly 0.0
pub fn histogram_edges() -> Vec<f64> {
    let step = (HISTOGRAM_MAX - HISTOGRAM_MIN) / 10.0;
    (0..=10_u32)
        .map(|i| HISTOGRAM_MIN + f64::from(i) * step)
        .collect()
}
