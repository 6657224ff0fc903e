//! Shared types for the NDVI pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ndvi::IndexEngineKind;
use crate::normalize::NormalizationPolicy;
use crate::preview::PreviewOptions;
use crate::report::Report;
use crate::resample::Reconciler;
use crate::stats::Statistics;

/// Grid dimensions in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Number of rows.
    pub height: usize,
    /// Number of columns.
    pub width: usize,
}

impl Dimensions {
    /// Create a new set of dimensions.
    #[must_use]
    pub const fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Total number of cells (`height * width`).
    #[must_use]
    pub const fn cell_count(self) -> usize {
        self.height * self.width
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.height == 0 || self.width == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// A dense 2D grid of `f32` values stored in row-major order.
///
/// Used for both band intensities (conceptually in `[0, 1]`) and, wrapped
/// in [`IndexGrid`], for the computed index.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    dimensions: Dimensions,
    values: Vec<f32>,
}

/// A single-band light-intensity grid (red or near-infrared).
pub type IntensityGrid = Grid;

impl Grid {
    /// Build a grid from row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if `values.len()` does not
    /// equal `dimensions.cell_count()`.
    pub fn from_vec(dimensions: Dimensions, values: Vec<f32>) -> Result<Self, PipelineError> {
        if values.len() != dimensions.cell_count() {
            return Err(PipelineError::InvalidInput(format!(
                "grid of {dimensions} needs {} values, got {}",
                dimensions.cell_count(),
                values.len()
            )));
        }
        Ok(Self { dimensions, values })
    }

    /// Build a grid from nested rows.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, PipelineError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(height * width);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(PipelineError::InvalidInput(format!(
                    "row {i} has {} values, expected {width}",
                    row.len()
                )));
            }
            values.extend(row);
        }
        Ok(Self {
            dimensions: Dimensions::new(height, width),
            values,
        })
    }

    /// A grid with every cell set to `value`.
    #[must_use]
    pub fn filled(dimensions: Dimensions, value: f32) -> Self {
        Self {
            dimensions,
            values: vec![value; dimensions.cell_count()],
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.dimensions.height
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.dimensions.width
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row-major cell values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at `(row, col)`, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.dimensions.height || col >= self.dimensions.width {
            return None;
        }
        self.values.get(row * self.dimensions.width + col).copied()
    }

    /// Apply `f` to every cell, returning a new grid of the same shape.
    #[must_use]
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            dimensions: self.dimensions,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}

/// The computed vegetation index, one cell per input cell, in `[-1, 1]`.
///
/// Only the index engine constructs this type, so holders can rely on
/// the range and on the grid being non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGrid(Grid);

impl IndexGrid {
    pub(crate) const fn new(grid: Grid) -> Self {
        Self(grid)
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.0.dimensions()
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        self.0.values()
    }
}

/// Configuration for the full pipeline.
///
/// Fixed for the life of a process; per-request knobs live in
/// [`ReportRequest`](crate::report::ReportRequest).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How numeric grids are brought into `[0, 1]`.
    pub normalization: NormalizationPolicy,

    /// Resampling limits for mismatched band shapes.
    pub reconciler: Reconciler,

    /// Which index engine computes the grid.
    pub engine: IndexEngineKind,

    /// Preview rendering parameters.
    pub preview: PreviewOptions,
}

/// Everything the pipeline produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct NdviOutcome {
    /// The per-cell index grid.
    pub index: IndexGrid,

    /// Summary statistics of [`index`](Self::index).
    pub statistics: Statistics,

    /// The report returned to callers.
    pub report: Report,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or malformed grids or images.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Failed to decode an uploaded image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Neither resampling direction could make the bands the same shape.
    #[error("could not reconcile band shapes {nir} and {red}: {reason}")]
    ShapeReconcile {
        nir: Dimensions,
        red: Dimensions,
        reason: String,
    },

    /// Bands of different shapes reached the index engine.
    #[error("nir ({nir}) and red ({red}) bands must have the same shape")]
    ShapeMismatch { nir: Dimensions, red: Dimensions },

    /// A zero-size grid reached the index engine.
    #[error("grid has no cells")]
    EmptyGrid,

    /// The preview image could not be produced.
    #[error("preview encoding failed: {0}")]
    PreviewEncode(String),
}

impl PipelineError {
    /// Whether the error was caused by the caller's input rather than an
    /// internal fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::ImageDecode(_) | Self::EmptyGrid
        )
    }
}
