//! The normalized difference vegetation index.
//!
//! This module defines the [`IndexEngine`] trait for pluggable index
//! computation and the [`IndexEngineKind`] enum for selecting which
//! implementation to use.
//!
//! # Strategy pattern
//!
//! Both engines compute exactly the same cell function:
//!
//! ```text
//! ndvi = clip((nir - red) / (nir + red), -1, 1)     (0.0 where nir + red == 0)
//! ```
//!
//! [`IndexEngineKind::Sequential`] walks the cells on the calling thread.
//! [`IndexEngineKind::Parallel`] splits them across the rayon pool when the
//! `parallel` feature is compiled in. The kind is chosen once, at startup,
//! by [`IndexEngineKind::detect`] or from configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::normalize::Bands;
use crate::types::{Grid, IndexGrid, PipelineError};

/// Selects which index engine to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexEngineKind {
    /// Single-threaded cell loop.
    #[default]
    Sequential,
    /// Data-parallel cell loop on the rayon global pool.
    ///
    /// Without the `parallel` feature this runs sequentially.
    Parallel,
}

impl IndexEngineKind {
    /// Pick the engine for this process.
    ///
    /// Returns [`Parallel`](Self::Parallel) when the `parallel` feature is
    /// enabled and more than one CPU is available.
    #[must_use]
    pub fn detect() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
        if cfg!(feature = "parallel") && cpus > 1 {
            Self::Parallel
        } else {
            Self::Sequential
        }
    }
}

impl fmt::Display for IndexEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

impl FromStr for IndexEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!(
                "unknown index engine '{other}' (expected 'sequential' or 'parallel')"
            )),
        }
    }
}

/// Trait for index computation strategies.
pub trait IndexEngine {
    /// Compute the index for two equally shaped, non-empty bands.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the shapes differ and
    /// [`PipelineError::EmptyGrid`] if they have no cells.
    fn compute(&self, bands: &Bands) -> Result<IndexGrid, PipelineError>;
}

impl IndexEngine for IndexEngineKind {
    fn compute(&self, bands: &Bands) -> Result<IndexGrid, PipelineError> {
        let (nir, red) = (&bands.nir, &bands.red);
        if nir.dimensions() != red.dimensions() {
            return Err(PipelineError::ShapeMismatch {
                nir: nir.dimensions(),
                red: red.dimensions(),
            });
        }
        if nir.is_empty() {
            return Err(PipelineError::EmptyGrid);
        }

        let values = match *self {
            Self::Sequential => compute_sequential(nir.values(), red.values()),
            Self::Parallel => compute_parallel(nir.values(), red.values()),
        };
        Grid::from_vec(nir.dimensions(), values).map(IndexGrid::new)
    }
}

/// NDVI for a single cell.
///
/// A zero denominator yields exactly `0.0` rather than NaN or infinity.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn ndvi_cell(nir: f32, red: f32) -> f32 {
    let denom = nir + red;
    if denom == 0.0 {
        return 0.0;
    }
    ((nir - red) / denom).clamp(-1.0, 1.0)
}

fn compute_sequential(nir: &[f32], red: &[f32]) -> Vec<f32> {
    nir.iter()
        .zip(red)
        .map(|(&n, &r)| ndvi_cell(n, r))
        .collect()
}

#[cfg(feature = "parallel")]
fn compute_parallel(nir: &[f32], red: &[f32]) -> Vec<f32> {
    use rayon::prelude::*;

    nir.par_iter()
        .zip(red.par_iter())
        .map(|(&n, &r)| ndvi_cell(n, r))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn compute_parallel(nir: &[f32], red: &[f32]) -> Vec<f32> {
    compute_sequential(nir, red)
}
