//! Shape reconciliation: bring the two bands to a common size.
//!
//! Bands captured by different sensors (or uploaded as images of
//! different resolutions) rarely line up exactly. The [`Reconciler`]
//! resamples the red band onto the NIR grid with bilinear interpolation,
//! falling back to resampling NIR onto the red grid if that fails.
//!
//! Resampling goes through 8-bit precision: values are clipped to
//! `[0, 1]`, scaled to `[0, 255]` and truncated before the resize, then
//! divided back down. The quantization error is bounded by `1/255`.

use image::GrayImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::normalize::Bands;
use crate::types::{Dimensions, Grid, PipelineError};

/// Why a single resampling direction failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResampleError {
    /// The source grid has no cells to interpolate from.
    #[error("source grid {0} is empty")]
    EmptySource(Dimensions),
    /// The target grid has no cells.
    #[error("target grid {0} is empty")]
    EmptyTarget(Dimensions),
    /// The target would exceed the configured cell budget.
    #[error("target grid {target} exceeds the limit of {max_pixels} cells")]
    TooLarge { target: Dimensions, max_pixels: usize },
    /// An axis does not fit the raster backend's `u32` coordinates.
    #[error("grid {0} is too large to resample")]
    AxisOverflow(Dimensions),
}

/// Makes two bands dimensionally compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciler {
    /// Largest target grid (in cells) a resample may produce.
    pub max_pixels: usize,
}

impl Reconciler {
    /// Default cell budget for a resample target (64 Mi cells).
    pub const DEFAULT_MAX_PIXELS: usize = 1 << 26;
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            max_pixels: Self::DEFAULT_MAX_PIXELS,
        }
    }
}

impl Reconciler {
    /// Return both bands at identical dimensions.
    ///
    /// Bands that already match are returned untouched. Otherwise the red
    /// band is resampled to the NIR dimensions; if that fails, NIR is
    /// resampled to the red dimensions instead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeReconcile`] only if both directions
    /// fail.
    pub fn reconcile(&self, bands: Bands) -> Result<Bands, PipelineError> {
        let Bands { nir, red } = bands;
        let (nir_dims, red_dims) = (nir.dimensions(), red.dimensions());
        if nir_dims == red_dims {
            return Ok(Bands { nir, red });
        }

        match self.resample(&red, nir_dims) {
            Ok(resized) => {
                tracing::info!(from = %red_dims, to = %nir_dims, "resized red band");
                Ok(Bands { nir, red: resized })
            }
            Err(forward) => {
                tracing::warn!(
                    error = %forward,
                    "failed to resize red to nir, trying reverse resize"
                );
                match self.resample(&nir, red_dims) {
                    Ok(resized) => {
                        tracing::info!(from = %nir_dims, to = %red_dims, "resized nir band");
                        Ok(Bands { nir: resized, red })
                    }
                    Err(reverse) => Err(PipelineError::ShapeReconcile {
                        nir: nir_dims,
                        red: red_dims,
                        reason: format!("red->nir: {forward}; nir->red: {reverse}"),
                    }),
                }
            }
        }
    }

    /// Resample `grid` to `target` with bilinear interpolation through
    /// 8-bit precision.
    ///
    /// # Errors
    ///
    /// Returns a [`ResampleError`] if either grid is empty, the target
    /// exceeds [`max_pixels`](Self::max_pixels), or an axis overflows `u32`.
    pub fn resample(&self, grid: &Grid, target: Dimensions) -> Result<Grid, ResampleError> {
        let source = grid.dimensions();
        if source == target {
            return Ok(grid.clone());
        }
        if source.is_empty() {
            return Err(ResampleError::EmptySource(source));
        }
        if target.is_empty() {
            return Err(ResampleError::EmptyTarget(target));
        }
        if target
            .height
            .checked_mul(target.width)
            .is_none_or(|cells| cells > self.max_pixels)
        {
            return Err(ResampleError::TooLarge {
                target,
                max_pixels: self.max_pixels,
            });
        }

        let (src_w, src_h) = axis_pair(source)?;
        let (dst_w, dst_h) = axis_pair(target)?;

        let bytes = grid.values().iter().map(|&v| quantize(v)).collect();
        let image =
            GrayImage::from_raw(src_w, src_h, bytes).ok_or(ResampleError::AxisOverflow(source))?;
        let resized = image::imageops::resize(&image, dst_w, dst_h, FilterType::Triangle);

        let values = resized
            .into_raw()
            .into_iter()
            .map(|b| f32::from(b) / 255.0)
            .collect();
        Grid::from_vec(target, values).map_err(|_| ResampleError::AxisOverflow(target))
    }
}

/// Clip to `[0, 1]` and truncate to an 8-bit level.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}

fn axis_pair(dimensions: Dimensions) -> Result<(u32, u32), ResampleError> {
    let overflow = || ResampleError::AxisOverflow(dimensions);
    let width = u32::try_from(dimensions.width).map_err(|_| overflow())?;
    let height = u32::try_from(dimensions.height).map_err(|_| overflow())?;
    Ok((width, height))
}
