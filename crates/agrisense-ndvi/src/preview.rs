//! Color preview of an index grid.
//!
//! Index values are remapped linearly from `[vmin, vmax]` to `t` in
//! `[0, 1]` and blended from a dry tan (`t = 0`) to a vegetation green
//! (`t = 1`). The result is resized to a fixed thumbnail and PNG-encoded.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};

use crate::types::{IndexGrid, PipelineError};

/// Color at `t = 0`.
const LOW: [f32; 3] = [220.0, 180.0, 150.0];

/// Color at `t = 1`.
const HIGH: [f32; 3] = [80.0, 200.0, 50.0];

/// Preview rendering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewOptions {
    /// Index value mapped to the low color.
    pub vmin: f32,
    /// Index value mapped to the high color.
    pub vmax: f32,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            vmin: -1.0,
            vmax: 1.0,
            width: 256,
            height: 256,
        }
    }
}

impl PreviewOptions {
    fn validate(&self) -> Result<(), PipelineError> {
        if !(self.vmin.is_finite() && self.vmax.is_finite()) || self.vmin >= self.vmax {
            return Err(PipelineError::PreviewEncode(format!(
                "invalid value range [{}, {}]",
                self.vmin, self.vmax
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::PreviewEncode(format!(
                "invalid preview size {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Map one index value to its preview color.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::suboptimal_flops
)]
pub fn colorize(value: f32, vmin: f32, vmax: f32) -> [u8; 3] {
    let t = ((value - vmin) / (vmax - vmin)).clamp(0.0, 1.0);
    let t = if t.is_nan() { 0.0 } else { t };
    let mut rgb = [0_u8; 3];
    for (out, (lo, hi)) in rgb.iter_mut().zip(LOW.iter().zip(HIGH)) {
        *out = ((1.0 - t) * lo + t * hi) as u8;
    }
    rgb
}

/// Render the index at its native resolution, then resize to the
/// configured thumbnail size.
///
/// # Errors
///
/// Returns [`PipelineError::PreviewEncode`] if the options are invalid or
/// the grid cannot be represented as an image.
pub fn render_rgb(index: &IndexGrid, options: &PreviewOptions) -> Result<RgbImage, PipelineError> {
    options.validate()?;
    let dims = index.dimensions();
    if dims.is_empty() {
        return Err(PipelineError::PreviewEncode("index grid is empty".into()));
    }
    let too_large = || PipelineError::PreviewEncode(format!("index grid {dims} is too large"));
    let width = u32::try_from(dims.width).map_err(|_| too_large())?;
    let height = u32::try_from(dims.height).map_err(|_| too_large())?;

    let raw = index
        .values()
        .iter()
        .flat_map(|&v| colorize(v, options.vmin, options.vmax))
        .collect();
    let native = RgbImage::from_raw(width, height, raw).ok_or_else(too_large)?;
    if native.dimensions() == (options.width, options.height) {
        return Ok(native);
    }
    Ok(image::imageops::resize(
        &native,
        options.width,
        options.height,
        FilterType::Triangle,
    ))
}

/// Render and PNG-encode the preview.
///
/// # Errors
///
/// Returns [`PipelineError::PreviewEncode`] on invalid options or encoder
/// failure.
pub fn render_png(index: &IndexGrid, options: &PreviewOptions) -> Result<Vec<u8>, PipelineError> {
    let rgb = render_rgb(index, options)?;
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| PipelineError::PreviewEncode(e.to_string()))?;
    Ok(buf)
}

/// Render the preview as a standard-alphabet base64 PNG string.
///
/// # Errors
///
/// Same as [`render_png`].
pub fn render_base64(index: &IndexGrid, options: &PreviewOptions) -> Result<String, PipelineError> {
    render_png(index, options).map(|png| STANDARD.encode(png))
}
