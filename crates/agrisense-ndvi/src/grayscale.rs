//! Image decoding and single-band extraction.
//!
//! Uploaded band images arrive as raw bytes (PNG, JPEG, BMP, WebP, TIFF).
//! Color images are collapsed to luminance; single-channel images are
//! taken as-is. Either way the result is an [`IntensityGrid`] in `[0, 1]`.

use image::DynamicImage;

use crate::types::{Dimensions, IntensityGrid, PipelineError};

/// Luminance weights applied to the R, G and B channels.
pub const LUMINANCE_WEIGHTS: [f32; 3] = [0.2989, 0.5870, 0.1140];

/// Weighted luminance of a single RGB triple already scaled to `[0, 1]`.
#[must_use]
pub fn luminance(r: f32, g: f32, b: f32) -> f32 {
    let [wr, wg, wb] = LUMINANCE_WEIGHTS;
    wr * r + wg * g + wb * b
}

/// Decode raw image bytes.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidInput("image data is empty".into()));
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Reduce a decoded image to a single luminance band in `[0, 1]`.
///
/// Alpha is dropped without compositing.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the decoded pixel buffer
/// does not match the reported image size.
pub fn luminance_grid(image: &DynamicImage) -> Result<IntensityGrid, PipelineError> {
    let dimensions = image_dimensions(image);
    let values = if image.color().has_color() {
        image
            .to_rgb8()
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                luminance(unit(r), unit(g), unit(b))
            })
            .collect()
    } else {
        image.to_luma8().pixels().map(|p| unit(p.0[0])).collect()
    };
    IntensityGrid::from_vec(dimensions, values)
}

/// Extract the first (red) channel of an image as a band in `[0, 1]`.
///
/// Used when a single ordinary photo stands in for both bands.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the decoded pixel buffer
/// does not match the reported image size.
pub fn red_channel_grid(image: &DynamicImage) -> Result<IntensityGrid, PipelineError> {
    let dimensions = image_dimensions(image);
    let values = image.to_rgb8().pixels().map(|p| unit(p.0[0])).collect();
    IntensityGrid::from_vec(dimensions, values)
}

fn unit(channel: u8) -> f32 {
    f32::from(channel) / 255.0
}

fn image_dimensions(image: &DynamicImage) -> Dimensions {
    Dimensions::new(image.height() as usize, image.width() as usize)
}
