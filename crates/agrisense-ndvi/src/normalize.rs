//! Input normalization: turn whatever the caller sent into two
//! single-channel [`IntensityGrid`]s in `[0, 1]`.
//!
//! Three input shapes are accepted (see [`BandInput`]):
//!
//! 1. Two numeric grids (JSON). These are rescaled according to a
//!    [`NormalizationPolicy`].
//! 2. Two uploaded images, each reduced to luminance.
//! 3. One combined image whose red channel is reused for both bands.
//!    This is a synthetic mode: the resulting index is always zero where
//!    the channel is non-zero, but it lets a plain photo exercise the
//!    whole pipeline.

use serde::{Deserialize, Serialize};

use crate::grayscale;
use crate::types::{Dimensions, IntensityGrid, PipelineError};

/// How numeric grids are mapped into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum NormalizationPolicy {
    /// Divide both grids by the largest value observed across them, but
    /// only when that value exceeds `1.0`. Grids that already look like
    /// reflectances are left alone; 8-bit or 16-bit counts are brought
    /// into range.
    #[default]
    ScaleByObservedMax,
    /// Use the values exactly as given.
    Passthrough,
    /// Always divide by a fixed scale (e.g. `255.0` or `10000.0`).
    FixedScale(f32),
}

impl NormalizationPolicy {
    /// The divisor this policy applies given the largest observed value
    /// (NaN ignored) across both grids. `None` means no rescaling.
    #[must_use]
    pub fn divisor(self, observed_max: Option<f32>) -> Option<f32> {
        match self {
            Self::ScaleByObservedMax => observed_max.filter(|&max| max > 1.0),
            Self::Passthrough => None,
            Self::FixedScale(scale) => Some(scale),
        }
    }
}

/// A numeric band as decoded from JSON.
///
/// Either a 2D `[row][col]` plane or a 3D `[row][col][channel]` array.
/// Three-or-more channel arrays are reduced to luminance using the first
/// three channels; single-channel arrays are flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridInput {
    Plane(Vec<Vec<f32>>),
    Channels(Vec<Vec<Vec<f32>>>),
}

impl GridInput {
    /// Largest non-NaN value in the input, across all channels.
    #[must_use]
    pub fn observed_max(&self) -> Option<f32> {
        let values: Box<dyn Iterator<Item = f32> + '_> = match self {
            Self::Plane(rows) => Box::new(rows.iter().flatten().copied()),
            Self::Channels(rows) => Box::new(rows.iter().flatten().flatten().copied()),
        };
        values.filter(|v| !v.is_nan()).reduce(f32::max)
    }

    /// Reject infinities and NaN. JSON numbers beyond the `f32` range
    /// deserialize to infinity.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] naming `band` and the
    /// offending row.
    pub fn ensure_finite(&self, band: &str) -> Result<(), PipelineError> {
        let bad_row = match self {
            Self::Plane(rows) => rows.iter().position(|row| row.iter().any(|v| !v.is_finite())),
            Self::Channels(rows) => rows
                .iter()
                .position(|row| row.iter().flatten().any(|v| !v.is_finite())),
        };
        bad_row.map_or(Ok(()), |row| Err(non_finite(band, row)))
    }

    /// Convert into a single-channel grid, dividing every raw value by
    /// `divisor` first when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] for ragged rows, pixels with
    /// inconsistent channel counts, or two-channel pixels.
    pub fn into_grid(self, divisor: Option<f32>) -> Result<IntensityGrid, PipelineError> {
        let scale = |v: f32| divisor.map_or(v, |d| v / d);
        match self {
            Self::Plane(rows) => {
                let rows = rows
                    .into_iter()
                    .map(|row| row.into_iter().map(scale).collect())
                    .collect();
                IntensityGrid::from_rows(rows)
            }
            Self::Channels(rows) => {
                let height = rows.len();
                let width = rows.first().map_or(0, Vec::len);
                let mut values = Vec::with_capacity(height * width);
                for (r, row) in rows.into_iter().enumerate() {
                    if row.len() != width {
                        return Err(PipelineError::InvalidInput(format!(
                            "row {r} has {} pixels, expected {width}",
                            row.len()
                        )));
                    }
                    for pixel in row {
                        values.push(reduce_pixel(&pixel, r)?);
                    }
                }
                let grid = IntensityGrid::from_vec(Dimensions::new(height, width), values)?;
                Ok(grid.map(scale))
            }
        }
    }
}

fn non_finite(band: &str, row: usize) -> PipelineError {
    PipelineError::InvalidInput(format!(
        "'{band}' row {row} contains a value that is not a finite number"
    ))
}

fn ensure_finite_grid(grid: &IntensityGrid, band: &str) -> Result<(), PipelineError> {
    let width = grid.width().max(1);
    grid.values()
        .iter()
        .position(|v| !v.is_finite())
        .map_or(Ok(()), |cell| Err(non_finite(band, cell / width)))
}

fn reduce_pixel(pixel: &[f32], row: usize) -> Result<f32, PipelineError> {
    match *pixel {
        [v] => Ok(v),
        [r, g, b, ..] => Ok(grayscale::luminance(r, g, b)),
        _ => Err(PipelineError::InvalidInput(format!(
            "pixel in row {row} has {} channels; expected 1 or at least 3",
            pixel.len()
        ))),
    }
}

/// The raw band sources for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum BandInput {
    /// Numeric grids. Both must be present.
    Grids {
        nir: Option<GridInput>,
        red: Option<GridInput>,
    },
    /// One encoded image per band.
    Images { nir: Vec<u8>, red: Vec<u8> },
    /// A single ordinary image reused for both bands.
    Combined(Vec<u8>),
    /// Nothing usable was supplied.
    Missing,
}

/// The two normalized bands, ready for shape reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub nir: IntensityGrid,
    pub red: IntensityGrid,
}

/// Normalize a [`BandInput`] into two single-channel grids.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if nothing was supplied, if one
/// of the numeric grids is missing, or if a grid is malformed or holds a
/// non-finite value (before or after rescaling).
/// Returns [`PipelineError::ImageDecode`] if an image cannot be decoded.
pub fn normalize(input: BandInput, policy: NormalizationPolicy) -> Result<Bands, PipelineError> {
    match input {
        BandInput::Grids {
            nir: Some(nir),
            red: Some(red),
        } => {
            nir.ensure_finite("nir")?;
            red.ensure_finite("red")?;
            let observed_max = match (nir.observed_max(), red.observed_max()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            let divisor = policy.divisor(observed_max);
            if let Some(divisor) = divisor {
                tracing::debug!(divisor, "rescaling numeric bands");
            }
            let bands = Bands {
                nir: nir.into_grid(divisor)?,
                red: red.into_grid(divisor)?,
            };
            ensure_finite_grid(&bands.nir, "nir")?;
            ensure_finite_grid(&bands.red, "red")?;
            Ok(bands)
        }
        BandInput::Grids { .. } => Err(PipelineError::InvalidInput(
            "JSON payload must include 'nir' and 'red' arrays".into(),
        )),
        BandInput::Images { nir, red } => Ok(Bands {
            nir: grayscale::luminance_grid(&grayscale::decode(&nir)?)?,
            red: grayscale::luminance_grid(&grayscale::decode(&red)?)?,
        }),
        BandInput::Combined(bytes) => {
            tracing::warn!("single image supplied, reusing its red channel for both bands");
            let image = grayscale::decode(&bytes)?;
            let band = grayscale::red_channel_grid(&image)?;
            Ok(Bands {
                nir: band.clone(),
                red: band,
            })
        }
        BandInput::Missing => Err(PipelineError::InvalidInput(
            "provide 'nir' and 'red' arrays, 'nir_file' and 'red_file' images, or a single 'image'"
                .into(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn plane(rows: &[&[f32]]) -> GridInput {
        GridInput::Plane(rows.iter().map(|r| r.to_vec()).collect())
    }

    fn png_rgb(r: u8, g: u8, b: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([r, g, b]));
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn default_policy_scales_by_observed_max() {
        assert_eq!(
            NormalizationPolicy::default(),
            NormalizationPolicy::ScaleByObservedMax
        );
    }

    #[test]
    fn unit_range_grids_pass_through_unchanged() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[0.25, 1.0]])),
            red: Some(plane(&[&[0.5, 0.0]])),
        };
        let bands = normalize(input, NormalizationPolicy::default()).unwrap();
        assert_eq!(bands.nir.values(), &[0.25, 1.0]);
        assert_eq!(bands.red.values(), &[0.5, 0.0]);
    }

    #[test]
    fn byte_range_grids_are_divided_by_shared_max() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[200.0, 50.0]])),
            red: Some(plane(&[&[100.0, 0.0]])),
        };
        let bands = normalize(input, NormalizationPolicy::default()).unwrap();
        assert_eq!(bands.nir.values(), &[1.0, 0.25]);
        assert_eq!(bands.red.values(), &[0.5, 0.0]);
    }

    #[test]
    fn passthrough_never_rescales() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[200.0]])),
            red: Some(plane(&[&[100.0]])),
        };
        let bands = normalize(input, NormalizationPolicy::Passthrough).unwrap();
        assert_eq!(bands.nir.values(), &[200.0]);
        assert_eq!(bands.red.values(), &[100.0]);
    }

    #[test]
    fn fixed_scale_always_divides() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[0.5]])),
            red: Some(plane(&[&[0.25]])),
        };
        let bands = normalize(input, NormalizationPolicy::FixedScale(0.5)).unwrap();
        assert_eq!(bands.nir.values(), &[1.0]);
        assert_eq!(bands.red.values(), &[0.5]);
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        let nir: GridInput = serde_json::from_str("[[1e39, 0.5], [0.5, 0.5]]").unwrap();
        assert_eq!(nir.observed_max(), Some(f32::INFINITY));
        let input = BandInput::Grids {
            nir: Some(nir),
            red: Some(plane(&[&[0.5, 0.5], &[0.5, 0.5]])),
        };
        let err = normalize(input, NormalizationPolicy::default()).unwrap_err();
        assert!(matches!(&err, PipelineError::InvalidInput(msg) if msg.contains("'nir' row 0")));
    }

    #[test]
    fn non_finite_channels_are_rejected() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[0.5]])),
            red: Some(GridInput::Channels(vec![
                vec![vec![0.1, 0.2, 0.3]],
                vec![vec![0.1, f32::NEG_INFINITY, 0.3]],
            ])),
        };
        let err = normalize(input, NormalizationPolicy::Passthrough).unwrap_err();
        assert!(matches!(&err, PipelineError::InvalidInput(msg) if msg.contains("'red' row 1")));
    }

    #[test]
    fn zero_fixed_scale_is_rejected() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[0.5]])),
            red: Some(plane(&[&[0.25]])),
        };
        assert!(matches!(
            normalize(input, NormalizationPolicy::FixedScale(0.0)),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn observed_max_ignores_nan() {
        let input = plane(&[&[f32::NAN, 3.0, 2.0]]);
        assert_eq!(input.observed_max(), Some(3.0));
        assert_eq!(plane(&[]).observed_max(), None);
    }

    #[test]
    fn channel_arrays_are_reduced_to_luminance() {
        let input = GridInput::Channels(vec![vec![vec![1.0, 0.0, 0.0], vec![0.5]]]);
        let grid = input.into_grid(None).unwrap();
        assert!((grid.values()[0] - 0.2989).abs() < 1e-6);
        assert!((grid.values()[1] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn two_channel_pixels_are_rejected() {
        let input = GridInput::Channels(vec![vec![vec![1.0, 0.0]]]);
        assert!(matches!(
            input.into_grid(None),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn json_planes_and_channels_deserialize() {
        let plane: GridInput = serde_json::from_str("[[1, 2], [3, 4]]").unwrap();
        assert!(matches!(plane, GridInput::Plane(_)));
        let channels: GridInput = serde_json::from_str("[[[1, 2, 3]]]").unwrap();
        assert!(matches!(channels, GridInput::Channels(_)));
    }

    #[test]
    fn missing_band_is_invalid_input() {
        let input = BandInput::Grids {
            nir: Some(plane(&[&[0.5]])),
            red: None,
        };
        assert!(matches!(
            normalize(input, NormalizationPolicy::default()),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn missing_everything_is_invalid_input() {
        assert!(matches!(
            normalize(BandInput::Missing, NormalizationPolicy::default()),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn image_pair_is_decoded() {
        let input = BandInput::Images {
            nir: png_rgb(255, 255, 255),
            red: png_rgb(0, 0, 0),
        };
        let bands = normalize(input, NormalizationPolicy::default()).unwrap();
        assert_eq!(bands.nir.dimensions(), Dimensions::new(2, 2));
        assert!(bands.nir.values().iter().all(|&v| (v - 1.0).abs() < 1e-4));
        assert!(bands.red.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn combined_image_reuses_red_channel() {
        let bands = normalize(
            BandInput::Combined(png_rgb(51, 200, 10)),
            NormalizationPolicy::default(),
        )
        .unwrap();
        assert_eq!(bands.nir, bands.red);
        assert!((bands.nir.values()[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn corrupt_image_is_decode_error() {
        let input = BandInput::Images {
            nir: vec![1, 2, 3],
            red: png_rgb(0, 0, 0),
        };
        assert!(matches!(
            normalize(input, NormalizationPolicy::default()),
            Err(PipelineError::ImageDecode(_))
        ));
    }
}
