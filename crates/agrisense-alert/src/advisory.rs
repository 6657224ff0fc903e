//! The alert payload and its human-readable advisory.

use agrisense_ndvi::Report;
use serde::{Deserialize, Serialize};

use crate::metadata::{FarmMetadata, Owner};

/// Display name used when no farm name is known.
pub const UNKNOWN_FARM_NAME: &str = "Unknown Farm";

/// Everything posted to the alert endpoint for one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    #[serde(rename = "farmId")]
    pub farm_id: Option<String>,
    #[serde(rename = "farmName")]
    pub farm_name: Option<String>,
    pub owner: Option<Owner>,
    #[serde(rename = "ndviReport")]
    pub ndvi_report: Report,
    pub advisory_en: String,
    pub pct_stress_numeric: f64,
    pub stress_threshold_numeric: f64,
    #[serde(rename = "sendAlert")]
    pub send_alert: bool,
}

impl AlertPayload {
    /// Build the payload for `report`.
    ///
    /// The report's own tiles URL wins over the one in `metadata`. The
    /// preview image is not forwarded.
    #[must_use]
    pub fn compose(
        report: &Report,
        farm_id: Option<&str>,
        metadata: Option<&FarmMetadata>,
    ) -> Self {
        let farm_name = metadata.and_then(|m| m.farm_name.clone());
        let owner = metadata.and_then(|m| m.owner.clone());
        let tiles_url = report
            .tiles_url
            .clone()
            .or_else(|| metadata.and_then(|m| m.tiles_url.clone()));

        let ndvi_report = Report {
            tiles_url,
            preview_png_base64: None,
            ..report.clone()
        };
        let advisory_en = advisory_text(farm_name.as_deref(), &ndvi_report);

        Self {
            farm_id: farm_id.map(str::to_owned),
            farm_name,
            owner,
            advisory_en,
            pct_stress_numeric: ndvi_report.pct_stress,
            stress_threshold_numeric: ndvi_report.stress_threshold,
            ndvi_report,
            send_alert: true,
        }
    }
}

/// The advisory message for `report`.
#[must_use]
pub fn advisory_text(farm_name: Option<&str>, report: &Report) -> String {
    format!(
        "⚠️ AgriSense Alert - {}\n\
         Stress detected in {}% of the field (mean NDVI {:.2}).\n\
         Capture: {}\n\
         Recommended: Inspect for pests/disease; check irrigation/fertilizer scheduling.\n\
         NDVI tiles: {}",
        farm_name.unwrap_or(UNKNOWN_FARM_NAME),
        report.stress_percent(),
        report.mean_ndvi,
        report.capture_date,
        report.tiles_url.as_deref().unwrap_or("N/A"),
    )
}
