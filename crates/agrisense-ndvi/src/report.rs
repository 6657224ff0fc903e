//! Report composition and deterministic report identity.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::stats::{DEFAULT_STRESS_THRESHOLD, Histogram, Statistics};

/// Farm id used in the report key when the request carries none.
pub const UNKNOWN_FARM: &str = "unknown";

/// Per-request parameters that shape the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub farm_id: Option<String>,
    /// Capture timestamp; the current UTC time is used when absent.
    pub capture_date: Option<String>,
    /// Defaults to [`DEFAULT_STRESS_THRESHOLD`].
    pub stress_threshold: Option<f64>,
    pub tiles_url: Option<String>,
    /// Whether to render a preview image.
    pub save_preview: bool,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            farm_id: None,
            capture_date: None,
            stress_threshold: None,
            tiles_url: None,
            save_preview: true,
        }
    }
}

impl ReportRequest {
    /// The farm id, treating an empty string as absent.
    #[must_use]
    pub fn farm_id(&self) -> Option<&str> {
        self.farm_id.as_deref().filter(|id| !id.is_empty())
    }

    /// The effective stress threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.stress_threshold.unwrap_or(DEFAULT_STRESS_THRESHOLD)
    }

    /// The supplied capture date, or the current UTC time.
    #[must_use]
    pub fn capture_date_or_now(&self) -> String {
        self.capture_date
            .clone()
            .filter(|date| !date.is_empty())
            .unwrap_or_else(utc_timestamp_now)
    }
}

/// The summary returned to the caller and embedded in alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "reportId")]
    pub report_id: String,
    #[serde(rename = "captureDate")]
    pub capture_date: String,
    pub mean_ndvi: f64,
    pub median_ndvi: f64,
    /// Stress fraction in `[0, 1]`.
    pub pct_stress: f64,
    pub stress_threshold: f64,
    pub histogram: Histogram,
    pub tiles_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_png_base64: Option<String>,
}

impl Report {
    /// Stress as a whole percentage, as used in the id and advisory text.
    #[must_use]
    pub fn stress_percent(&self) -> i64 {
        stress_percent(self.pct_stress)
    }
}

/// Round a stress fraction to a whole percentage, ties to even.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn stress_percent(fraction: f64) -> i64 {
    (fraction * 100.0).round_ties_even() as i64
}

/// The idempotency key for a report: lowercase hex SHA-256 of
/// `"{farm_id}|{capture_date}|{percent}"`.
#[must_use]
pub fn deterministic_report_id(farm_id: Option<&str>, capture_date: &str, fraction: f64) -> String {
    let key = format!(
        "{}|{capture_date}|{}",
        farm_id.unwrap_or(UNKNOWN_FARM),
        stress_percent(fraction)
    );
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Current UTC time as ISO 8601 with microseconds and a `Z` suffix.
#[must_use]
pub fn utc_timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Assemble a [`Report`] from computed statistics.
///
/// `capture_date` is passed in already resolved so the id and the
/// reported timestamp agree.
#[must_use]
pub fn compose(
    statistics: &Statistics,
    request: &ReportRequest,
    capture_date: String,
    preview_png_base64: Option<String>,
) -> Report {
    let report_id =
        deterministic_report_id(request.farm_id(), &capture_date, statistics.stress_fraction);
    Report {
        report_id,
        capture_date,
        mean_ndvi: statistics.mean,
        median_ndvi: statistics.median,
        pct_stress: statistics.stress_fraction,
        stress_threshold: request.threshold(),
        histogram: statistics.histogram.clone(),
        tiles_url: request.tiles_url.clone(),
        preview_png_base64,
    }
}
