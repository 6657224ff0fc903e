//! agrisense-ndvi: Pure NDVI pipeline (sans-IO).
//!
//! Turns a pair of red / near-infrared bands into a vegetation index and
//! a stress report through:
//! normalize -> reconcile shapes -> index -> statistics -> preview -> report.
//!
//! This crate has **no network or filesystem I/O**. It operates on
//! in-memory grids and byte slices and returns structured data. Farm
//! metadata lookup and alert delivery live in `agrisense-alert`.

pub mod grayscale;
pub mod ndvi;
pub mod normalize;
pub mod preview;
pub mod report;
pub mod resample;
pub mod stats;
pub mod types;

pub use ndvi::{IndexEngine, IndexEngineKind};
pub use normalize::{BandInput, Bands, GridInput, NormalizationPolicy};
pub use preview::PreviewOptions;
pub use report::{Report, ReportRequest};
pub use resample::Reconciler;
pub use stats::{Histogram, Statistics};
pub use types::{
    Dimensions, Grid, IndexGrid, IntensityGrid, NdviOutcome, PipelineConfig, PipelineError,
};

/// Run the full NDVI pipeline for one request.
///
/// # Pipeline steps
///
/// 1. Normalize the raw input into two `[0, 1]` bands
/// 2. Reconcile band shapes (bilinear resample with reverse fallback)
/// 3. Compute the index (pluggable engine)
/// 4. Derive statistics at the request's stress threshold
/// 5. Optionally render the color preview
/// 6. Compose the report with its deterministic id
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] or [`PipelineError::ImageDecode`]
/// for unusable input, [`PipelineError::ShapeReconcile`] if the bands
/// cannot be brought to one shape, [`PipelineError::EmptyGrid`] if the
/// bands have no cells, and [`PipelineError::PreviewEncode`] if the
/// preview cannot be rendered.
pub fn process(
    input: BandInput,
    request: &ReportRequest,
    config: &PipelineConfig,
) -> Result<NdviOutcome, PipelineError> {
    // 1. Normalize.
    let bands = normalize::normalize(input, config.normalization)?;

    // 2. Reconcile shapes.
    let bands = config.reconciler.reconcile(bands)?;

    // 3. Index.
    let index = config.engine.compute(&bands)?;
    tracing::debug!(dimensions = %index.dimensions(), engine = %config.engine, "computed index");

    // 4. Statistics.
    let statistics = stats::Statistics::from_index(&index, request.threshold())?;

    // 5. Preview.
    let preview = if request.save_preview {
        Some(preview::render_base64(&index, &config.preview)?)
    } else {
        None
    };

    // 6. Report.
    let capture_date = request.capture_date_or_now();
    let report = report::compose(&statistics, request, capture_date, preview);
    tracing::info!(
        report_id = %report.report_id,
        mean_ndvi = report.mean_ndvi,
        pct_stress = report.pct_stress,
        "ndvi report ready"
    );

    Ok(NdviOutcome {
        index,
        statistics,
        report,
    })
}
