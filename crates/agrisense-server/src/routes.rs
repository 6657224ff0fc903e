//! HTTP routes.

use agrisense_alert::AlertPayload;
use agrisense_ndvi::Report;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::request::ComputeInput;
use crate::state::SharedState;

/// Largest accepted request body (32 MiB).
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Successful compute response.
#[derive(Debug, Serialize)]
pub struct ComputeResponse {
    pub success: bool,
    #[serde(rename = "ndviReport")]
    pub ndvi_report: Report,
}

/// Build the service router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ndvi/compute", post(compute))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /v1/ndvi/compute`
///
/// Runs the pipeline, answers with the report, and hands the enriched
/// alert to the dispatcher without waiting for delivery.
async fn compute(
    State(state): State<SharedState>,
    input: ComputeInput,
) -> Result<Json<ComputeResponse>, ApiError> {
    let ComputeInput {
        bands,
        request,
        inline,
    } = input;

    let report = agrisense_ndvi::process(bands, &request, &state.pipeline)?.report;

    let farm_id = request.farm_id();
    let metadata = state.enricher.enrich(farm_id, &inline).await;
    let payload = AlertPayload::compose(&report, farm_id, metadata.as_ref());
    drop(state.dispatcher.schedule(payload));

    Ok(Json(ComputeResponse {
        success: true,
        ndvi_report: report,
    }))
}
