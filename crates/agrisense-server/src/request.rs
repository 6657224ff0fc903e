//! Decoding a compute request from either JSON or multipart form data.

use agrisense_alert::InlineMetadata;
use agrisense_ndvi::{BandInput, GridInput, ReportRequest};
use axum::async_trait;
use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

/// Everything the compute handler needs from one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeInput {
    pub bands: BandInput,
    pub request: ReportRequest,
    pub inline: InlineMetadata,
}

/// JSON request body.
#[derive(Debug, Default, Deserialize)]
struct ComputeBody {
    #[serde(rename = "farmId")]
    farm_id: Option<Value>,
    #[serde(rename = "captureDate")]
    capture_date: Option<String>,
    nir: Option<GridInput>,
    red: Option<GridInput>,
    stress_threshold: Option<Value>,
    save_preview: Option<bool>,
    #[serde(rename = "farmName")]
    farm_name: Option<String>,
    owner: Option<Value>,
    #[serde(rename = "ndviReport")]
    ndvi_report: Option<ReportHint>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportHint {
    tiles_url: Option<String>,
}

#[async_trait]
impl<S> FromRequest<S> for ComputeInput
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            from_multipart(multipart).await
        } else {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            from_json(&body)
        }
    }
}

fn from_json(body: &[u8]) -> Result<ComputeInput, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(missing());
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {e}")))?;
    if value.as_object().is_some_and(serde_json::Map::is_empty) {
        return Ok(missing());
    }
    let body: ComputeBody = serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("unexpected JSON body: {e}")))?;

    let tiles_url = body.ndvi_report.and_then(|hint| hint.tiles_url);
    let request = ReportRequest {
        farm_id: body.farm_id.as_ref().map(farm_id_from_value).transpose()?.flatten(),
        capture_date: body.capture_date,
        stress_threshold: body
            .stress_threshold
            .as_ref()
            .map(threshold_from_value)
            .transpose()?
            .flatten(),
        tiles_url: tiles_url.clone(),
        save_preview: body.save_preview.unwrap_or(true),
    };
    Ok(ComputeInput {
        bands: BandInput::Grids {
            nir: body.nir,
            red: body.red,
        },
        request,
        inline: InlineMetadata {
            farm_name: body.farm_name,
            owner: body.owner,
            tiles_url,
        },
    })
}

async fn from_multipart(mut multipart: Multipart) -> Result<ComputeInput, ApiError> {
    let mut nir = None;
    let mut red = None;
    let mut image = None;
    let mut request = ReportRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "nir_file" => nir = Some(field_bytes(field).await?),
            "red_file" => red = Some(field_bytes(field).await?),
            "image" => image = Some(field_bytes(field).await?),
            "farmId" => request.farm_id = Some(field_text(field).await?),
            "captureDate" => request.capture_date = Some(field_text(field).await?),
            "stress_threshold" => {
                request.stress_threshold = threshold_from_text(&field_text(field).await?)?;
            }
            "save_preview" => request.save_preview = flag_from_text(&field_text(field).await?)?,
            _ => tracing::debug!(field = %name, "ignoring unknown form field"),
        }
    }

    let bands = match (nir, red, image) {
        (Some(nir), Some(red), _) => BandInput::Images { nir, red },
        (_, _, Some(image)) => BandInput::Combined(image),
        _ => BandInput::Missing,
    };
    Ok(ComputeInput {
        bands,
        request,
        inline: InlineMetadata::default(),
    })
}

fn missing() -> ComputeInput {
    ComputeInput {
        bands: BandInput::Missing,
        request: ReportRequest::default(),
        inline: InlineMetadata::default(),
    }
}

async fn field_bytes(field: Field<'_>) -> Result<Vec<u8>, ApiError> {
    field
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn field_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// A farm id given as a JSON string or number. Numbers keep their JSON
/// spelling (`42` becomes `"42"`).
fn farm_id_from_value(value: &Value) -> Result<Option<String>, ApiError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Number(number) => Ok(Some(number.to_string())),
        other => Err(ApiError::BadRequest(format!(
            "farmId must be a string or a number, got {other}"
        ))),
    }
}

/// A threshold given as a JSON number or numeric string. `null` means
/// "use the default".
fn threshold_from_value(value: &Value) -> Result<Option<f64>, ApiError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid_threshold(&number.to_string())),
        Value::String(text) => threshold_from_text(text),
        other => Err(invalid_threshold(&other.to_string())),
    }
}

fn threshold_from_text(text: &str) -> Result<Option<f64>, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse().map(Some).map_err(|_| invalid_threshold(text))
}

fn invalid_threshold(raw: &str) -> ApiError {
    ApiError::BadRequest(format!("stress_threshold must be a number, got {raw}"))
}

fn flag_from_text(text: &str) -> Result<bool, ApiError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "save_preview must be a boolean, got {other}"
        ))),
    }
}

/// Encode `(name, filename, data)` parts as a multipart body.
#[cfg(test)]
pub(crate) fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
