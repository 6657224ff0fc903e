//! Farm metadata: who owns a farm, what it is called, where its tiles live.
//!
//! Metadata comes from one of two places, in priority order:
//!
//! 1. Fields embedded in the compute request itself ([`InlineMetadata`]).
//! 2. A best-effort lookup in the farm registry ([`FarmRegistry`]).
//!
//! A registry failure of any kind (transport error, timeout, non-200
//! status) is logged and treated as "no metadata"; it never fails the
//! request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AlertError;
use crate::settings::RegistrySettings;

/// Owner keys that may carry a Telegram chat id, in priority order.
const CHAT_ID_KEYS: [&str; 3] = ["telegramChatId", "telegram_id", "chat_id"];

/// Farm owner details.
///
/// Arbitrary fields are preserved as received; the chat id is
/// canonicalized into a string `telegramChatId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(Map<String, Value>);

impl Owner {
    /// Canonicalize a raw owner object.
    ///
    /// The first truthy value among `telegramChatId`, `telegram_id` and
    /// `chat_id` is stored as string field `telegramChatId`. Returns `None`
    /// for an empty object.
    #[must_use]
    pub fn canonicalize(mut fields: Map<String, Value>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let chat_id = CHAT_ID_KEYS
            .iter()
            .filter_map(|key| fields.get(*key))
            .find(|value| is_truthy(value))
            .map(value_to_string);
        if let Some(chat_id) = chat_id {
            fields.insert("telegramChatId".into(), Value::String(chat_id));
        }
        Some(Self(fields))
    }

    /// Canonicalize an owner from an arbitrary JSON value.
    ///
    /// Anything but a non-empty object yields `None`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Self::canonicalize(fields),
            Value::Null => None,
            other => {
                tracing::warn!(owner = %other, "ignoring owner that is not an object");
                None
            }
        }
    }

    /// The canonical chat id, if one was found.
    #[must_use]
    pub fn telegram_chat_id(&self) -> Option<&str> {
        self.0.get("telegramChatId").and_then(Value::as_str)
    }

    /// All owner fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolved metadata for one farm.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FarmMetadata {
    pub farm_id: Option<String>,
    pub farm_name: Option<String>,
    pub owner: Option<Owner>,
    pub tiles_url: Option<String>,
}

/// Metadata fields embedded in a compute request.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct InlineMetadata {
    #[serde(rename = "farmName", default)]
    pub farm_name: Option<String>,
    #[serde(default)]
    pub owner: Option<Value>,
    /// From the request's `ndviReport.tiles_url`.
    #[serde(default)]
    pub tiles_url: Option<String>,
}

impl InlineMetadata {
    /// Whether the request carried any metadata worth using.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.farm_name.is_some()
            || self.owner.as_ref().is_some_and(|o| !o.is_null())
            || self.tiles_url.is_some()
    }
}

/// A farm record as returned by the registry.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RegistryRecord {
    #[serde(rename = "farmId", default)]
    pub farm_id: Option<Value>,
    #[serde(rename = "farmName", default)]
    pub farm_name: Option<String>,
    #[serde(default)]
    pub owner: Option<Value>,
    #[serde(default)]
    pub tiles_url: Option<String>,
}

impl RegistryRecord {
    fn is_empty(&self) -> bool {
        self.farm_id.is_none()
            && self.farm_name.is_none()
            && self.owner.is_none()
            && self.tiles_url.is_none()
    }
}

/// A source of farm records keyed by farm id.
#[async_trait]
pub trait FarmRegistry: Send + Sync {
    /// Fetch the record for `farm_id`.
    ///
    /// # Errors
    ///
    /// Returns an [`AlertError`] on transport failure or any status other
    /// than `200 OK`.
    async fn fetch(&self, farm_id: &str) -> Result<RegistryRecord, AlertError>;
}

/// [`FarmRegistry`] backed by an HTTP service: `GET {base}{path}/{farm_id}`.
#[derive(Debug, Clone)]
pub struct HttpFarmRegistry {
    client: reqwest::Client,
    farms_url: Url,
}

impl HttpFarmRegistry {
    /// Create a client for the registry at `base_url`.
    ///
    /// Trailing slashes on the base URL and the farms path are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidUrl`] if the joined URL does not parse
    /// and [`AlertError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, farms_path: &str, timeout: Duration) -> Result<Self, AlertError> {
        let joined = format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            farms_path.trim_end_matches('/')
        );
        let farms_url = Url::parse(&joined).map_err(|e| AlertError::InvalidUrl {
            url: joined.clone(),
            reason: e.to_string(),
        })?;
        if farms_url.cannot_be_a_base() {
            return Err(AlertError::InvalidUrl {
                url: joined,
                reason: "url cannot carry a path".into(),
            });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, farms_url })
    }

    /// Build a client from settings, or `None` when no registry is
    /// configured.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_settings(settings: &RegistrySettings) -> Result<Option<Self>, AlertError> {
        settings
            .base_url
            .as_deref()
            .map(|base| Self::new(base, &settings.farms_path, settings.timeout))
            .transpose()
    }

    /// The lookup URL for `farm_id`, with the id percent-encoded as a
    /// single path segment.
    #[must_use]
    pub fn farm_url(&self, farm_id: &str) -> Url {
        let mut url = self.farms_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(farm_id);
        }
        url
    }
}

#[async_trait]
impl FarmRegistry for HttpFarmRegistry {
    async fn fetch(&self, farm_id: &str) -> Result<RegistryRecord, AlertError> {
        let response = self.client.get(self.farm_url(farm_id)).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::RegistryStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Resolves [`FarmMetadata`] for a request.
#[derive(Clone)]
pub struct MetadataEnricher {
    registry: Option<Arc<dyn FarmRegistry>>,
    timeout: Duration,
}

impl std::fmt::Debug for MetadataEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataEnricher")
            .field("registry", &self.registry.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MetadataEnricher {
    /// Create an enricher. `timeout` bounds every registry lookup.
    #[must_use]
    pub fn new(registry: Option<Arc<dyn FarmRegistry>>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// An enricher that only ever uses inline metadata.
    #[must_use]
    pub fn inline_only() -> Self {
        Self::new(None, Duration::ZERO)
    }

    /// Build from settings, using [`HttpFarmRegistry`] when a base URL is
    /// configured.
    ///
    /// # Errors
    ///
    /// See [`HttpFarmRegistry::new`].
    pub fn from_settings(settings: &RegistrySettings) -> Result<Self, AlertError> {
        let registry = HttpFarmRegistry::from_settings(settings)?
            .map(|r| Arc::new(r) as Arc<dyn FarmRegistry>);
        Ok(Self::new(registry, settings.timeout))
    }

    /// Resolve metadata for `farm_id`.
    ///
    /// Inline metadata wins when present. Otherwise the registry is asked,
    /// if one is configured and a farm id is known. Returns `None` when
    /// neither source yields anything.
    pub async fn enrich(
        &self,
        farm_id: Option<&str>,
        inline: &InlineMetadata,
    ) -> Option<FarmMetadata> {
        if inline.is_present() {
            return Some(FarmMetadata {
                farm_id: farm_id.map(str::to_owned),
                farm_name: inline.farm_name.clone(),
                owner: inline.owner.clone().and_then(Owner::from_value),
                tiles_url: inline.tiles_url.clone(),
            });
        }

        let (registry, farm_id) = (self.registry.as_ref()?, farm_id?);
        let record = match tokio::time::timeout(self.timeout, registry.fetch(farm_id)).await {
            Ok(Ok(record)) => record,
            Ok(Err(error)) => {
                tracing::warn!(farm_id, %error, "farm registry lookup failed");
                return None;
            }
            Err(_) => {
                let error = AlertError::RegistryTimeout(self.timeout);
                tracing::warn!(farm_id, %error, "farm registry lookup failed");
                return None;
            }
        };
        if record.is_empty() {
            tracing::debug!(farm_id, "farm registry returned an empty record");
            return None;
        }

        Some(FarmMetadata {
            farm_id: Some(farm_id.to_owned()),
            farm_name: record.farm_name,
            owner: record.owner.and_then(Owner::from_value),
            tiles_url: record.tiles_url,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;

    use super::*;

    fn owner(value: Value) -> Owner {
        Owner::from_value(value).unwrap()
    }

    #[test]
    fn chat_id_is_taken_from_first_truthy_key() {
        let o = owner(json!({"telegram_id": 12345, "name": "Asha"}));
        assert_eq!(o.telegram_chat_id(), Some("12345"));
        assert_eq!(o.fields()["name"], "Asha");
        assert_eq!(o.fields()["telegram_id"], 12345);

        let o = owner(json!({"telegramChatId": "", "telegram_id": 0, "chat_id": "c-9"}));
        assert_eq!(o.telegram_chat_id(), Some("c-9"));

        let o = owner(json!({"telegramChatId": 777, "chat_id": "ignored"}));
        assert_eq!(o.telegram_chat_id(), Some("777"));
    }

    #[test]
    fn owner_without_chat_id_is_kept() {
        let o = owner(json!({"email": "a@example.com"}));
        assert_eq!(o.telegram_chat_id(), None);
        assert_eq!(o.fields().len(), 1);
    }

    #[test]
    fn empty_or_non_object_owner_is_dropped() {
        assert_eq!(Owner::from_value(json!({})), None);
        assert_eq!(Owner::from_value(Value::Null), None);
        assert_eq!(Owner::from_value(json!("someone")), None);
    }

    #[test]
    fn inline_presence() {
        assert!(!InlineMetadata::default().is_present());
        assert!(
            !InlineMetadata {
                owner: Some(Value::Null),
                ..InlineMetadata::default()
            }
            .is_present()
        );
        assert!(
            InlineMetadata {
                tiles_url: Some("https://tiles".into()),
                ..InlineMetadata::default()
            }
            .is_present()
        );
    }

    struct StaticRegistry {
        result: fn() -> Result<RegistryRecord, AlertError>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FarmRegistry for StaticRegistry {
        async fn fetch(&self, farm_id: &str) -> Result<RegistryRecord, AlertError> {
            self.calls.lock().unwrap().push(farm_id.to_owned());
            (self.result)()
        }
    }

    struct SlowRegistry;

    #[async_trait]
    impl FarmRegistry for SlowRegistry {
        async fn fetch(&self, _farm_id: &str) -> Result<RegistryRecord, AlertError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(RegistryRecord::default())
        }
    }

    fn record() -> Result<RegistryRecord, AlertError> {
        Ok(RegistryRecord {
            farm_id: Some(json!("f1")),
            farm_name: Some("North Field".into()),
            owner: Some(json!({"chat_id": 42})),
            tiles_url: Some("https://tiles/f1".into()),
        })
    }

    fn enricher(
        result: fn() -> Result<RegistryRecord, AlertError>,
    ) -> (MetadataEnricher, Arc<StaticRegistry>) {
        let registry = Arc::new(StaticRegistry {
            result,
            calls: Mutex::new(Vec::new()),
        });
        let enricher = MetadataEnricher::new(Some(registry.clone()), Duration::from_secs(5));
        (enricher, registry)
    }

    #[tokio::test]
    async fn inline_metadata_skips_registry() {
        let (enricher, registry) = enricher(record);
        let inline = InlineMetadata {
            farm_name: Some("Inline Farm".into()),
            owner: Some(json!({"telegramChatId": 9})),
            tiles_url: None,
        };
        let meta = enricher.enrich(Some("f1"), &inline).await.unwrap();
        assert_eq!(meta.farm_name.as_deref(), Some("Inline Farm"));
        assert_eq!(meta.owner.unwrap().telegram_chat_id(), Some("9"));
        assert_eq!(meta.farm_id.as_deref(), Some("f1"));
        assert!(registry.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_is_used_when_inline_is_absent() {
        let (enricher, registry) = enricher(record);
        let meta = enricher
            .enrich(Some("f1"), &InlineMetadata::default())
            .await
            .unwrap();
        assert_eq!(meta.farm_name.as_deref(), Some("North Field"));
        assert_eq!(meta.owner.unwrap().telegram_chat_id(), Some("42"));
        assert_eq!(meta.tiles_url.as_deref(), Some("https://tiles/f1"));
        assert_eq!(*registry.calls.lock().unwrap(), vec!["f1".to_owned()]);
    }

    #[tokio::test]
    async fn no_farm_id_means_no_lookup() {
        let (enricher, registry) = enricher(record);
        assert!(enricher.enrich(None, &InlineMetadata::default()).await.is_none());
        assert!(registry.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_errors_yield_no_metadata() {
        let (enricher, _) = enricher(|| {
            Err(AlertError::RegistryStatus {
                status: 404,
                body: "not found".into(),
            })
        });
        assert!(
            enricher
                .enrich(Some("f1"), &InlineMetadata::default())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn empty_record_yields_no_metadata() {
        let (enricher, _) = enricher(|| Ok(RegistryRecord::default()));
        assert!(
            enricher
                .enrich(Some("f1"), &InlineMetadata::default())
                .await
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_registry_times_out() {
        let enricher = MetadataEnricher::new(Some(Arc::new(SlowRegistry)), Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        assert!(
            enricher
                .enrich(Some("f1"), &InlineMetadata::default())
                .await
                .is_none()
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn inline_only_enricher_never_looks_up() {
        let enricher = MetadataEnricher::inline_only();
        assert!(
            enricher
                .enrich(Some("f1"), &InlineMetadata::default())
                .await
                .is_none()
        );
    }

    #[test]
    fn farm_url_joins_and_encodes() {
        let registry =
            HttpFarmRegistry::new("http://backend:4000/", "/api/farms/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            registry.farm_url("f1").as_str(),
            "http://backend:4000/api/farms/f1"
        );
        assert_eq!(
            registry.farm_url("a/b c").as_str(),
            "http://backend:4000/api/farms/a%2Fb%20c"
        );
    }

    #[test]
    fn unset_base_url_means_no_registry() {
        let settings = RegistrySettings::default();
        assert!(HttpFarmRegistry::from_settings(&settings).unwrap().is_none());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = HttpFarmRegistry::new("not a url", "/api/farms", Duration::from_secs(1));
        assert!(matches!(result, Err(AlertError::InvalidUrl { .. })));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn http_registry_round_trip() {
        let app = Router::new().route(
            "/api/farms/:id",
            get(|Path(id): Path<String>| async move {
                if id == "f1" {
                    (
                        StatusCode::OK,
                        axum::Json(json!({
                            "farmId": "f1",
                            "farmName": "North Field",
                            "owner": {"telegram_id": 555},
                        })),
                    )
                } else {
                    (StatusCode::NOT_FOUND, axum::Json(json!({"error": "no such farm"})))
                }
            }),
        );
        let base = serve(app).await;
        let settings = RegistrySettings {
            base_url: Some(base),
            ..RegistrySettings::default()
        };
        let enricher = MetadataEnricher::from_settings(&settings).unwrap();

        let meta = enricher
            .enrich(Some("f1"), &InlineMetadata::default())
            .await
            .unwrap();
        assert_eq!(meta.farm_name.as_deref(), Some("North Field"));
        assert_eq!(meta.owner.unwrap().telegram_chat_id(), Some("555"));
        assert_eq!(meta.tiles_url, None);

        assert!(
            enricher
                .enrich(Some("missing"), &InlineMetadata::default())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn http_registry_reports_status() {
        let app = Router::new().route(
            "/api/farms/:id",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(app).await;
        let registry = HttpFarmRegistry::new(&base, "/api/farms", Duration::from_secs(5)).unwrap();
        let err = registry.fetch("f1").await.unwrap_err();
        assert!(matches!(
            err,
            AlertError::RegistryStatus { status: 503, ref body } if body == "down"
        ));
    }
}
