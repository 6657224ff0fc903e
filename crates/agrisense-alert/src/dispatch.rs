//! Resilient alert delivery.
//!
//! A payload moves through
//! `PENDING -> (ATTEMPTING -> {SUCCESS | RETRYABLE_FAILURE})* -> {DELIVERED | EXHAUSTED}`,
//! or straight to `SKIPPED` when no endpoint is configured. Between
//! attempts the dispatcher waits `base * 2^(attempt - 1)`; it never waits
//! after the final attempt.
//!
//! Delivery runs detached from the request that produced the payload
//! (see [`Dispatcher::schedule`]). Failures are logged, never returned to
//! the original caller. Scheduled deliveries are tracked so a shutting-down
//! server can wait for them with [`Dispatcher::drain`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::advisory::AlertPayload;
use crate::error::{AlertError, TransportError};
use crate::settings::AlertSettings;

/// Header carrying the optional shared secret.
pub const SERVICE_TOKEN_HEADER: &str = "X-Service-Token";

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the payload.
    Delivered { attempts: u32, status: u16 },
    /// Every attempt failed.
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },
    /// No endpoint is configured; nothing was sent.
    Skipped,
}

/// One way of getting a payload to the alert endpoint.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Make a single delivery attempt.
    ///
    /// Returns the status code on a 2xx response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] for non-2xx statuses, transport
    /// faults, and timeouts.
    async fn send(&self, payload: &AlertPayload) -> Result<u16, TransportError>;
}

/// [`AlertTransport`] that POSTs JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    service_token: Option<String>,
}

impl HttpTransport {
    /// Create a transport for `url`; `timeout` bounds each attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Http`] if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        service_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            service_token,
        })
    }
}

#[async_trait]
impl AlertTransport for HttpTransport {
    async fn send(&self, payload: &AlertPayload) -> Result<u16, TransportError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(token) = &self.service_token {
            request = request.header(SERVICE_TOKEN_HEADER, token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// The wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor)
    }

    /// Longest a full delivery can take when each attempt is bounded by
    /// `attempt_timeout`: every attempt times out and every backoff is
    /// slept.
    #[must_use]
    pub fn worst_case(&self, attempt_timeout: Duration) -> Duration {
        let waits = (1..self.max_attempts)
            .map(|attempt| self.backoff(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        attempt_timeout
            .saturating_mul(self.max_attempts)
            .saturating_add(waits)
    }
}

/// Delivers alert payloads with retry.
///
/// Cheap to clone; clones share the transport and the set of in-flight
/// deliveries.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Option<Arc<dyn AlertTransport>>,
    policy: RetryPolicy,
    in_flight: TaskTracker,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.is_some())
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher. With no transport every delivery is skipped.
    #[must_use]
    pub fn new(transport: Option<Arc<dyn AlertTransport>>, policy: RetryPolicy) -> Self {
        let policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        Self {
            transport,
            policy,
            in_flight: TaskTracker::new(),
        }
    }

    /// A dispatcher that skips every delivery.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, RetryPolicy::default())
    }

    /// Build from settings, using [`HttpTransport`] when a webhook URL is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Http`] if the HTTP client cannot be built.
    pub fn from_settings(settings: &AlertSettings) -> Result<Self, AlertError> {
        let transport = settings
            .webhook_url
            .as_deref()
            .map(|url| HttpTransport::new(url, settings.service_token.clone(), settings.timeout))
            .transpose()?
            .map(|t| Arc::new(t) as Arc<dyn AlertTransport>);
        Ok(Self::new(
            transport,
            RetryPolicy {
                max_attempts: settings.max_attempts,
                base: settings.retry_base,
            },
        ))
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whether deliveries will actually be attempted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Deliver `payload`, retrying with backoff, and report how it ended.
    pub async fn deliver(&self, payload: &AlertPayload) -> DeliveryOutcome {
        let Some(transport) = &self.transport else {
            tracing::info!("alert endpoint not configured, skipping delivery");
            return DeliveryOutcome::Skipped;
        };
        let report_id = payload.ndvi_report.report_id.as_str();

        let mut attempt = 1;
        loop {
            tracing::info!(report_id, attempt, "sending alert");
            match transport.send(payload).await {
                Ok(status) => {
                    tracing::info!(report_id, attempt, status, "alert delivered");
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        status,
                    };
                }
                Err(error) if attempt >= self.policy.max_attempts => {
                    tracing::error!(
                        report_id,
                        attempts = attempt,
                        %error,
                        "alert delivery exhausted"
                    );
                    return DeliveryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    };
                }
                Err(error) => {
                    let wait = self.policy.backoff(attempt);
                    tracing::warn!(
                        report_id,
                        attempt,
                        %error,
                        ?wait,
                        "alert attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Deliver `payload` on a detached task.
    ///
    /// The caller may drop the handle; delivery continues regardless and
    /// stays tracked until it ends. Must be called from within a tokio
    /// runtime.
    pub fn schedule(&self, payload: AlertPayload) -> JoinHandle<DeliveryOutcome> {
        let dispatcher = self.clone();
        self.in_flight.spawn(async move { dispatcher.deliver(&payload).await })
    }

    /// Number of scheduled deliveries that have not ended yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait up to `grace` for every scheduled delivery to end.
    ///
    /// Returns the number of deliveries still running when `grace`
    /// elapsed; those are abandoned when the runtime shuts down.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.in_flight.close();
        let pending = self.in_flight.len();
        if pending == 0 {
            return 0;
        }
        tracing::info!(pending, ?grace, "waiting for alert deliveries");
        if tokio::time::timeout(grace, self.in_flight.wait()).await.is_ok() {
            return 0;
        }
        let abandoned = self.in_flight.len();
        tracing::warn!(abandoned, "alert deliveries still running at shutdown");
        abandoned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use agrisense_ndvi::stats::histogram;
    use agrisense_ndvi::Report;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::Value;
    use tokio::time::Instant;

    use super::*;

    fn payload() -> AlertPayload {
        let report = Report {
            report_id: "r-1".into(),
            capture_date: "2025-01-01T00:00:00Z".into(),
            mean_ndvi: 0.2,
            median_ndvi: 0.2,
            pct_stress: 0.6,
            stress_threshold: 0.3,
            histogram: histogram(&[0.2]),
            tiles_url: None,
            preview_png_base64: None,
        };
        AlertPayload::compose(&report, Some("f1"), None)
    }

    /// Replays a fixed sequence of results and records when each attempt
    /// happened.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<u16, TransportError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(mut script: Vec<Result<u16, TransportError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn always_500() -> Arc<Self> {
            Self::new(
                (0..16)
                    .map(|_| {
                        Err(TransportError::Status {
                            status: 500,
                            body: "boom".into(),
                        })
                    })
                    .collect(),
            )
        }

        fn assert_gaps(&self, expected: &[Duration]) {
            let gaps = self.gaps();
            assert_eq!(gaps.len(), expected.len(), "gaps: {gaps:?}");
            for (gap, want) in gaps.iter().zip(expected) {
                assert_close(*gap, *want);
            }
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl AlertTransport for ScriptedTransport {
        async fn send(&self, _payload: &AlertPayload) -> Result<u16, TransportError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(TransportError::Timeout))
        }
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = actual.abs_diff(expected);
        assert!(
            diff <= Duration::from_millis(5),
            "expected {expected:?}, got {actual:?}"
        );
    }

    fn dispatcher(transport: &Arc<ScriptedTransport>, max_attempts: u32) -> Dispatcher {
        Dispatcher::new(
            Some(transport.clone()),
            RetryPolicy {
                max_attempts,
                base: Duration::from_secs(1),
            },
        )
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(
            policy.backoff(64),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }

    #[test]
    fn worst_case_covers_every_attempt_and_wait() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.worst_case(Duration::from_secs(10)),
            Duration::from_secs(30 + 1 + 2)
        );
        let single = RetryPolicy {
            max_attempts: 1,
            base: Duration::from_secs(5),
        };
        assert_eq!(single.worst_case(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_endpoint_is_exhausted() {
        let transport = ScriptedTransport::always_500();
        let start = Instant::now();
        let outcome = dispatcher(&transport, 3).deliver(&payload()).await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Exhausted {
                attempts: 3,
                last_error: TransportError::Status {
                    status: 500,
                    body: "boom".into()
                },
            }
        );
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
        transport.assert_gaps(&[Duration::from_secs(1), Duration::from_secs(2)]);
        // No wait after the final attempt.
        assert_close(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Timeout), Ok(202)]);
        let outcome = dispatcher(&transport, 3).deliver(&payload()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                attempts: 2,
                status: 202
            }
        );
        transport.assert_gaps(&[Duration::from_secs(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_budget_never_sleeps() {
        let transport = ScriptedTransport::always_500();
        let start = Instant::now();
        let outcome = dispatcher(&transport, 1).deliver(&payload()).await;
        assert!(matches!(outcome, DeliveryOutcome::Exhausted { attempts: 1, .. }));
        assert_close(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        let d = Dispatcher::new(
            None,
            RetryPolicy {
                max_attempts: 0,
                base: Duration::ZERO,
            },
        );
        assert_eq!(d.policy().max_attempts, 1);
    }

    #[tokio::test]
    async fn no_endpoint_is_skipped() {
        let outcome = Dispatcher::disabled().deliver(&payload()).await;
        assert_eq!(outcome, DeliveryOutcome::Skipped);

        let settings = AlertSettings::default();
        let d = Dispatcher::from_settings(&settings).unwrap();
        assert!(!d.is_enabled());
        assert_eq!(d.schedule(payload()).await.unwrap(), DeliveryOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_delivery_runs_detached() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let handle = dispatcher(&transport, 3).schedule(payload());
        assert_eq!(
            handle.await.unwrap(),
            DeliveryOutcome::Delivered {
                attempts: 1,
                status: 200
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_scheduled_retries() {
        let transport = ScriptedTransport::always_500();
        let d = dispatcher(&transport, 3);
        let handle = d.schedule(payload());
        assert_eq!(d.in_flight(), 1);

        let grace = d.policy().worst_case(Duration::from_secs(1));
        assert_eq!(d.clone().drain(grace).await, 0);
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
        assert!(matches!(
            handle.await.unwrap(),
            DeliveryOutcome::Exhausted { attempts: 3, .. }
        ));
        assert_eq!(d.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace() {
        let transport = ScriptedTransport::always_500();
        let d = dispatcher(&transport, 3);
        drop(d.schedule(payload()));

        let start = Instant::now();
        assert_eq!(d.drain(Duration::from_millis(500)).await, 1);
        assert_close(start.elapsed(), Duration::from_millis(500));
        assert_eq!(transport.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn drain_with_nothing_scheduled_returns_at_once() {
        assert_eq!(Dispatcher::disabled().drain(Duration::from_secs(60)).await, 0);
    }

    #[derive(Default)]
    struct Received {
        hits: AtomicU32,
        tokens: Mutex<Vec<Option<String>>>,
        bodies: Mutex<Vec<Value>>,
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/webhook/ndvi-alert")
    }

    fn webhook(received: Arc<Received>, fail_first: u32) -> Router {
        Router::new()
            .route(
                "/webhook/ndvi-alert",
                post(
                    move |State(received): State<Arc<Received>>,
                     headers: HeaderMap,
                     axum::Json(body): axum::Json<Value>| async move {
                        let hit = received.hits.fetch_add(1, Ordering::SeqCst);
                        received.tokens.lock().unwrap().push(
                            headers
                                .get(SERVICE_TOKEN_HEADER)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_owned),
                        );
                        received.bodies.lock().unwrap().push(body);
                        if hit < fail_first {
                            StatusCode::INTERNAL_SERVER_ERROR
                        } else {
                            StatusCode::OK
                        }
                    },
                ),
            )
            .with_state(received)
    }

    #[tokio::test]
    async fn http_transport_posts_payload_with_token() {
        let received = Arc::new(Received::default());
        let url = serve(webhook(received.clone(), 1)).await;
        let settings = AlertSettings {
            webhook_url: Some(url),
            service_token: Some("s3cret".into()),
            max_attempts: 3,
            retry_base: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        };
        let outcome = Dispatcher::from_settings(&settings)
            .unwrap()
            .deliver(&payload())
            .await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                attempts: 2,
                status: 200
            }
        );
        assert_eq!(received.hits.load(Ordering::SeqCst), 2);
        assert!(
            received
                .tokens
                .lock()
                .unwrap()
                .iter()
                .all(|t| t.as_deref() == Some("s3cret"))
        );
        let bodies = received.bodies.lock().unwrap();
        assert_eq!(bodies[0]["farmId"], "f1");
        assert_eq!(bodies[0]["sendAlert"], true);
        assert_eq!(bodies[0]["ndviReport"]["reportId"], "r-1");
    }

    #[tokio::test]
    async fn http_transport_omits_token_when_unset() {
        let received = Arc::new(Received::default());
        let url = serve(webhook(received.clone(), 0)).await;
        let transport = HttpTransport::new(url, None, Duration::from_secs(5)).unwrap();
        assert_eq!(transport.send(&payload()).await, Ok(200));
        assert_eq!(*received.tokens.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_every_attempt() {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/webhook/ndvi-alert",
                post(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    StatusCode::OK
                }),
            )
            .with_state(hits.clone());
        let url = serve(app).await;
        let transport = HttpTransport::new(url, None, Duration::from_millis(50)).unwrap();
        let d = Dispatcher::new(
            Some(Arc::new(transport)),
            RetryPolicy {
                max_attempts: 3,
                base: Duration::from_millis(1),
            },
        );

        let outcome = d.deliver(&payload()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Exhausted {
                attempts: 3,
                last_error: TransportError::Timeout,
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        // Bind then drop to get a port nobody is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport =
            HttpTransport::new(format!("http://{addr}/hook"), None, Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            transport.send(&payload()).await,
            Err(TransportError::Request(_))
        ));
    }
}
