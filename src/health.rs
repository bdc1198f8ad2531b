//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once the initial sync has
//!   completed and the webhook is serving)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Labels for admission decisions
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdmissionLabels {
    pub result: String,
    pub reason: String,
}

impl EncodeLabelSet for AdmissionLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("result", self.result.as_str()).encode(encoder.encode_label())?;
        ("reason", self.reason.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Counter,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Counter,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Histogram,
    /// Admission decisions by result and reason
    pub admission_requests_total: Family<AdmissionLabels, Counter>,
    /// Claims a reconcile could not take because another resource holds them
    pub claim_conflicts_total: Counter,
    /// Current number of claims in the cache
    pub cache_entries: Gauge,
    /// Claims evicted by the sweeper
    pub cache_evictions_total: Counter,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Counter::default();
        registry.register(
            "contour_admission_webhook_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Counter::default();
        registry.register(
            "contour_admission_webhook_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds = Histogram::new(exponential_buckets(0.0005, 2.0, 14));
        registry.register(
            "contour_admission_webhook_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let admission_requests_total = Family::<AdmissionLabels, Counter>::default();
        registry.register(
            "contour_admission_webhook_admission_requests",
            "Admission decisions by result and reason",
            admission_requests_total.clone(),
        );

        let claim_conflicts_total = Counter::default();
        registry.register(
            "contour_admission_webhook_claim_conflicts",
            "Virtual host claims held by another HTTPProxy during reconcile",
            claim_conflicts_total.clone(),
        );

        let cache_entries = Gauge::default();
        registry.register(
            "contour_admission_webhook_cache_entries",
            "Number of virtual host claims in the cache",
            cache_entries.clone(),
        );

        let cache_evictions_total = Counter::default();
        registry.register(
            "contour_admission_webhook_cache_evictions",
            "Claims evicted after their TTL elapsed",
            cache_evictions_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            admission_requests_total,
            claim_conflicts_total,
            cache_entries,
            cache_evictions_total,
            registry,
        }
    }

    /// Record a finished reconciliation
    pub fn record_reconcile(&self, duration_secs: f64) {
        self.reconciliations_total.inc();
        self.reconcile_duration_seconds.observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self) {
        self.reconciliation_errors_total.inc();
    }

    /// Record an admission decision
    pub fn record_admission(&self, allowed: bool, reason: &str) {
        let labels = AdmissionLabels {
            result: if allowed { "allowed" } else { "denied" }.to_string(),
            reason: reason.to_string(),
        };
        self.admission_requests_total.get_or_create(&labels).inc();
    }

    /// Record a claim lost to another resource
    pub fn record_conflict(&self) {
        self.claim_conflicts_total.inc();
    }

    /// Record the result of a sweep pass
    pub fn record_sweep(&self, evicted: usize, remaining: usize) {
        self.cache_evictions_total.inc_by(evicted as u64);
        self.set_cache_entries(remaining);
    }

    /// Update the cache size gauge
    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook is ready (initial sync done and serving)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the claim cache has been built from
/// the initial list of HTTPProxies, so the API server never reaches a
/// webhook holding a cold cache.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server until `shutdown` is cancelled
///
/// Binds to 0.0.0.0 on the given port and serves health/metrics endpoints.
pub async fn run_health_server(
    state: Arc<HealthState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
