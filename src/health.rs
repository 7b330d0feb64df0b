//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once leadership is held and controllers run)
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
use tracing::info;

/// Labels for per-pair sync metrics (resource kind + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SyncLabels {
    pub kind: String,
    pub name: String,
}

impl EncodeLabelSet for SyncLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for metrics aggregated per kind and API side
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SideLabels {
    pub kind: String,
    pub side: String,
}

impl EncodeLabelSet for SideLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("side", self.side.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for authority transitions
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TransitionLabels {
    pub kind: String,
    pub to: String,
}

impl EncodeLabelSet for TransitionLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("to", self.to.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels keyed only by resource kind
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct KindLabels {
    pub kind: String,
}

impl EncodeLabelSet for KindLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total sync passes
    pub syncs_total: Family<SyncLabels, Counter>,
    /// Failed sync passes
    pub sync_errors_total: Family<SyncLabels, Counter>,
    /// Sync pass duration histogram
    pub sync_duration_seconds: Family<KindLabels, Histogram>,
    /// Conversions that failed and were retried
    pub conversion_failures_total: Family<KindLabels, Counter>,
    /// Pairs reported diverged after the deadline
    pub divergences_total: Family<SyncLabels, Counter>,
    /// Mirrors created, per side they were created on
    pub mirrors_created_total: Family<SideLabels, Counter>,
    /// Mirrors deleted, per side they were deleted on
    pub mirrors_deleted_total: Family<SideLabels, Counter>,
    /// Applied authority transitions, per target state
    pub authority_transitions_total: Family<TransitionLabels, Counter>,
    /// Pairs currently lagging their source
    pub lagging_pairs: Family<KindLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_labels(kind: &str) -> KindLabels {
    KindLabels {
        kind: kind.to_string(),
    }
}

fn sync_labels(kind: &str, name: &str) -> SyncLabels {
    SyncLabels {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn side_labels(kind: &str, side: &str) -> SideLabels {
    SideLabels {
        kind: kind.to_string(),
        side: side.to_string(),
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let syncs_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "machine_sync_syncs",
            "Total number of sync passes",
            syncs_total.clone(),
        );

        let sync_errors_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "machine_sync_sync_errors",
            "Total number of failed sync passes",
            sync_errors_total.clone(),
        );

        let sync_duration_seconds = Family::<KindLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "machine_sync_sync_duration_seconds",
            "Duration of a sync pass in seconds",
            sync_duration_seconds.clone(),
        );

        let conversion_failures_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "machine_sync_conversion_failures",
            "Total number of failed field conversions",
            conversion_failures_total.clone(),
        );

        let divergences_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "machine_sync_divergences",
            "Total number of divergence reports",
            divergences_total.clone(),
        );

        let mirrors_created_total = Family::<SideLabels, Counter>::default();
        registry.register(
            "machine_sync_mirrors_created",
            "Total number of mirrors created",
            mirrors_created_total.clone(),
        );

        let mirrors_deleted_total = Family::<SideLabels, Counter>::default();
        registry.register(
            "machine_sync_mirrors_deleted",
            "Total number of mirrors deleted",
            mirrors_deleted_total.clone(),
        );

        let authority_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "machine_sync_authority_transitions",
            "Total number of applied authority transitions",
            authority_transitions_total.clone(),
        );

        let lagging_pairs = Family::<KindLabels, Gauge>::default();
        registry.register(
            "machine_sync_lagging_pairs",
            "Number of pairs whose mirror lags the source",
            lagging_pairs.clone(),
        );

        Self {
            syncs_total,
            sync_errors_total,
            sync_duration_seconds,
            conversion_failures_total,
            divergences_total,
            mirrors_created_total,
            mirrors_deleted_total,
            authority_transitions_total,
            lagging_pairs,
            registry,
        }
    }

    /// Record a successful sync pass
    pub fn record_sync(&self, kind: &str, name: &str, duration_secs: f64) {
        self.syncs_total.get_or_create(&sync_labels(kind, name)).inc();
        self.sync_duration_seconds
            .get_or_create(&kind_labels(kind))
            .observe(duration_secs);
    }

    /// Record a failed sync pass
    pub fn record_error(&self, kind: &str, name: &str) {
        self.sync_errors_total
            .get_or_create(&sync_labels(kind, name))
            .inc();
    }

    pub fn record_conversion_failure(&self, kind: &str) {
        self.conversion_failures_total
            .get_or_create(&kind_labels(kind))
            .inc();
    }

    pub fn record_divergence(&self, kind: &str, name: &str) {
        self.divergences_total
            .get_or_create(&sync_labels(kind, name))
            .inc();
    }

    pub fn record_mirror_created(&self, kind: &str, side: &str) {
        self.mirrors_created_total
            .get_or_create(&side_labels(kind, side))
            .inc();
    }

    pub fn record_mirror_deleted(&self, kind: &str, side: &str) {
        self.mirrors_deleted_total
            .get_or_create(&side_labels(kind, side))
            .inc();
    }

    pub fn record_authority_transition(&self, kind: &str, to: &str) {
        self.authority_transitions_total
            .get_or_create(&TransitionLabels {
                kind: kind.to_string(),
                to: to.to_string(),
            })
            .inc();
    }

    /// Update the number of lagging pairs of a kind
    pub fn set_lagging(&self, kind: &str, count: i64) {
        self.lagging_pairs.get_or_create(&kind_labels(kind)).set(count);
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
    /// Whether the operator is ready (acquired leadership and running controllers)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful sync timestamp (Unix epoch seconds)
    pub last_sync: AtomicU64,
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
            last_sync: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
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
/// Returns 503 Service Unavailable until leadership is held.
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

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
