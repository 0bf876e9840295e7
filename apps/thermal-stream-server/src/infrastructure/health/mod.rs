//! Health Check and Metrics Endpoint
//!
//! HTTP endpoints for health checks, store availability reporting, and
//! Prometheus metrics. Served on the same listener as the playback routes.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks stores)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /version` - Crate version as JSON

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::SessionRegistry;
use crate::domain::clock::Tick;
use crate::domain::continuity::ContinuityRegistry;
use crate::infrastructure::catalog::{DataSet, DataSetCatalog};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Server version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Open sessions across all data sets.
    pub active_sessions: usize,
    /// Per data-set status, in id order.
    pub data_sets: Vec<DataSetStatus>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every store is available.
    Healthy,
    /// Some stores are missing.
    Degraded,
    /// No store is available.
    Unhealthy,
}

/// Status of one data set.
#[derive(Debug, Clone, Serialize)]
pub struct DataSetStatus {
    /// Data-set id.
    pub id: String,
    /// Whether the store file exists.
    pub store_available: bool,
    /// Open sessions.
    pub active_sessions: usize,
    /// Seconds per tick for new sessions.
    pub time_factor: i64,
    /// Where the last closed session left off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuity: Option<ContinuityStatus>,
    /// Subscribed sessions, for data sets with a broadcaster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_subscribers: Option<usize>,
}

/// Reconnect continuity of one data set.
#[derive(Debug, Clone, Serialize)]
pub struct ContinuityStatus {
    /// Tick reached by the last closed session.
    pub last_tick: Tick,
    /// Tick a session opening now would start from.
    pub resume_tick: Tick,
    /// When that session closed.
    pub closed_at: DateTime<Utc>,
}

/// Version response.
#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    /// Crate name.
    pub name: &'static str,
    /// Crate version.
    pub version: &'static str,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health endpoints.
#[derive(Debug)]
pub struct HealthState {
    version: String,
    started_at: Instant,
    catalog: Arc<DataSetCatalog>,
    continuity: Arc<ContinuityRegistry>,
    sessions: Arc<SessionRegistry>,
}

impl HealthState {
    /// Create new health state.
    #[must_use]
    pub fn new(
        version: String,
        catalog: Arc<DataSetCatalog>,
        continuity: Arc<ContinuityRegistry>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            catalog,
            continuity,
            sessions,
        }
    }
}

/// Health, metrics and version routes.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/version", get(version_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    // Ready if at least one store can be replayed
    let is_ready = state.catalog.iter().any(|data_set| data_set.store().is_available());

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn version_handler() -> impl IntoResponse {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let now = Utc::now();
    let snapshots = state.continuity.snapshots();
    let counts = state.sessions.counts();

    let data_sets: Vec<DataSetStatus> = state
        .catalog
        .iter()
        .map(|data_set| {
            let continuity = snapshots.get(data_set.id()).map(|snapshot| ContinuityStatus {
                last_tick: snapshot.last_tick,
                resume_tick: snapshot.resume_tick(now),
                closed_at: snapshot.closed_at,
            });
            data_set_status(data_set, counts.get(data_set.id()).copied().unwrap_or(0), continuity)
        })
        .collect();

    HealthResponse {
        status: determine_health_status(&data_sets),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        active_sessions: state.sessions.total(),
        data_sets,
    }
}

fn data_set_status(
    data_set: &DataSet,
    active_sessions: usize,
    continuity: Option<ContinuityStatus>,
) -> DataSetStatus {
    DataSetStatus {
        id: data_set.id().to_string(),
        store_available: data_set.store().is_available(),
        active_sessions,
        time_factor: data_set.session_settings().time_factor.seconds(),
        continuity,
        broadcast_subscribers: data_set.broadcaster().map(|b| b.subscriber_count()),
    }
}

fn determine_health_status(data_sets: &[DataSetStatus]) -> HealthStatus {
    let available = data_sets.iter().filter(|d| d.store_available).count();

    match available {
        0 => HealthStatus::Unhealthy,
        n if n == data_sets.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::catalog::CatalogSettings;
    use crate::infrastructure::config::ServerConfig;

    fn status(id: &str, store_available: bool) -> DataSetStatus {
        DataSetStatus {
            id: id.to_string(),
            store_available,
            active_sessions: 0,
            time_factor: 86_400,
            continuity: None,
            broadcast_subscribers: None,
        }
    }

    fn state(data_dir: &std::path::Path) -> Arc<HealthState> {
        let settings = CatalogSettings {
            data_dir: data_dir.to_path_buf(),
            ..CatalogSettings::from(&ServerConfig::default())
        };
        Arc::new(HealthState::new(
            "0.0.0-test".to_string(),
            Arc::new(DataSetCatalog::builtin(&settings).unwrap()),
            Arc::new(ContinuityRegistry::new()),
            Arc::new(SessionRegistry::new()),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_all_available() {
        let statuses = [status("a", true), status("b", true)];
        assert_eq!(determine_health_status(&statuses), HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_partial() {
        let statuses = [status("a", true), status("b", false)];
        assert_eq!(determine_health_status(&statuses), HealthStatus::Degraded);
    }

    #[test]
    fn determine_status_none_available() {
        let statuses = [status("a", false), status("b", false)];
        assert_eq!(determine_health_status(&statuses), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(&[]), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn missing_stores_are_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path()))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn one_store_makes_health_degraded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sp500.db"), b"").unwrap();
        let state = state(dir.path());
        let _lease = state.sessions.register(uuid::Uuid::new_v4(), "thermal_sp500");

        let ready = router(Arc::clone(&state))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.active_sessions, 1);

        let sp500 = response.data_sets.iter().find(|d| d.id == "thermal_sp500").unwrap();
        assert!(sp500.store_available);
        assert_eq!(sp500.active_sessions, 1);

        let ftse = response.data_sets.iter().find(|d| d.id == "thermal_ftse250").unwrap();
        assert_eq!(ftse.broadcast_subscribers, Some(0));
    }

    #[tokio::test]
    async fn version_reports_crate_version() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path()))
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
