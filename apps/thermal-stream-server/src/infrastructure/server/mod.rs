//! HTTP and WebSocket Server
//!
//! One axum listener serves the playback sockets, the CSV export and the
//! health endpoints.
//!
//! # Routes
//!
//! - `GET /uc/{data_set}/socket` - Playback session over WebSocket
//! - `GET /uc/{data_set}/csv/{key}/{start}/{end}[/{order}]` - CSV export
//! - `GET /health`, `/healthz`, `/readyz`, `/metrics`, `/version`

mod socket;
mod timer;

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use timer::TickTimer;

use crate::application::ports::SourceError;
use crate::application::services::SessionRegistry;
use crate::domain::continuity::ContinuityRegistry;
use crate::infrastructure::catalog::{DataSet, DataSetCatalog};
use crate::infrastructure::health::{self, HealthState};
use crate::infrastructure::sqlite::{CsvRequest, SortOrder};

// =============================================================================
// State
// =============================================================================

/// State shared by every connection.
#[derive(Debug)]
pub struct AppState {
    catalog: Arc<DataSetCatalog>,
    continuity: Arc<ContinuityRegistry>,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create state with fresh continuity and session registries.
    #[must_use]
    pub fn new(catalog: DataSetCatalog, shutdown: CancellationToken) -> Self {
        Self {
            catalog: Arc::new(catalog),
            continuity: Arc::new(ContinuityRegistry::new()),
            sessions: Arc::new(SessionRegistry::new()),
            shutdown,
        }
    }

    /// Served data sets.
    #[must_use]
    pub fn catalog(&self) -> &DataSetCatalog {
        &self.catalog
    }

    /// Reconnect continuity of every data set.
    #[must_use]
    pub fn continuity(&self) -> &ContinuityRegistry {
        &self.continuity
    }

    /// Open sessions.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn data_set(&self, id: &str) -> Result<Arc<DataSet>, Response> {
        self.catalog.require(id).map_err(|e| {
            tracing::debug!(data_set = id, "Rejected request for unknown data set");
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        })
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build the complete router.
pub fn router(state: Arc<AppState>) -> Router {
    let health_state = Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&state.catalog),
        Arc::clone(&state.continuity),
        Arc::clone(&state.sessions),
    ));

    Router::new()
        .route("/uc/{data_set}/socket", get(socket_handler))
        .route("/uc/{data_set}/csv/{key}/{start}/{end}", get(csv_handler))
        .route("/uc/{data_set}/csv/{key}/{start}/{end}/{order}", get(csv_ordered_handler))
        .with_state(state)
        .merge(health::router(health_state))
}

/// Serve on `listener` until `state`'s shutdown token is cancelled.
///
/// # Errors
///
/// Returns `ServerError` if the HTTP server fails while running.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let addr = listener.local_addr().map_err(ServerError::Io)?;
    let shutdown = state.shutdown.clone();
    let app = router(state);

    tracing::info!(%addr, "Playback server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ServerError::Io)?;

    tracing::info!("Playback server stopped");
    Ok(())
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn socket_handler(
    State(state): State<Arc<AppState>>,
    Path(data_set): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let data_set = match state.data_set(&data_set) {
        Ok(data_set) => data_set,
        Err(response) => return response,
    };

    ws.on_upgrade(move |upgraded| socket::drive(upgraded, data_set, state))
}

async fn csv_handler(
    State(state): State<Arc<AppState>>,
    Path((data_set, key, start, end)): Path<(String, String, String, String)>,
) -> Response {
    export_range(&state, &data_set, key, &start, &end, SortOrder::default()).await
}

async fn csv_ordered_handler(
    State(state): State<Arc<AppState>>,
    Path((data_set, key, start, end, order)): Path<(String, String, String, String, String)>,
) -> Response {
    let order = match order.parse::<SortOrder>() {
        Ok(order) => order,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    export_range(&state, &data_set, key, &start, &end, order).await
}

async fn export_range(
    state: &AppState,
    data_set: &str,
    key: String,
    start: &str,
    end: &str,
    order: SortOrder,
) -> Response {
    match CsvRequest::parse(key, start, end, order) {
        Ok(request) => export(state, data_set, request).await,
        Err(e) => {
            tracing::debug!(data_set, error = %e, "Rejected CSV export bounds");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn export(state: &AppState, data_set: &str, request: CsvRequest) -> Response {
    let data_set = match state.data_set(data_set) {
        Ok(data_set) => data_set,
        Err(response) => return response,
    };

    let id = data_set.id().to_string();
    let result = tokio::task::spawn_blocking(move || data_set.export_csv(&request)).await;

    match result {
        Ok(Ok(body)) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], body).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(data_set = %id, error = %e, "CSV export failed");
            let status = match e {
                SourceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(data_set = %id, error = %e, "CSV export task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: std::net::SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Listener or connection failure.
    #[error("server error: {0}")]
    Io(std::io::Error),
}

/// Bind a listener.
///
/// # Errors
///
/// Returns `ServerError::BindFailed` if the address cannot be bound.
pub async fn bind(addr: std::net::SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::BindFailed { addr, source })
}

// =============================================================================
// Tests
// =============================================================================
