#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Thermal Stream Server - Time-Series Playback over WebSocket
//!
//! Replays historical time series stored in SQLite to WebSocket clients as
//! if they were live. Each connection gets its own playback session with a
//! tick clock, seek and bulk backfill, speed changes and key filtering.
//! Sessions of the same data set share reconnect continuity and, when the
//! data set opts in, a broadcast channel.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure playback types
//!   - `clock`: Domain time to tick conversion
//!   - `series`: Records, tick ranges and key filters
//!   - `continuity`: Where the last session of a data set left off
//!   - `protocol`: Socket messages and command decoding
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Time-series source and message sink interfaces
//!   - `services`: Bulk emitter, playback session, session registry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `sqlite`: Read-only stores and CSV export
//!   - `catalog`: Built-in data sets
//!   - `broadcast`: Per data-set fan-out
//!   - `server`: axum routes and the per-connection driver
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────────┐     ┌─────────────────┐
//! SQLite store ─►│ SqliteSource   │────►│ PlaybackSession │──► WebSocket client
//!                └────────────────┘     └─────────────────┘
//!                                          ▲          │
//!                       ContinuityRegistry ┘          └─► Broadcaster ──► other clients
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core playback types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::clock::{ClockError, DomainTime, Tick, TimeFactor};
pub use domain::continuity::{ContinuityRegistry, ContinuitySnapshot};
pub use domain::protocol::{Command, Envelope, ReplyKind, ServerMessage};
pub use domain::series::{Filter, Record, TimeRange};

// Application
pub use application::ports::{MessageSink, SourceError, TimeSeriesSource};
pub use application::services::{PlaybackSession, SessionRegistry, SessionSettings};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServerConfig};

// Catalog and server (for integration tests)
pub use infrastructure::catalog::{CatalogError, CatalogSettings, DataSetCatalog, DataSetDefinition};
pub use infrastructure::server::{AppState, ServerError, router, serve};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
