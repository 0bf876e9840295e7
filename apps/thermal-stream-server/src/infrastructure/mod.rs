//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, and the HTTP surface around them.

/// Broadcast channel adapters for client message fan-out.
pub mod broadcast;

/// Data-set catalog: stores, layouts and session defaults.
pub mod catalog;

/// Configuration from environment variables.
pub mod config;

/// Health check HTTP endpoints.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// HTTP and WebSocket server.
pub mod server;

/// SQLite time-series stores and CSV export.
pub mod sqlite;

/// OpenTelemetry tracing integration.
pub mod telemetry;
