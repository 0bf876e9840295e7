//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the playback services and the port interfaces that
//! define how a session talks to its store and its client.

/// Port interfaces for external systems (time-series stores, clients).
pub mod ports;

/// Application services for bulk delivery and playback sessions.
pub mod services;
