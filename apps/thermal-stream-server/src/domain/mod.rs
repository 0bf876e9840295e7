//! Domain Layer - Core playback types.
//!
//! Pure types with no I/O: the tick clock, time-series records and filters,
//! reconnect continuity and the socket message shapes.

/// Domain time to tick conversion.
pub mod clock;

/// Reconnect continuity snapshots per data set.
pub mod continuity;

/// Socket protocol messages and command decoding.
pub mod protocol;

/// Records, tick ranges and key filters.
pub mod series;
