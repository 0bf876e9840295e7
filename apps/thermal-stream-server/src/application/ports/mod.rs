//! Port Interfaces
//!
//! Contracts between the playback session and the outside world, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TimeSeriesSource`: read access to a backing time-series store
//! - `MessageSink`: delivery of server messages to one client

#[cfg(test)]
mod in_memory_source;
mod message_sink_port;
mod time_series_source_port;

pub use message_sink_port::MessageSink;
pub use time_series_source_port::{SourceError, TimeSeriesSource};

#[cfg(test)]
pub use in_memory_source::InMemorySource;
#[cfg(test)]
pub use time_series_source_port::MockTimeSeriesSource;
