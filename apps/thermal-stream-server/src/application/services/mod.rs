//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BulkEmitter`: Chunks records into bulks with boundary markers
//! - `PlaybackSession`: Per-connection playback state machine
//! - `SessionRegistry`: Open sessions per data set

mod bulk;
mod registry;
mod session;

pub use bulk::{BulkEmitter, DEFAULT_CHUNK_SIZE};
pub use registry::{SessionEntry, SessionLease, SessionRegistry};
pub use session::{PlaybackSession, SessionPhase, SessionSettings, SessionStats, TickOutcome};
