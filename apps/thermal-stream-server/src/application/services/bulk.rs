//! Bulk Emitter
//!
//! Splits an ordered record sequence into fixed-size chunks. Each chunk is
//! sent as one data message followed by a `dataBulkSent` marker carrying
//! the ticks of its first and last record.

use std::num::NonZeroUsize;

use crate::application::ports::MessageSink;
use crate::domain::clock::TimeFactor;
use crate::domain::protocol::{ControlMessage, ServerMessage, WireRecord};
use crate::domain::series::Record;

/// Records per data message unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = match NonZeroUsize::new(30) {
    Some(size) => size,
    None => unreachable!(),
};

/// Chunks records into bulks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEmitter {
    chunk_size: NonZeroUsize,
}

impl Default for BulkEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl BulkEmitter {
    /// Create an emitter with the given chunk size.
    #[must_use]
    pub const fn new(chunk_size: NonZeroUsize) -> Self {
        Self { chunk_size }
    }

    /// Maximum records per chunk.
    #[must_use]
    pub const fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Emit `records` in order and return how many were sent.
    ///
    /// Empty input sends nothing.
    pub fn emit(
        &self,
        records: Vec<Record>,
        time_factor: TimeFactor,
        sink: &mut impl MessageSink,
    ) -> usize {
        let total = records.len();
        let mut records = records.into_iter().peekable();

        while records.peek().is_some() {
            let chunk: Vec<Record> = records.by_ref().take(self.chunk_size.get()).collect();
            let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
                break;
            };
            let marker = ControlMessage::DataBulkSent {
                from: first.tick,
                to: last.tick,
            };

            let bulk = chunk
                .into_iter()
                .map(|record| WireRecord::from_record(record, time_factor))
                .collect();
            sink.send(ServerMessage::Bulk(bulk));
            sink.send(ServerMessage::Control(marker));
        }

        total
    }
}

// =============================================================================
// Tests
// =============================================================================
