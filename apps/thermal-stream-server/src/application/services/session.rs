//! Playback Session
//!
//! Per-connection state machine that replays a time-series source at a
//! controllable rate.
//!
//! # Lifecycle
//!
//! ```text
//! Cold --open--> Paused <--start/stop--> Streaming
//!                  \                        /
//!                   `-------close---------'--> Closed
//! ```
//!
//! The session never touches the socket or a timer directly. Everything it
//! produces goes into a [`MessageSink`], and the driver calls
//! [`PlaybackSession::on_tick`] on its own timer while
//! [`PlaybackSession::is_streaming`] is true.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::application::ports::{MessageSink, SourceError, TimeSeriesSource};
use crate::application::services::bulk::{BulkEmitter, DEFAULT_CHUNK_SIZE};
use crate::domain::clock::{PlaybackClock, Tick, TimeFactor};
use crate::domain::continuity::{ContinuitySnapshot, DataSetId, ReconnectContinuity};
use crate::domain::protocol::{
    Command, ControlMessage, Envelope, Extent, Reply, ReplyKind, ServerMessage,
};
use crate::domain::series::{Filter, TimeRange};

// =============================================================================
// Settings
// =============================================================================

/// Per data-set session defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Data set the session replays.
    pub data_set: DataSetId,
    /// Initial time factor.
    pub time_factor: TimeFactor,
    /// Informational step label.
    pub step_unit: String,
    /// Filter a new session starts with.
    pub default_filter: Filter,
    /// Start periodic delivery right after open.
    pub stream_on_open: bool,
    /// Wall-clock period between ticks.
    pub tick_interval: Duration,
    /// Records per bulk.
    pub chunk_size: NonZeroUsize,
}

impl SessionSettings {
    /// Settings with a one second tick interval, default chunk size, no
    /// default filter and streaming on open.
    #[must_use]
    pub fn new(data_set: impl Into<DataSetId>, time_factor: TimeFactor, step_unit: impl Into<String>) -> Self {
        Self {
            data_set: data_set.into(),
            time_factor,
            step_unit: step_unit.into(),
            default_filter: Filter::default(),
            stream_on_open: true,
            tick_interval: Duration::from_secs(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, not yet opened.
    Cold,
    /// Open, periodic delivery stopped.
    Paused,
    /// Open, periodic delivery running.
    Streaming,
    /// Closed; no further output.
    Closed,
}

/// Counters accumulated over the session's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Records sent to the client.
    pub records_emitted: u64,
    /// Commands handled (replies sent).
    pub commands_handled: u64,
    /// Source failures during open, ticks and commands.
    pub source_errors: u64,
    /// Periodic ticks that delivered successfully.
    pub ticks: u64,
}

/// Result of one periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not streaming; nothing happened.
    Idle,
    /// The tick range was delivered and the clock advanced.
    Delivered {
        /// Records sent.
        records: usize,
    },
    /// The source failed; the clock did not advance.
    Failed,
}

// =============================================================================
// Session
// =============================================================================

/// Playback state for one client connection.
pub struct PlaybackSession<S: TimeSeriesSource> {
    id: Uuid,
    settings: SessionSettings,
    source: S,
    clock: PlaybackClock,
    emitter: BulkEmitter,
    continuity: Arc<ReconnectContinuity>,
    filter: Filter,
    current_tick: Tick,
    streaming: bool,
    opened: bool,
    closed: bool,
    stats: SessionStats,
}

impl<S: TimeSeriesSource> PlaybackSession<S> {
    /// Create a cold session over `source`.
    pub fn new(settings: SessionSettings, source: S, continuity: Arc<ReconnectContinuity>) -> Self {
        Self {
            id: Uuid::new_v4(),
            clock: PlaybackClock::new(settings.time_factor, settings.step_unit.clone()),
            emitter: BulkEmitter::new(settings.chunk_size),
            filter: settings.default_filter.clone(),
            settings,
            source,
            continuity,
            current_tick: 0,
            streaming: false,
            opened: false,
            closed: false,
            stats: SessionStats::default(),
        }
    }

    // ===== Accessors =====

    /// Session identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Data set being replayed.
    #[must_use]
    pub fn data_set(&self) -> &str {
        &self.settings.data_set
    }

    /// Current tick.
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Current time factor.
    #[must_use]
    pub const fn time_factor(&self) -> TimeFactor {
        self.clock.time_factor()
    }

    /// Current key filter.
    #[must_use]
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Whether periodic delivery is running. The driver's timer follows this.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming && !self.closed
    }

    /// Period between ticks.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        self.settings.tick_interval
    }

    /// Lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        if self.closed {
            SessionPhase::Closed
        } else if !self.opened {
            SessionPhase::Cold
        } else if self.streaming {
            SessionPhase::Streaming
        } else {
            SessionPhase::Paused
        }
    }

    /// Accumulated counters.
    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    // ===== Lifecycle =====

    /// Open the session at the current wall-clock time.
    pub fn open(&mut self, sink: &mut impl MessageSink) {
        self.open_at(Utc::now(), sink);
    }

    /// Open the session as if the wall clock read `now`.
    ///
    /// Resumes from the data set's continuity snapshot when one exists,
    /// otherwise from the first timestamp of the store. Opening twice is a
    /// no-op.
    pub fn open_at(&mut self, now: DateTime<Utc>, sink: &mut impl MessageSink) {
        if self.opened || self.closed {
            return;
        }
        self.opened = true;

        if let Some(snapshot) = self.continuity.snapshot() {
            self.clock.set_time_factor(snapshot.last_time_factor);
            self.current_tick = snapshot.resume_tick(now);
            tracing::info!(
                session_id = %self.id,
                data_set = %self.settings.data_set,
                last_tick = snapshot.last_tick,
                resume_tick = self.current_tick,
                time_factor = %snapshot.last_time_factor,
                "Resuming playback from previous session"
            );
        } else {
            self.current_tick = match self.source.first_timestamp(&self.filter) {
                Ok(first) => first.map_or(0, |t| self.clock.to_tick(t)),
                Err(e) => {
                    self.record_source_error(&e, "first_timestamp");
                    0
                }
            };
            tracing::info!(
                session_id = %self.id,
                data_set = %self.settings.data_set,
                start_tick = self.current_tick,
                "Starting playback from first timestamp"
            );
        }

        sink.send(ServerMessage::Control(ControlMessage::StartTime {
            start_time: self.clock.to_domain(self.current_tick),
            time_unit: "s",
            step: self.clock.time_factor(),
            step_unit: self.clock.step_unit().to_string(),
        }));

        match self.source.read_constant_data() {
            Ok(constants) => {
                let sent = self.emitter.emit(constants, self.clock.time_factor(), sink);
                self.stats.records_emitted += sent as u64;
            }
            Err(e) => self.record_source_error(&e, "read_constant_data"),
        }
        sink.send(ServerMessage::Control(ControlMessage::ConstantsSent));

        self.streaming = self.settings.stream_on_open;
    }

    /// Close the session at the current wall-clock time.
    pub fn close(&mut self) -> bool {
        self.close_at(Utc::now())
    }

    /// Stop delivery, release the source and record continuity.
    ///
    /// Returns `true` on the first call only; later calls do nothing. A
    /// session that was never opened releases its source but leaves the
    /// continuity record untouched.
    pub fn close_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.streaming = false;
        self.source.close();

        if self.opened {
            self.continuity.record(ContinuitySnapshot {
                last_tick: self.current_tick,
                last_time_factor: self.clock.time_factor(),
                closed_at: now,
            });
        }

        tracing::info!(
            session_id = %self.id,
            data_set = %self.settings.data_set,
            last_tick = self.current_tick,
            records_emitted = self.stats.records_emitted,
            commands = self.stats.commands_handled,
            "Playback session closed"
        );
        true
    }

    // ===== Periodic Delivery =====

    /// Deliver `[current_tick, current_tick + 1)` and advance on success.
    pub fn on_tick(&mut self, sink: &mut impl MessageSink) -> TickOutcome {
        if !self.is_streaming() {
            return TickOutcome::Idle;
        }

        let end = self.current_tick.saturating_add(1);
        match self.flush(TimeRange::new(self.current_tick, end), sink) {
            Ok(records) => {
                self.current_tick = end;
                self.stats.ticks += 1;
                TickOutcome::Delivered { records }
            }
            Err(e) => {
                self.record_source_error(&e, "tick");
                TickOutcome::Failed
            }
        }
    }

    // ===== Commands =====

    /// Apply one client command and send exactly one reply.
    ///
    /// Returns the kind of the reply sent, or `None` once closed.
    pub fn handle(&mut self, envelope: Envelope, sink: &mut impl MessageSink) -> Option<ReplyKind> {
        if self.closed {
            return None;
        }

        let Envelope { refid, command } = envelope;
        tracing::debug!(session_id = %self.id, command = command.name(), "Handling command");

        let reply = match command {
            Command::JumpTo { time, bulk_till } => self.jump_to(refid, time, bulk_till, sink),
            Command::StartStream { time } => {
                let previous = self.streaming;
                if let Some(time) = time {
                    self.current_tick = self.clock.to_tick(time);
                }
                self.streaming = true;
                tracing::info!(session_id = %self.id, tick = self.current_tick, previous, "Start streaming");

                let mut reply = Reply::new(refid, ReplyKind::StartedStream);
                reply.current_time = Some(self.current_tick);
                reply.previous = Some(previous);
                reply
            }
            Command::StopStream => {
                let previous = self.streaming;
                self.streaming = false;
                tracing::info!(session_id = %self.id, tick = self.current_tick, previous, "Stop streaming");

                let mut reply = Reply::new(refid, ReplyKind::StoppedStream);
                reply.previous = Some(previous);
                reply
            }
            Command::Load { start, end } => self.load(refid, start, end, sink),
            Command::Speedup { factor } => {
                self.clock.set_time_factor(factor);
                tracing::info!(session_id = %self.id, time_factor = %factor, "Speed changed");

                let mut reply = Reply::new(refid, ReplyKind::SpeededUp);
                reply.time_factor = Some(factor);
                reply
            }
            Command::SetNodeFilter { filter } => {
                self.filter = filter;
                tracing::info!(
                    session_id = %self.id,
                    include = ?self.filter.include(),
                    exclude = ?self.filter.exclude(),
                    "Node filter replaced"
                );
                self.filter_reply(refid)
            }
            Command::GetNodeFilter => self.filter_reply(refid),
            Command::ExtentTime => self.extent(refid),
            Command::Broadcast(_) => Self::unknown_reply(refid, "broadcast"),
            Command::Unknown(kind) => Self::unknown_reply(refid, &kind),
            Command::Malformed { kind, error } => {
                tracing::warn!(session_id = %self.id, kind = kind.as_str(), error = %error, "Malformed command");
                Reply::new(refid, kind).with_error(error.to_string())
            }
        };

        let kind = reply.internal;
        self.stats.commands_handled += 1;
        sink.send(ServerMessage::Reply(reply));
        Some(kind)
    }

    fn jump_to(
        &mut self,
        refid: Value,
        time: i64,
        bulk_till: Option<i64>,
        sink: &mut impl MessageSink,
    ) -> Reply {
        self.current_tick = self.clock.to_tick(time);
        tracing::info!(session_id = %self.id, tick = self.current_tick, "Jump");

        if let Some(till) = bulk_till.map(|t| self.clock.to_tick(t))
            && till > self.current_tick
        {
            match self.flush(TimeRange::new(self.current_tick, till), sink) {
                Ok(_) => self.current_tick = till,
                Err(e) => self.record_source_error(&e, "jumpTo"),
            }
        }

        let mut reply = Reply::new(refid, ReplyKind::JumpedTo);
        reply.current_time = Some(self.current_tick);
        reply
    }

    fn load(&mut self, refid: Value, start: i64, end: i64, sink: &mut impl MessageSink) -> Reply {
        let range = TimeRange::new(self.clock.to_tick(start), self.clock.to_tick(end));
        tracing::info!(session_id = %self.id, start = range.start, end = range.end, "Load range");

        if !range.is_empty()
            && let Err(e) = self.flush(range, sink)
        {
            self.record_source_error(&e, "load");
        }

        let mut reply = Reply::new(refid, ReplyKind::Loaded);
        reply.start = Some(self.clock.to_domain(range.start));
        reply.end = Some(self.clock.to_domain(range.end));
        reply
    }

    fn extent(&mut self, refid: Value) -> Reply {
        let bounds = self
            .source
            .first_timestamp(&self.filter)
            .and_then(|first| Ok((first, self.source.last_timestamp(&self.filter)?)));

        let reply = Reply::new(refid, ReplyKind::ExtentTime);
        match bounds {
            Ok((first_ts, last_ts)) => Reply {
                extent: Some(Extent { first_ts, last_ts }),
                ..reply
            },
            Err(e) => {
                self.record_source_error(&e, "extentTime");
                reply.with_error(e.to_string())
            }
        }
    }

    fn filter_reply(&self, refid: Value) -> Reply {
        let mut reply = Reply::new(refid, ReplyKind::CurrentNodeFilter);
        reply.filter_in = Some(self.filter.include().to_vec());
        reply.filter_ex = Some(self.filter.exclude().to_vec());
        reply
    }

    fn unknown_reply(refid: Value, kind: &str) -> Reply {
        let error = format!("Unknown Message: {kind}");
        tracing::warn!(%error, "Unknown command");
        Reply::new(refid, ReplyKind::Unknown).with_error(error)
    }

    // ===== Helpers =====

    fn flush(&mut self, range: TimeRange, sink: &mut impl MessageSink) -> Result<usize, SourceError> {
        let time_factor = self.clock.time_factor();
        let records = self.source.read_range(range, time_factor, &self.filter)?;
        let sent = self.emitter.emit(records, time_factor, sink);
        self.stats.records_emitted += sent as u64;

        tracing::debug!(
            session_id = %self.id,
            from = time_factor.to_domain(range.start),
            to = time_factor.to_domain(range.end),
            records = sent,
            "Flushed range"
        );
        Ok(sent)
    }

    fn record_source_error(&mut self, error: &SourceError, during: &'static str) {
        self.stats.source_errors += 1;
        tracing::warn!(
            session_id = %self.id,
            data_set = %self.settings.data_set,
            during,
            error = %error,
            "Time-series source failed"
        );
    }
}

impl<S: TimeSeriesSource> Drop for PlaybackSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: TimeSeriesSource> std::fmt::Debug for PlaybackSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("data_set", &self.settings.data_set)
            .field("current_tick", &self.current_tick)
            .field("time_factor", &self.clock.time_factor())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::application::ports::{InMemorySource, MockTimeSeriesSource};
    use crate::domain::protocol::decode;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hourly() -> SessionSettings {
        SessionSettings::new("test", TimeFactor::HOUR, "hour")
    }

    fn stocks() -> InMemorySource {
        InMemorySource::new()
            .with("AAPL", 3600, [("open", 1.0)])
            .with("MSFT", 7200, [("open", 2.0)])
            .with("AAPL", 7200, [("open", 3.0)])
            .with("AAPL", 10_800, [("open", 4.0)])
            .with("MSFT", 36_000, [("open", 5.0)])
    }

    fn open_session<S: TimeSeriesSource>(
        settings: SessionSettings,
        source: S,
    ) -> (PlaybackSession<S>, Arc<ReconnectContinuity>, Vec<ServerMessage>) {
        let continuity = Arc::new(ReconnectContinuity::new());
        let mut session = PlaybackSession::new(settings, source, Arc::clone(&continuity));
        let mut sink = Vec::new();
        session.open_at(at(1_700_000_000), &mut sink);
        (session, continuity, sink)
    }

    fn send(session: &mut PlaybackSession<impl TimeSeriesSource>, text: &str) -> (Reply, Vec<ServerMessage>) {
        let mut sink = Vec::new();
        let envelope = decode(text).unwrap().unwrap();
        session.handle(envelope, &mut sink).unwrap();
        let Some(ServerMessage::Reply(reply)) = sink.pop() else {
            panic!("last message must be the reply");
        };
        (reply, sink)
    }

    fn bulk_ticks(messages: &[ServerMessage], time_factor: TimeFactor) -> Vec<i64> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Bulk(bulk) => Some(bulk.iter().map(|r| time_factor.to_tick(r.ts))),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn failing_source() -> MockTimeSeriesSource {
        let mut source = MockTimeSeriesSource::new();
        source.expect_first_timestamp().returning(|_| Ok(Some(3600)));
        source
            .expect_last_timestamp()
            .returning(|_| Err(SourceError::Unavailable("disk gone".to_string())));
        source
            .expect_read_range()
            .returning(|_, _, _| Err(SourceError::Query("locked".to_string())));
        source.expect_read_constant_data().returning(|| Ok(Vec::new()));
        source.expect_close().return_const(());
        source
    }

    // ===== Open =====

    #[test]
    fn open_starts_at_first_timestamp() {
        let (session, _, sink) = open_session(hourly(), stocks());

        assert_eq!(session.current_tick(), 1);
        assert_eq!(session.phase(), SessionPhase::Streaming);
        assert_eq!(
            serde_json::to_value(&sink[0]).unwrap(),
            json!({"internal": "startTime", "startTime": 3600, "timeUnit": "s", "step": 3600, "stepUnit": "hour"})
        );
        assert_eq!(sink.last(), Some(&ServerMessage::Control(ControlMessage::ConstantsSent)));
    }

    #[test]
    fn open_sends_constants_before_marker() {
        let source = stocks().with_constant(
            crate::domain::series::Record::new("AAPL", 0).with_attribute("sector", Some(1.0)),
        );
        let (_, _, sink) = open_session(hourly(), source);

        assert_eq!(sink.len(), 4);
        assert!(matches!(&sink[1], ServerMessage::Bulk(b) if b.len() == 1));
        assert_eq!(sink[2], ServerMessage::Control(ControlMessage::DataBulkSent { from: 0, to: 0 }));
        assert_eq!(sink[3], ServerMessage::Control(ControlMessage::ConstantsSent));
    }

    #[test]
    fn on_demand_session_opens_paused() {
        let settings = SessionSettings {
            stream_on_open: false,
            ..hourly()
        };
        let (mut session, _, _) = open_session(settings, stocks());

        assert_eq!(session.phase(), SessionPhase::Paused);
        assert_eq!(session.on_tick(&mut Vec::new()), TickOutcome::Idle);
    }

    #[test]
    fn empty_store_starts_at_zero() {
        let (session, _, _) = open_session(hourly(), InMemorySource::new());
        assert_eq!(session.current_tick(), 0);
    }

    #[test]
    fn reconnect_fast_forwards_by_elapsed_ticks() {
        let continuity = Arc::new(ReconnectContinuity::new());
        let closed_at = at(1_700_000_000);
        continuity.record(ContinuitySnapshot {
            last_tick: 100,
            last_time_factor: TimeFactor::new(60).unwrap(),
            closed_at,
        });

        let mut session = PlaybackSession::new(hourly(), stocks(), continuity);
        let mut sink = Vec::new();
        session.open_at(closed_at + ChronoDuration::seconds(300), &mut sink);

        assert_eq!(session.current_tick(), 105);
        assert_eq!(session.time_factor().seconds(), 60);
        assert!(matches!(
            sink[0],
            ServerMessage::Control(ControlMessage::StartTime { start_time: 6300, .. })
        ));
    }

    // ===== Ticks =====

    #[test]
    fn tick_delivers_one_tick_and_advances() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let mut sink = Vec::new();

        assert_eq!(session.on_tick(&mut sink), TickOutcome::Delivered { records: 1 });
        assert_eq!(session.current_tick(), 2);
        assert_eq!(session.on_tick(&mut sink), TickOutcome::Delivered { records: 2 });
        assert_eq!(session.on_tick(&mut sink), TickOutcome::Delivered { records: 1 });
        assert_eq!(session.on_tick(&mut sink), TickOutcome::Delivered { records: 0 });

        assert_eq!(bulk_ticks(&sink, TimeFactor::HOUR), vec![1, 2, 2, 3]);
        assert_eq!(session.current_tick(), 5);
        assert_eq!(session.stats().ticks, 4);
    }

    #[test]
    fn failed_tick_does_not_advance() {
        let (mut session, _, _) = open_session(hourly(), failing_source());
        let mut sink = Vec::new();

        assert_eq!(session.on_tick(&mut sink), TickOutcome::Failed);
        assert_eq!(session.current_tick(), 1);
        assert!(sink.is_empty());
        assert_eq!(session.stats().source_errors, 1);
    }

    // ===== Commands =====

    #[test]
    fn jump_to_sets_tick() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, extra) = send(&mut session, r#"{"type":"jumpTo","time":7200,"refid":"j"}"#);

        assert_eq!(session.current_tick(), 2);
        assert!(extra.is_empty());
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"refid": "j", "internal": "jumpedTo", "currentTime": 2})
        );
    }

    #[test]
    fn jump_to_with_bulk_till_backfills() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, extra) = send(&mut session, r#"{"type":"jumpTo","time":3600,"bulkTill":14400}"#);

        assert_eq!(bulk_ticks(&extra, TimeFactor::HOUR), vec![1, 2, 2, 3]);
        assert_eq!(session.current_tick(), 4);
        assert_eq!(reply.current_time, Some(4));
    }

    #[test]
    fn jump_to_with_earlier_bulk_till_only_seeks() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, extra) = send(&mut session, r#"{"type":"jumpTo","time":10800,"bulkTill":3600}"#);

        assert!(extra.is_empty());
        assert_eq!(reply.current_time, Some(3));
    }

    #[test]
    fn load_flushes_without_moving_tick() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, extra) = send(&mut session, r#"{"type":"load","start":0,"end":10800}"#);

        assert_eq!(bulk_ticks(&extra, TimeFactor::HOUR), vec![1, 2, 2]);
        assert_eq!(session.current_tick(), 1);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"refid": "", "internal": "loaded", "start": 0, "end": 10800})
        );
    }

    #[test]
    fn load_with_empty_range_sends_only_reply() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, extra) = send(&mut session, r#"{"type":"load","start":7200,"end":7300}"#);

        assert!(extra.is_empty());
        assert_eq!((reply.start, reply.end), (Some(7200), Some(7200)));
    }

    #[test]
    fn stop_then_start_reports_previous_state() {
        let (mut session, _, _) = open_session(hourly(), stocks());

        let (reply, _) = send(&mut session, r#"{"type":"stopStream"}"#);
        assert_eq!(reply.previous, Some(true));
        assert_eq!(session.phase(), SessionPhase::Paused);

        let (reply, _) = send(&mut session, r#"{"type":"stopStream"}"#);
        assert_eq!(reply.previous, Some(false));

        let (reply, _) = send(&mut session, r#"{"type":"startStream","time":36000}"#);
        assert_eq!(reply.internal, ReplyKind::StartedStream);
        assert_eq!(reply.previous, Some(false));
        assert_eq!(reply.current_time, Some(10));
        assert_eq!(session.phase(), SessionPhase::Streaming);
    }

    #[test]
    fn speedup_keeps_current_tick() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, _) = send(&mut session, r#"{"type":"speedup","factor":60}"#);

        assert_eq!(reply.time_factor.map(TimeFactor::seconds), Some(60));
        assert_eq!(session.current_tick(), 1);
        assert_eq!(session.time_factor().seconds(), 60);
    }

    #[test]
    fn node_filter_round_trip_and_extent() {
        let (mut session, _, _) = open_session(hourly(), stocks());

        let (reply, _) = send(&mut session, r#"{"type":"setNodeFilter","filter_in":["AAPL"]}"#);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"refid": "", "internal": "currentNodeFilter", "filter_in": ["AAPL"], "filter_ex": []})
        );

        let (reply, _) = send(&mut session, r#"{"type":"getNodeFilter"}"#);
        assert_eq!(reply.filter_in, Some(vec!["AAPL".to_string()]));

        let (reply, _) = send(&mut session, r#"{"type":"extentTime"}"#);
        assert_eq!(
            reply.extent,
            Some(Extent {
                first_ts: Some(3600),
                last_ts: Some(10_800)
            })
        );
    }

    #[test]
    fn unknown_command_keeps_session_responsive() {
        let (mut session, _, _) = open_session(hourly(), stocks());

        let (reply, _) = send(&mut session, r#"{"type":"frobnicate"}"#);
        assert_eq!(reply.internal, ReplyKind::Unknown);
        assert_eq!(reply.error.as_deref(), Some("Unknown Message: frobnicate"));

        let (reply, _) = send(&mut session, r#"{"type":"getNodeFilter"}"#);
        assert_eq!(reply.internal, ReplyKind::CurrentNodeFilter);
    }

    #[test]
    fn broadcast_without_broadcaster_is_unknown() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, _) = send(&mut session, r#"{"type":"broadcast","x":1}"#);

        assert_eq!(reply.internal, ReplyKind::Unknown);
        assert_eq!(reply.error.as_deref(), Some("Unknown Message: broadcast"));
    }

    #[test]
    fn malformed_command_changes_nothing() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        let (reply, extra) = send(&mut session, r#"{"type":"load","start":0,"refid":9}"#);

        assert!(extra.is_empty());
        assert_eq!(reply.refid, json!(9));
        assert_eq!(reply.internal, ReplyKind::Loaded);
        assert!(reply.error.is_some());
        assert_eq!(session.current_tick(), 1);

        let (reply, _) = send(&mut session, r#"{"type":"speedup","factor":-5}"#);
        assert_eq!(reply.internal, ReplyKind::SpeededUp);
        assert!(reply.error.is_some());
        assert_eq!(session.time_factor(), TimeFactor::HOUR);
    }

    #[test]
    fn source_failure_still_replies() {
        let (mut session, _, _) = open_session(hourly(), failing_source());

        let (reply, extra) = send(&mut session, r#"{"type":"load","start":0,"end":10800}"#);
        assert!(extra.is_empty());
        assert_eq!(reply.internal, ReplyKind::Loaded);

        let (reply, _) = send(&mut session, r#"{"type":"jumpTo","time":0,"bulkTill":36000}"#);
        assert_eq!(reply.current_time, Some(0));

        let (reply, _) = send(&mut session, r#"{"type":"extentTime"}"#);
        assert_eq!(reply.internal, ReplyKind::ExtentTime);
        assert!(reply.extent.is_none());
        assert!(reply.error.unwrap().contains("disk gone"));
        assert_eq!(session.stats().source_errors, 3);
    }

    // ===== Close =====

    #[test]
    fn close_twice_writes_continuity_once() {
        let (mut session, continuity, _) = open_session(hourly(), stocks());
        session.on_tick(&mut Vec::new());

        assert!(session.close_at(at(1_700_000_100)));
        assert!(!session.close_at(at(1_700_000_200)));
        drop(session);

        assert_eq!(continuity.write_count(), 1);
        let snapshot = continuity.snapshot().unwrap();
        assert_eq!(snapshot.last_tick, 2);
        assert_eq!(snapshot.closed_at, at(1_700_000_100));
    }

    #[test]
    fn drop_closes_source_and_records_continuity() {
        let (session, continuity, _) = open_session(hourly(), stocks());
        drop(session);

        assert_eq!(continuity.write_count(), 1);
        assert_eq!(continuity.snapshot().map(|s| s.last_tick), Some(1));
    }

    #[test]
    fn cold_session_leaves_continuity_alone() {
        let continuity = Arc::new(ReconnectContinuity::new());
        let mut source = MockTimeSeriesSource::new();
        source.expect_close().times(1).return_const(());

        let session = PlaybackSession::new(hourly(), source, Arc::clone(&continuity));
        drop(session);

        assert_eq!(continuity.write_count(), 0);
    }

    #[test]
    fn closed_session_ignores_commands_and_ticks() {
        let (mut session, _, _) = open_session(hourly(), stocks());
        session.close();

        let mut sink = Vec::new();
        let envelope = decode(r#"{"type":"getNodeFilter"}"#).unwrap().unwrap();
        assert_eq!(session.handle(envelope, &mut sink), None);
        assert_eq!(session.on_tick(&mut sink), TickOutcome::Idle);
        assert!(sink.is_empty());
        assert_eq!(session.phase(), SessionPhase::Closed);
    }
}
