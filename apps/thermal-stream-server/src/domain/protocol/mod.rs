//! Socket Protocol Messages
//!
//! JSON shapes exchanged over the playback socket.
//!
//! Server to client:
//! - control objects tagged with `internal` (`startTime`, `constantsSent`,
//!   `dataBulkSent`)
//! - data bulks, sent as bare JSON arrays of wire records
//! - one reply per client command, `{refid, internal, ...}`
//! - relayed broadcast payloads
//!
//! Client to server messages are decoded in [`command`].

pub mod command;

use serde::Serialize;
use serde_json::Value;

use crate::domain::clock::{DomainTime, Tick, TimeFactor};
use crate::domain::series::{Record, SeriesKey};

pub use command::{CodecError, Command, CommandError, Envelope, decode};

// =============================================================================
// Server Messages
// =============================================================================

/// Any frame sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Session control notification.
    Control(ControlMessage),
    /// One chunk of records.
    Bulk(Vec<WireRecord>),
    /// Reply to a client command.
    Reply(Reply),
    /// Payload relayed by a data-set broadcaster.
    Broadcast(Value),
}

impl ServerMessage {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Control(ControlMessage::StartTime { .. }) => "start_time",
            Self::Control(ControlMessage::ConstantsSent) => "constants_sent",
            Self::Control(ControlMessage::DataBulkSent { .. }) => "data_bulk_sent",
            Self::Bulk(_) => "bulk",
            Self::Reply(_) => "reply",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

/// Control notifications tagged by `internal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "internal", rename_all = "camelCase")]
pub enum ControlMessage {
    /// First message of a session.
    StartTime {
        /// Start tick scaled back to domain seconds.
        #[serde(rename = "startTime")]
        start_time: DomainTime,
        /// Unit of `startTime`, always `s`.
        #[serde(rename = "timeUnit")]
        time_unit: &'static str,
        /// Seconds per tick.
        step: TimeFactor,
        /// Informational label for one step.
        #[serde(rename = "stepUnit")]
        step_unit: String,
    },
    /// Constant data has been sent.
    ConstantsSent,
    /// A bulk has been sent; bounds are ticks of its first and last record.
    DataBulkSent {
        /// Tick of the first record.
        from: Tick,
        /// Tick of the last record.
        to: Tick,
    },
}

/// A record as it appears inside a data bulk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireRecord {
    /// Series key.
    pub nip: SeriesKey,
    /// Tick scaled to domain seconds.
    pub ts: DomainTime,
    /// Attribute values.
    pub attrs: std::collections::BTreeMap<String, f64>,
}

impl WireRecord {
    /// Convert a record using the session's current time factor.
    #[must_use]
    pub fn from_record(record: Record, time_factor: TimeFactor) -> Self {
        Self {
            nip: record.key,
            ts: time_factor.to_domain(record.tick),
            attrs: record.attributes,
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Value of a reply's `internal` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplyKind {
    /// Reply to `jumpTo`.
    JumpedTo,
    /// Reply to `startStream`.
    StartedStream,
    /// Reply to `stopStream`.
    StoppedStream,
    /// Reply to `load`.
    Loaded,
    /// Reply to `speedup`.
    SpeededUp,
    /// Reply to `setNodeFilter` and `getNodeFilter`.
    CurrentNodeFilter,
    /// Reply to `extentTime`.
    ExtentTime,
    /// Reply to an unrecognised `type`.
    Unknown,
}

impl ReplyKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JumpedTo => "jumpedTo",
            Self::StartedStream => "startedStream",
            Self::StoppedStream => "stoppedStream",
            Self::Loaded => "loaded",
            Self::SpeededUp => "speededUp",
            Self::CurrentNodeFilter => "currentNodeFilter",
            Self::ExtentTime => "extentTime",
            Self::Unknown => "unknown",
        }
    }
}

/// Store bounds reported by `extentTime`. `None` serialises as `null` for an
/// empty store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent {
    /// Earliest timestamp in domain seconds.
    pub first_ts: Option<DomainTime>,
    /// Latest timestamp in domain seconds.
    pub last_ts: Option<DomainTime>,
}

/// Reply to a client command. Only the fields relevant to the kind are set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    /// Echo of the request's `refid` (default `""`).
    pub refid: Value,
    /// Reply kind.
    pub internal: ReplyKind,
    /// Current tick after the command.
    #[serde(rename = "currentTime", skip_serializing_if = "Option::is_none")]
    pub current_time: Option<Tick>,
    /// Whether streaming was running before the command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<bool>,
    /// Loaded range start in domain seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DomainTime>,
    /// Loaded range end in domain seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DomainTime>,
    /// Time factor after `speedup`.
    #[serde(rename = "timeFactor", skip_serializing_if = "Option::is_none")]
    pub time_factor: Option<TimeFactor>,
    /// Current include list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_in: Option<Vec<SeriesKey>>,
    /// Current exclude list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_ex: Option<Vec<SeriesKey>>,
    /// Store bounds.
    #[serde(flatten)]
    pub extent: Option<Extent>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    /// Create a reply with no optional fields.
    #[must_use]
    pub const fn new(refid: Value, internal: ReplyKind) -> Self {
        Self {
            refid,
            internal,
            current_time: None,
            previous: None,
            start: None,
            end: None,
            time_factor: None,
            filter_in: None,
            filter_ex: None,
            extent: None,
            error: None,
        }
    }

    /// Attach an error description.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn start_time_shape() {
        let msg = ServerMessage::Control(ControlMessage::StartTime {
            start_time: 7200,
            time_unit: "s",
            step: TimeFactor::HOUR,
            step_unit: "hour".to_string(),
        });

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"internal": "startTime", "startTime": 7200, "timeUnit": "s", "step": 3600, "stepUnit": "hour"})
        );
    }

    #[test]
    fn bulk_is_bare_array() {
        let record = Record::new("AAPL", 2).with_attribute("open", Some(1.5));
        let msg = ServerMessage::Bulk(vec![WireRecord::from_record(record, TimeFactor::HOUR)]);

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!([{"nip": "AAPL", "ts": 7200, "attrs": {"open": 1.5}}])
        );
    }

    #[test]
    fn control_markers() {
        assert_eq!(
            serde_json::to_value(ControlMessage::ConstantsSent).unwrap(),
            json!({"internal": "constantsSent"})
        );
        assert_eq!(
            serde_json::to_value(ControlMessage::DataBulkSent { from: 1, to: 4 }).unwrap(),
            json!({"internal": "dataBulkSent", "from": 1, "to": 4})
        );
    }

    #[test]
    fn reply_omits_unset_fields() {
        let mut reply = Reply::new(json!("r1"), ReplyKind::JumpedTo);
        reply.current_time = Some(2);

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"refid": "r1", "internal": "jumpedTo", "currentTime": 2})
        );
    }

    #[test]
    fn extent_is_flattened_with_nulls() {
        let mut reply = Reply::new(json!(""), ReplyKind::ExtentTime);
        reply.extent = Some(Extent {
            first_ts: Some(10),
            last_ts: None,
        });

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"refid": "", "internal": "extentTime", "first_ts": 10, "last_ts": null})
        );
    }

    #[test]
    fn reply_kind_wire_names_match_serde() {
        for kind in [
            ReplyKind::JumpedTo,
            ReplyKind::StartedStream,
            ReplyKind::StoppedStream,
            ReplyKind::Loaded,
            ReplyKind::SpeededUp,
            ReplyKind::CurrentNodeFilter,
            ReplyKind::ExtentTime,
            ReplyKind::Unknown,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }
}
