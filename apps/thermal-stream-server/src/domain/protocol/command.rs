//! Client Command Decoding
//!
//! Client frames are JSON objects `{type, refid?, ...}`. The `type` field is
//! inspected on a raw [`Value`] first, then the fields each command needs
//! are extracted. A known command with a missing or invalid field decodes to
//! [`Command::Malformed`] so the session can still reply with the command's
//! own kind.

use serde_json::{Map, Value};

use crate::domain::clock::{DomainTime, TimeFactor};
use crate::domain::protocol::ReplyKind;
use crate::domain::series::{Filter, SeriesKey};

// =============================================================================
// Errors
// =============================================================================

/// Frames that are not command objects at all.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame was not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was valid JSON but not an object.
    #[error("expected JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A known command whose fields could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Required field absent or `null`.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Field present with an unusable value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
}

// =============================================================================
// Commands
// =============================================================================

/// Decoded client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Seek, optionally backfilling up to `bulk_till`.
    JumpTo {
        /// Target domain time.
        time: DomainTime,
        /// Optional backfill bound in domain time.
        bulk_till: Option<DomainTime>,
    },
    /// Start periodic delivery, optionally seeking first.
    StartStream {
        /// Optional seek target in domain time.
        time: Option<DomainTime>,
    },
    /// Stop periodic delivery.
    StopStream,
    /// Deliver a range without moving the current tick.
    Load {
        /// Range start in domain time.
        start: DomainTime,
        /// Range end in domain time.
        end: DomainTime,
    },
    /// Replace the time factor.
    Speedup {
        /// New time factor.
        factor: TimeFactor,
    },
    /// Replace the key filter.
    SetNodeFilter {
        /// New filter.
        filter: Filter,
    },
    /// Report the key filter.
    GetNodeFilter,
    /// Report store bounds.
    ExtentTime,
    /// Relay to every session of the data set.
    Broadcast(Map<String, Value>),
    /// Unrecognised `type`.
    Unknown(String),
    /// Known command with unusable fields.
    Malformed {
        /// Kind the reply carries.
        kind: ReplyKind,
        /// What was wrong.
        error: CommandError,
    },
}

impl Command {
    /// Label used for metrics and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JumpTo { .. } => "jumpTo",
            Self::StartStream { .. } => "startStream",
            Self::StopStream => "stopStream",
            Self::Load { .. } => "load",
            Self::Speedup { .. } => "speedup",
            Self::SetNodeFilter { .. } => "setNodeFilter",
            Self::GetNodeFilter => "getNodeFilter",
            Self::ExtentTime => "extentTime",
            Self::Broadcast(_) => "broadcast",
            Self::Unknown(_) => "unknown",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// A command together with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Echoed in the reply; `""` when absent.
    pub refid: Value,
    /// The command.
    pub command: Command,
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one client text frame.
///
/// Returns `Ok(None)` for objects without a string `type`, which are ignored
/// without a reply.
///
/// # Errors
///
/// Returns `CodecError` if the frame is not a JSON object.
pub fn decode(text: &str) -> Result<Option<Envelope>, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(fields) = value else {
        return Err(CodecError::NotAnObject(json_kind(&value)));
    };

    let Some(kind) = fields.get("type").and_then(Value::as_str) else {
        return Ok(None);
    };

    let refid = match fields.get("refid") {
        None | Some(Value::Null) => Value::String(String::new()),
        Some(refid) => refid.clone(),
    };

    let command = match kind {
        "jumpTo" => decode_jump_to(&fields),
        "startStream" => decode_start_stream(&fields),
        "stopStream" => Ok(Command::StopStream),
        "load" => decode_load(&fields),
        "speedup" => decode_speedup(&fields),
        "setNodeFilter" => decode_set_node_filter(&fields),
        "getNodeFilter" => Ok(Command::GetNodeFilter),
        "extentTime" => Ok(Command::ExtentTime),
        "broadcast" => Ok(Command::Broadcast(fields.clone())),
        other => Ok(Command::Unknown(other.to_string())),
    }
    .unwrap_or_else(|(kind, error)| Command::Malformed { kind, error });

    Ok(Some(Envelope { refid, command }))
}

type Decoded = Result<Command, (ReplyKind, CommandError)>;

fn decode_jump_to(fields: &Map<String, Value>) -> Decoded {
    let tag = |e| (ReplyKind::JumpedTo, e);
    Ok(Command::JumpTo {
        time: required_time(fields, "time").map_err(tag)?,
        bulk_till: optional_time(fields, "bulkTill").map_err(tag)?,
    })
}

fn decode_start_stream(fields: &Map<String, Value>) -> Decoded {
    Ok(Command::StartStream {
        time: optional_time(fields, "time").map_err(|e| (ReplyKind::StartedStream, e))?,
    })
}

fn decode_load(fields: &Map<String, Value>) -> Decoded {
    let tag = |e| (ReplyKind::Loaded, e);
    Ok(Command::Load {
        start: required_time(fields, "start").map_err(tag)?,
        end: required_time(fields, "end").map_err(tag)?,
    })
}

fn decode_speedup(fields: &Map<String, Value>) -> Decoded {
    let tag = |e| (ReplyKind::SpeededUp, e);
    let raw = required_time(fields, "factor").map_err(tag)?;
    let factor = TimeFactor::new(raw).map_err(|e| {
        tag(CommandError::InvalidField {
            field: "factor",
            reason: e.to_string(),
        })
    })?;
    Ok(Command::Speedup { factor })
}

fn decode_set_node_filter(fields: &Map<String, Value>) -> Decoded {
    let tag = |e| (ReplyKind::CurrentNodeFilter, e);
    Ok(Command::SetNodeFilter {
        filter: Filter::new(
            key_list(fields, "filter_in").map_err(tag)?,
            key_list(fields, "filter_ex").map_err(tag)?,
        ),
    })
}

fn required_time(fields: &Map<String, Value>, field: &'static str) -> Result<DomainTime, CommandError> {
    optional_time(fields, field)?.ok_or(CommandError::MissingField(field))
}

/// Integers pass through, floats are floored and numeric strings are parsed.
fn optional_time(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<DomainTime>, CommandError> {
    let invalid = |reason: &str| CommandError::InvalidField {
        field,
        reason: reason.to_string(),
    };

    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(floor_to_i64))
            .map(Some)
            .ok_or_else(|| invalid("number out of range")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(floor_to_i64)
            .map(Some)
            .ok_or_else(|| invalid("not a number")),
        Some(other) => Err(invalid(&format!("expected number, got {}", json_kind(other)))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn floor_to_i64(value: f64) -> Option<i64> {
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    let floored = value.floor();
    (floored.is_finite() && floored.abs() <= LIMIT).then_some(floored as i64)
}

fn key_list(fields: &Map<String, Value>, field: &'static str) -> Result<Vec<SeriesKey>, CommandError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CommandError::InvalidField {
                        field,
                        reason: format!("expected string key, got {}", json_kind(item)),
                    })
            })
            .collect(),
        Some(other) => Err(CommandError::InvalidField {
            field,
            reason: format!("expected array, got {}", json_kind(other)),
        }),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Tests
// =============================================================================
