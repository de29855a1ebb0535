//! JSON messages exchanged with control clients.
//!
//! Requests are validated field by field rather than through a derived
//! `Deserialize` so that every malformed request gets the same short,
//! stable error text regardless of what serde would have said about it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vigil_store::{Breakpoint, BreakpointId, Hit, HitId, NewBreakpoint};

use crate::error::{
    ProtocolError, INVALID_JSON, INVALID_TYPE, MALFORMED_CONDITION, MALFORMED_EXPRESSIONS,
    MALFORMED_ID, MALFORMED_LOCATION, MISSING_LOCATION,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Add(NewBreakpoint),
    Breakpoints,
    Hits { id: BreakpointId },
    Remove { id: BreakpointId },
}

impl ClientRequest {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::Validation(INVALID_JSON))?;

        match message.get("type").and_then(Value::as_str) {
            Some("add") => parse_add(&message).map(ClientRequest::Add),
            Some("breakpoints") => Ok(ClientRequest::Breakpoints),
            Some("hits") => parse_id(&message).map(|id| ClientRequest::Hits { id }),
            Some("remove") => parse_id(&message).map(|id| ClientRequest::Remove { id }),
            _ => Err(ProtocolError::Validation(INVALID_TYPE)),
        }
    }
}

fn parse_add(message: &Value) -> Result<NewBreakpoint, ProtocolError> {
    let (Some(file), Some(line)) = (message.get("file"), message.get("line")) else {
        return Err(ProtocolError::Validation(MISSING_LOCATION));
    };
    let file = file
        .as_str()
        .ok_or(ProtocolError::Validation(MALFORMED_LOCATION))?;
    let line = line
        .as_u64()
        .and_then(|line| u32::try_from(line).ok())
        .ok_or(ProtocolError::Validation(MALFORMED_LOCATION))?;

    let expressions = match message.get("expressions") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_owned))
            .collect::<Option<Vec<_>>>()
            .ok_or(ProtocolError::Validation(MALFORMED_EXPRESSIONS))?,
        Some(_) => return Err(ProtocolError::Validation(MALFORMED_EXPRESSIONS)),
    };

    let condition = match message.get("condition") {
        None | Some(Value::Null) => None,
        Some(Value::String(condition)) if condition.trim().is_empty() => None,
        Some(Value::String(condition)) => Some(condition.clone()),
        Some(_) => return Err(ProtocolError::Validation(MALFORMED_CONDITION)),
    };

    Ok(NewBreakpoint {
        file: file.to_owned(),
        line,
        condition,
        expressions,
    })
}

fn parse_id(message: &Value) -> Result<BreakpointId, ProtocolError> {
    message
        .get("id")
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::Validation(MALFORMED_ID))
}

/// Everything the server sends, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Add {
        breakpoint: BreakpointPayload,
    },
    Breakpoints {
        breakpoints: Vec<BreakpointPayload>,
    },
    Hits {
        #[serde(rename = "breakpointId")]
        breakpoint_id: BreakpointId,
        hits: Vec<HitPayload>,
    },
    Remove {
        id: BreakpointId,
    },
    /// Unsolicited; one per persisted batch.
    Hit {
        hits: Vec<HitEvent>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every payload is plain strings and integers, which always serialize.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        ServerMessage::error(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointPayload {
    pub id: BreakpointId,
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub expressions: Vec<String>,
    pub created_at: String,
}

impl From<&Breakpoint> for BreakpointPayload {
    fn from(bp: &Breakpoint) -> Self {
        Self {
            id: bp.id,
            file: bp.file.clone(),
            line: bp.line,
            condition: bp.condition.clone(),
            expressions: bp.expressions.clone(),
            created_at: format_timestamp(bp.created_at_ms),
        }
    }
}

/// A stored hit as returned by a `hits` request. `breakpoint_id` is `null`
/// once the breakpoint has been removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitPayload {
    pub id: HitId,
    pub breakpoint_id: Option<BreakpointId>,
    pub date: String,
    pub values: Vec<String>,
}

impl From<&Hit> for HitPayload {
    fn from(hit: &Hit) -> Self {
        Self {
            id: hit.id,
            breakpoint_id: hit.breakpoint_id,
            date: format_timestamp(hit.created_at_ms),
            values: hit.values.clone(),
        }
    }
}

/// A freshly persisted hit, as broadcast to every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitEvent {
    pub id: HitId,
    pub breakpoint_id: BreakpointId,
    pub values: Vec<String>,
}

/// RFC 3339 rendering of a Unix millisecond timestamp.
pub fn format_timestamp(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
