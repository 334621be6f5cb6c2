//! Shared message model and JSON codec for the broker's WS transport.
//!
//! This crate owns the wire representation used by both `server` and
//! `client-rpc`. Payloads stay flexible (`serde_json::Value`); every message
//! travels as one JSON text frame.
//!
//! WIRE SHAPE
//! ==========
//! `{"id", "requestId"?, "type": 0|1|2, "target", "method"?, "payload", "ts"}`
//!
//! - Responses correlate to requests via `requestId`.
//! - `type` is a closed enumeration. Unknown values are a distinct decode
//!   error so endpoints can tell "newer peer" apart from "garbage".

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Payload key carrying the human-readable error message.
pub const PAYLOAD_ERROR: &str = "error";

/// Payload key carrying the grepable error code.
pub const PAYLOAD_CODE: &str = "code";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode_message`] and [`encode_message`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not have the message shape.
    #[error("malformed message frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` integer on the wire does not map to a known [`Kind`].
    #[error("unknown message kind: {0}")]
    UnknownKind(i64),
}

// =============================================================================
// TYPES
// =============================================================================

/// What a message is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A call issued by a client, answered by exactly one `Response`.
    Request,
    /// The answer to a `Request`, correlated through `request_id`.
    Response,
    /// Unsolicited notification.
    Event,
}

impl Kind {
    /// Wire integer for this kind.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::Event => 2,
        }
    }

    /// Parse a kind from its wire integer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownKind`] for values outside the enumeration.
    pub fn from_i64(value: i64) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Event),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// A single message on the broker wire protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique identifier for this message (UUID string).
    pub id: String,
    /// ID of the request this message answers. Responses only.
    pub request_id: Option<String>,
    /// Lifecycle role of the message.
    pub kind: Kind,
    /// Module name the message concerns.
    pub target: String,
    /// Method name. Requests only.
    pub method: Option<String>,
    /// Arbitrary JSON payload, `null` when absent.
    pub payload: Value,
    /// Milliseconds since the Unix epoch when the message was sent.
    pub ts: i64,
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Message {
    /// Create a request with a fresh correlation id.
    #[must_use]
    pub fn request(target: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: None,
            kind: Kind::Request,
            target: target.into(),
            method: Some(method.into()),
            payload,
            ts: now_ms(),
        }
    }

    /// Create an unsolicited event.
    #[must_use]
    pub fn event(target: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: None,
            kind: Kind::Event,
            target: target.into(),
            method: None,
            payload,
            ts: now_ms(),
        }
    }

    /// Build the response to this message. Inherits `target`.
    #[must_use]
    pub fn response(&self, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: Some(self.id.clone()),
            kind: Kind::Response,
            target: self.target.clone(),
            method: None,
            payload,
            ts: now_ms(),
        }
    }

    /// Replace the send timestamp (epoch milliseconds).
    #[must_use]
    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }

    /// Method name, or `""` when the message carries none.
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a message as one JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the payload cannot be serialized.
pub fn encode_message(message: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&WireOut::from(message))?)
}

/// Decode one JSON text frame into a message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed frames and
/// [`CodecError::UnknownKind`] for out-of-range `type` values.
pub fn decode_message(text: &str) -> Result<Message, CodecError> {
    let wire: WireIn = serde_json::from_str(text)?;
    Ok(Message {
        id: wire.id,
        request_id: wire.request_id,
        kind: Kind::from_i64(wire.kind)?,
        target: wire.target,
        method: wire.method,
        payload: wire.payload,
        ts: wire.ts,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: i64,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    payload: &'a Value,
    ts: i64,
}

impl<'a> From<&'a Message> for WireOut<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            id: &message.id,
            request_id: message.request_id.as_deref(),
            kind: message.kind.as_i64(),
            target: &message.target,
            method: message.method.as_deref(),
            payload: &message.payload,
            ts: message.ts,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn {
    id: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(rename = "type")]
    kind: i64,
    target: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    ts: i64,
}

// =============================================================================
// ERROR PAYLOADS
// =============================================================================

/// Grepable error code for errors that end up in a response payload.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

/// Build the uniform error payload `{"error": message, "code": code}`.
#[must_use]
pub fn error_payload(err: &(impl ErrorCode + ?Sized)) -> Value {
    let mut data = Map::new();
    data.insert(PAYLOAD_ERROR.into(), Value::String(err.to_string()));
    data.insert(PAYLOAD_CODE.into(), Value::String(err.error_code().to_owned()));
    Value::Object(data)
}

/// An error reported by the broker inside a response payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    /// Recognise the uniform error payload. Returns `None` for anything else.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let obj = payload.as_object()?;
        let message = obj.get(PAYLOAD_ERROR)?.as_str()?;
        let code = obj.get(PAYLOAD_CODE)?.as_str()?;
        Some(Self { code: code.to_owned(), message: message.to_owned() })
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
