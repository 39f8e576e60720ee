//! Frame types and the JSON codec.
//!
//! Every message on the wire is a JSON object discriminated by `kind`.
//!
//! Request:
//! ```json
//! { "kind": "request", "id": "uuid", "method": "echo", "params": { "value": 42 } }
//! ```
//!
//! Response:
//! ```json
//! { "kind": "response", "id": "uuid", "ok": true, "payload": { "value": 42 } }
//! { "kind": "response", "id": "uuid", "ok": false, "error": { "code": "NOT_FOUND", "message": "..." } }
//! ```
//!
//! Event:
//! ```json
//! { "kind": "event", "event": "tick", "payload": { "ts": 1700000000000 }, "seq": 12 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::now_millis;

// ============================================================================
// Codec
// ============================================================================

/// Parses one raw wire message into a [`Frame`].
///
/// # Errors
///
/// Returns [`Error::InvalidFrame`] for malformed JSON, an unknown `kind`,
/// or a request/response without an `id`.
pub fn parse(raw: &str) -> Result<Frame> {
    let frame: Frame = serde_json::from_str(raw)?;

    match &frame {
        Frame::Request(Request { id, .. }) | Frame::Response(Response { id, .. })
            if id.as_str().is_empty() =>
        {
            Err(Error::invalid_frame("empty frame id"))
        }
        Frame::Event(event) if event.event.is_empty() => {
            Err(Error::invalid_frame("event frame without a name"))
        }
        _ => Ok(frame),
    }
}

/// Serializes a [`Frame`] into its wire form.
///
/// # Errors
///
/// Returns [`Error::InvalidFrame`] if a payload cannot be serialized.
pub fn serialize(frame: &Frame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

// ============================================================================
// Frame
// ============================================================================

/// One structured unit exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    /// Method call from the client.
    Request(Request),
    /// Outcome of a request.
    Response(Response),
    /// Unsolicited notification.
    Event(Event),
}

impl Frame {
    /// Returns the correlation id, absent on events.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Response(response) => Some(&response.id),
            Self::Event(_) => None,
        }
    }

    /// Returns the frame discriminator as written on the wire.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Event(_) => "event",
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// A method call from the client to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Method name, e.g. `health` or `chat.send`.
    pub method: String,

    /// Method parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,

    /// Send time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Request {
    /// Creates a new request with an auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a new request with a specific ID, stamped with the current time.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            timestamp: Some(now_millis()),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// The gateway's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Outcome flag. When absent, the outcome is inferred from `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,

    /// Result data on success.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    /// Error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,

    /// Send time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, payload: Value) -> Self {
        Self {
            id,
            ok: Some(true),
            payload,
            error: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn failure(id: RequestId, error: ErrorShape) -> Self {
        Self {
            id,
            ok: Some(false),
            payload: Value::Null,
            error: Some(error),
            timestamp: Some(now_millis()),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.ok.unwrap_or(self.error.is_none())
    }

    /// Extracts the payload, returning the gateway's error on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestFailed`] if the response reports a failure.
    pub fn into_result(self) -> Result<Value> {
        if self.is_ok() {
            return Ok(self.payload);
        }

        Err(self.error.map_or_else(
            || Error::request_failed("UNKNOWN", "request failed without error details"),
            ErrorShape::into_error,
        ))
    }
}

// ============================================================================
// ErrorShape
// ============================================================================

/// Error body of a failed [`Response`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    /// Machine readable code.
    pub code: String,

    /// Human readable message.
    #[serde(default)]
    pub message: String,

    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Whether retrying may succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,

    /// Suggested retry delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorShape {
    /// Creates an error body with a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
            retry_after_ms: None,
        }
    }

    /// Converts the wire error into a [`Error::RequestFailed`].
    #[must_use]
    pub fn into_error(self) -> Error {
        let message = if self.message.is_empty() {
            self.code.clone()
        } else {
            self.message
        };

        Error::RequestFailed {
            code: self.code,
            message,
            details: self.details,
            retryable: self.retryable.unwrap_or(false),
            retry_after_ms: self.retry_after_ms,
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// An unsolicited notification from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `tick` or `chat.delta`.
    pub event: String,

    /// Event-specific data.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    /// Gateway sequence number, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Send time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Returns the namespace of the event name.
    ///
    /// `"chat.delta"` has namespace `"chat"`; a name without a dot is its
    /// own namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.event.split('.').next().unwrap_or_default()
    }

    /// Deserializes the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.payload)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::with_id(RequestId::new("r1"), "echo", json!({"value": 42}));
        let json = serialize(&Frame::Request(request)).expect("serialize");

        assert!(json.contains(r#""kind":"request""#));
        assert!(json.contains(r#""id":"r1""#));
        assert!(json.contains(r#""method":"echo""#));
        assert!(json.contains(r#""value":42"#));
    }

    #[test]
    fn test_parse_success_response() {
        let frame = parse(r#"{"kind":"response","id":"abc","ok":true,"payload":{"value":42}}"#)
            .expect("parse");

        let Frame::Response(response) = frame else {
            panic!("expected response");
        };
        assert_eq!(response.id, RequestId::new("abc"));
        assert!(response.is_ok());
        assert_eq!(response.into_result().expect("ok"), json!({"value": 42}));
    }

    #[test]
    fn test_parse_error_response() {
        let frame = parse(
            r#"{"kind":"response","id":"abc","ok":false,
                "error":{"code":"RATE_LIMITED","message":"slow down","retryable":true,"retryAfterMs":250}}"#,
        )
        .expect("parse");

        let Frame::Response(response) = frame else {
            panic!("expected response");
        };
        assert!(!response.is_ok());

        let err = response.into_result().expect_err("should fail");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after().map(|d| d.as_millis()), Some(250));
        assert_eq!(err.to_string(), "Request failed (RATE_LIMITED): slow down");
    }

    #[test]
    fn test_ok_flag_inferred_from_error() {
        let success = parse(r#"{"kind":"response","id":"a","payload":1}"#).expect("parse");
        let failure = parse(r#"{"kind":"response","id":"b","error":{"code":"X"}}"#).expect("parse");

        assert!(matches!(success, Frame::Response(ref r) if r.is_ok()));
        assert!(matches!(failure, Frame::Response(ref r) if !r.is_ok()));
    }

    #[test]
    fn test_failure_without_details() {
        let response = Response {
            id: RequestId::new("a"),
            ok: Some(false),
            payload: Value::Null,
            error: None,
            timestamp: None,
        };
        let err = response.into_result().expect_err("should fail");
        assert!(matches!(err, Error::RequestFailed { ref code, .. } if code == "UNKNOWN"));
    }

    #[test]
    fn test_parse_event() {
        let frame = parse(r#"{"kind":"event","event":"chat.delta","payload":{"text":"hi"},"seq":3}"#)
            .expect("parse");

        assert_eq!(frame.id(), None);
        assert_eq!(frame.kind(), "event");
        let Frame::Event(event) = frame else {
            panic!("expected event");
        };
        assert_eq!(event.namespace(), "chat");
        assert_eq!(event.seq, Some(3));

        #[derive(Deserialize)]
        struct Delta {
            text: String,
        }
        let delta: Delta = event.payload_as().expect("typed payload");
        assert_eq!(delta.text, "hi");
    }

    #[test]
    fn test_malformed_frames_are_invalid() {
        let cases = [
            "not json",
            r#"{"kind":"telepathy","id":"x"}"#,
            r#"{"kind":"response","ok":true}"#,
            r#"{"kind":"request","id":"","method":"m"}"#,
            r#"{"kind":"event","event":""}"#,
            r#"{"id":"x","ok":true}"#,
        ];

        for raw in cases {
            let err = parse(raw).expect_err(raw);
            assert!(matches!(err, Error::InvalidFrame { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn test_null_fields_are_omitted() {
        let event = Event {
            event: "tick".into(),
            payload: Value::Null,
            seq: None,
            timestamp: None,
        };
        let json = serialize(&Frame::Event(event)).expect("serialize");
        assert_eq!(json, r#"{"kind":"event","event":"tick"}"#);
    }
}
