//! Wire envelope.
//!
//! Every frame exchanged with the server is a JSON object with four fields:
//!
//! ```text
//! { "topic": <string>, "event": <string>, "payload": <object|null>, "ref": <string|null> }
//! ```
//!
//! Replies nest `{ "status": "ok"|"error", "response": { "reason": ..., ... } }`
//! under `payload`. `status` and `reason` are pulled out on decode when they
//! are present as strings; their absence simply means the frame is not a reply.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::DecodeError;

/// Classification of a reply's `status` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    /// `"ok"`
    Ok,
    /// `"error"`
    Error,
    /// Any other status string (`"timeout"` from some servers).
    Other(String),
}

impl ReplyStatus {
    /// Parse a status string.
    pub fn parse(status: &str) -> Self {
        match status {
            "ok" => Self::Ok,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol envelope. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    topic: String,
    event: String,
    payload: Option<Value>,
    reference: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    topic: &'a str,
    event: &'a str,
    payload: &'a Option<Value>,
    #[serde(rename = "ref")]
    reference: &'a Option<String>,
}

impl Message {
    /// Build an outbound envelope with no payload and no ref.
    pub fn new(topic: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload: None,
            reference: None,
            status: None,
            reason: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach a correlation ref.
    #[must_use]
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Topic the envelope belongs to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Event name.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Correlation ref, if any.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Reply status string (`payload.status`), if present.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Error reason (`payload.response.reason`), if present.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Parsed reply status.
    pub fn reply_status(&self) -> Option<ReplyStatus> {
        self.status.as_deref().map(ReplyStatus::parse)
    }

    /// `payload.response`, if present.
    pub fn response(&self) -> Option<&Value> {
        self.payload.as_ref().and_then(|p| p.get("response"))
    }

    /// Serialize to wire text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireEnvelope {
            topic: &self.topic,
            event: &self.event,
            payload: &self.payload,
            reference: &self.reference,
        })
    }

    /// Decode a frame received from the server.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut obj) = value else {
            return Err(DecodeError::Json("envelope is not a JSON object".into()));
        };

        let topic = take_string(&mut obj, "topic").ok_or(DecodeError::MissingField("topic"))?;
        let event = take_string(&mut obj, "event").ok_or(DecodeError::MissingField("event"))?;
        let reference = take_string(&mut obj, "ref");
        let payload = obj.remove("payload").filter(|p| !p.is_null());

        let status = payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(Value::as_str)
            .map(String::from);
        let reason = payload
            .as_ref()
            .and_then(|p| p.get("response"))
            .and_then(|r| r.get("reason"))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Self {
            topic,
            event,
            payload,
            reference,
            status,
            reason,
        })
    }
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> Option<String> {
    match obj.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}
