//! Wire format spoken with the coordinating backend.
//!
//! Every frame is a single text message. Requests and replies are JSON
//! envelopes correlated by `requestId`; the heartbeat is a bare literal
//! outside the envelope format.
//!
//! ```text
//! -> {"requestId":7,"action":"RESERVE","data":{"service":"ollama"}}
//! <- {"requestId":7,"success":true,"payload":{...}}
//! <- ping
//! -> pong
//! ```

use crate::config::ConnectionDefaults;
use crate::{MaestroError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback message when a failed reply carries no `error` text.
pub const UNKNOWN_REMOTE_ERROR: &str = "Unknown error from server";

/// Named remote operation carried in a request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Reserve,
    Release,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Reserve => "RESERVE",
            Action::Release => "RELEASE",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: u64,
    pub action: Action,
    pub data: Value,
}

impl RequestEnvelope {
    pub fn new(request_id: u64, action: Action, data: Value) -> Self {
        Self {
            request_id,
            action,
            data,
        }
    }

    /// Serialize to the text frame handed to the transport.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Incoming reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub request_id: u64,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyEnvelope {
    /// Create a success reply.
    pub fn success(request_id: u64, payload: Value) -> Self {
        Self {
            request_id,
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create a failure reply.
    pub fn failure(request_id: u64, error: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Split into the correlation id and the outcome to settle with.
    pub fn into_settlement(self) -> (u64, Settlement) {
        let settlement = if self.success {
            Settlement::Success(self.payload)
        } else {
            Settlement::Failure(self.error)
        };
        (self.request_id, settlement)
    }
}

/// Outcome reported by the backend for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// `success: true`, with the payload if one was sent.
    Success(Option<Value>),
    /// `success: false`, with the server's message if one was sent.
    Failure(Option<String>),
}

impl Settlement {
    /// Convert into what the waiting caller observes.
    pub fn into_result(self) -> Result<Option<Value>> {
        match self {
            Settlement::Success(payload) => Ok(payload),
            Settlement::Failure(message) => Err(MaestroError::Remote(
                message.unwrap_or_else(|| UNKNOWN_REMOTE_ERROR.to_string()),
            )),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Heartbeat,
    Reply(ReplyEnvelope),
}

/// Classify and decode one inbound text frame.
pub fn decode_inbound(frame: &str) -> Result<Inbound> {
    if frame == ConnectionDefaults::HEARTBEAT_PROBE {
        return Ok(Inbound::Heartbeat);
    }

    serde_json::from_str::<ReplyEnvelope>(frame)
        .map(Inbound::Reply)
        .map_err(|e| MaestroError::protocol(format!("undecodable reply frame: {}", e), Some(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_wire_shape() {
        let envelope = RequestEnvelope::new(3, Action::Release, json!({"assignmentId": "a1"}));
        let wire: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({"requestId": 3, "action": "RELEASE", "data": {"assignmentId": "a1"}})
        );
    }

    #[test]
    fn test_heartbeat_is_not_an_envelope() {
        assert_eq!(decode_inbound("ping").unwrap(), Inbound::Heartbeat);
        assert!(decode_inbound("\"ping\"").is_err());
    }

    #[test]
    fn test_decode_success_reply() {
        let frame = r#"{"requestId":1,"success":true,"payload":{"ok":true}}"#;
        match decode_inbound(frame).unwrap() {
            Inbound::Reply(reply) => {
                assert_eq!(reply.request_id, 1);
                let (_, settlement) = reply.into_settlement();
                assert_eq!(settlement, Settlement::Success(Some(json!({"ok": true}))));
            }
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_without_message_uses_fallback() {
        let frame = r#"{"requestId":2,"success":false}"#;
        let Inbound::Reply(reply) = decode_inbound(frame).unwrap() else {
            panic!("Expected reply");
        };
        let (_, settlement) = reply.into_settlement();
        match settlement.into_result() {
            Err(MaestroError::Remote(message)) => assert_eq!(message, UNKNOWN_REMOTE_ERROR),
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames_are_protocol_errors() {
        for frame in ["not json", r#"{"success":true}"#, r#"{"requestId":"x"}"#] {
            assert!(matches!(
                decode_inbound(frame),
                Err(MaestroError::Protocol { .. })
            ));
        }
    }
}
