//! Signaling wire vocabulary
//!
//! Every WebSocket text frame is a JSON envelope:
//! `{"event": "<name>", "data": { ... }}`
//!
//! Negotiation payloads (`data` of a `signal`) are carried as opaque JSON
//! and never inspected.

use super::SignalingError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Negotiation message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// A negotiation message as sent by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Participant -> server events
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    StartStream {
        #[serde(rename = "streamId")]
        stream_id: String,
        streamer: String,
    },
    EndStream {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    JoinStream {
        #[serde(rename = "streamId")]
        stream_id: String,
        viewer: String,
    },
    LeaveStream {
        #[serde(rename = "streamId")]
        stream_id: String,
        viewer: String,
    },
    Signal(SignalMessage),
}

impl ClientEvent {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text.trim())
            .map_err(|e| SignalingError::InvalidEvent(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StartStream { .. } => "start-stream",
            ClientEvent::EndStream { .. } => "end-stream",
            ClientEvent::JoinStream { .. } => "join-stream",
            ClientEvent::LeaveStream { .. } => "leave-stream",
            ClientEvent::Signal(_) => "signal",
        }
    }
}

/// Best-effort extraction of the event name from a frame that failed to parse
pub fn raw_event_name(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("event")?.as_str().map(|s| s.to_string())
}

/// Server -> participant events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    StreamStarted {
        #[serde(rename = "streamId")]
        stream_id: String,
        streamer: String,
    },
    StreamEnded {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    ViewerJoined {
        #[serde(rename = "streamId")]
        stream_id: String,
        viewer: String,
    },
    ViewerLeft {
        #[serde(rename = "streamId")]
        stream_id: String,
        viewer: String,
    },
    Offer {
        from: String,
        offer: Value,
    },
    Answer {
        from: String,
        answer: Value,
    },
    IceCandidate {
        from: String,
        candidate: Value,
    },
    Error {
        code: String,
        message: String,
        event: Option<String>,
    },
}

impl ServerEvent {
    /// Re-wrap a signal for delivery: `{from, <key>: data}` under the
    /// event named after its kind
    pub fn relay(message: &SignalMessage) -> Self {
        let from = message.from.clone();
        let data = message.data.clone();
        match message.kind {
            SignalKind::Offer => ServerEvent::Offer { from, offer: data },
            SignalKind::Answer => ServerEvent::Answer { from, answer: data },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                from,
                candidate: data,
            },
        }
    }

    pub fn error(err: &SignalingError, event: Option<String>) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            event,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::InvalidEvent(format!("Failed to serialize event: {}", e)))
    }
}
