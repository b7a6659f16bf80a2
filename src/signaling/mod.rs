//! Stream signaling and session coordination
//!
//! Tracks who is streaming and who is watching, and relays the
//! offer/answer/candidate exchange between participants:
//! - Connection registry (connection handle -> claimed identity)
//! - Stream registry (one active stream per id)
//! - Hub that routes inbound events and fans out lifecycle events

pub mod connections;
pub mod hub;
pub mod messages;
pub mod streams;

pub use connections::ConnectionRegistry;
pub use hub::{HubStats, SignalingHub};
pub use messages::{ClientEvent, ServerEvent, SignalKind, SignalMessage};
pub use streams::{Stream, StreamRegistry};

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use uuid::Uuid;

/// Transport-assigned handle for one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signaling errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Stream id is already active
    Conflict(String),
    /// Stream id is not active
    NotFound(String),
    /// Targeted signal names an identity with no live connection
    UnresolvedTarget(String),
    /// Inbound frame could not be decoded
    InvalidEvent(String),
}

impl SignalingError {
    /// Wire code sent back in an `error` event
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::Conflict(_) => "CONFLICT",
            SignalingError::NotFound(_) => "NOT_FOUND",
            SignalingError::UnresolvedTarget(_) => "UNRESOLVED_TARGET",
            SignalingError::InvalidEvent(_) => "INVALID_EVENT",
        }
    }

    /// Whether the originating connection should be told about this error.
    ///
    /// Relay misses are best-effort and never acknowledged.
    pub fn is_reported(&self) -> bool {
        !matches!(self, SignalingError::UnresolvedTarget(_))
    }
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::Conflict(id) => write!(f, "Stream already active: {}", id),
            SignalingError::NotFound(id) => write!(f, "Stream not active: {}", id),
            SignalingError::UnresolvedTarget(identity) => {
                write!(f, "No live connection for identity: {}", identity)
            }
            SignalingError::InvalidEvent(msg) => write!(f, "Invalid event: {}", msg),
        }
    }
}

impl Error for SignalingError {}
