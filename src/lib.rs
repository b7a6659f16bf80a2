//! livecast-core - signaling server for peer-to-peer live camera streams
//!
//! Tracks which participant is streaming and who is watching, relays
//! offer/answer/candidate messages between participants, and keeps a
//! history of finished streams.

pub mod args;
pub mod config;
pub mod history;
pub mod signaling;
pub mod transport;
pub mod web;

// Re-exports
pub use config::Config;
pub use history::{HistoryStore, VideoRecord};
pub use signaling::{ClientEvent, ServerEvent, SignalingError, SignalingHub};
pub use web::SharedState;
