//! Transport layer for livecast-core
//!
//! Binds WebSocket connections to the signaling hub.

pub mod signaling_server;

pub use signaling_server::handle_signaling_connection;
