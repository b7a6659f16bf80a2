//! Signaling WebSocket connection handler
//!
//! One task per connection reads frames and feeds them to the hub; a
//! writer task drains the connection's outbound queue into the socket.
//! When either side ends (client close, read error, or the hub severing a
//! slow connection) the connection is removed from the hub, which runs the
//! disconnect cleanup. A severed connection's writer may be parked on a
//! stalled socket, so it is aborted rather than awaited.

use crate::signaling::SignalingHub;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;

/// Handle a signaling WebSocket connection for `identity`
pub async fn handle_signaling_connection(
    socket: WebSocket,
    identity: String,
    hub: Arc<SignalingHub>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn_id, mut outbound_rx) = hub.connect(&identity);
    let severed = hub.sever_signal(conn_id).unwrap_or_default();

    // Forward queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        // Queue closed by the hub: tell the client we are done
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let text_str: &str = text.as_ref();
                    hub.handle_frame(conn_id, text_str);
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary frame from {}", data.len(), identity);
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Signaling connection closed by {}", identity);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", identity, e);
                    break;
                }
            },
            _ = &mut send_task => {
                info!("Outbound channel for {} closed, dropping connection", identity);
                break;
            }
            _ = severed.notified() => {
                warn!("{} is not keeping up with its outbound queue, dropping connection", identity);
                break;
            }
        }
    }

    hub.disconnect(conn_id);
    send_task.abort();

    info!("Signaling connection handler finished ({} / {})", identity, conn_id);
}
