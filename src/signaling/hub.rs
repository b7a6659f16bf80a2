//! Signaling hub
//!
//! The single coordination point for all signaling state. Both registries
//! live behind one lock; every inbound event is applied and its outbound
//! frames are queued before the lock is released, so events from one
//! connection are observed in the order they arrived and concurrent
//! lifecycle events on the same stream never interleave.
//!
//! Queuing never waits: each connection has a bounded outbound queue and a
//! connection whose queue overflows is severed (see [`ConnectionRegistry`]).

use super::connections::{ConnectionRegistry, Delivery};
use super::messages::{raw_event_name, ClientEvent, ServerEvent, SignalMessage};
use super::streams::{Stream, StreamRegistry};
use super::{ConnectionId, SignalingError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

#[derive(Default)]
struct HubState {
    connections: ConnectionRegistry,
    streams: StreamRegistry,
}

#[derive(Default)]
struct HubCounters {
    signals_relayed: AtomicU64,
    signals_dropped: AtomicU64,
    broadcasts: AtomicU64,
    overflow_disconnects: AtomicU64,
    events_rejected: AtomicU64,
}

/// Counter snapshot for health/metrics endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub active_streams: usize,
    pub signals_relayed: u64,
    pub signals_dropped: u64,
    pub broadcasts: u64,
    pub overflow_disconnects: u64,
    pub events_rejected: u64,
}

pub struct SignalingHub {
    state: Mutex<HubState>,
    counters: HubCounters,
    outbound_buffer: usize,
}

impl SignalingHub {
    /// Create a hub whose connections buffer at most `outbound_buffer` frames
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            counters: HubCounters::default(),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Admit a connection for `identity`.
    ///
    /// The returned receiver yields serialized frames for the connection's
    /// writer task; it ends when the hub severs or forgets the connection.
    pub fn connect(&self, identity: &str) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let mut state = self.state.lock();
        state.connections.admit(id, identity, tx);
        info!(
            "{} connected ({}), {} live connections",
            identity,
            id,
            state.connections.len()
        );
        (id, rx)
    }

    /// Signal fired when the hub severs `id` for overflowing its queue.
    ///
    /// The transport waits on it alongside the socket so a connection whose
    /// writer is stuck on a stalled peer is still torn down.
    pub fn sever_signal(&self, id: ConnectionId) -> Option<Arc<Notify>> {
        self.state.lock().connections.sever_signal(id)
    }

    /// Forget a connection and clean up every stream its identity was part of
    pub fn disconnect(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        let Some(identity) = state.connections.remove(id) else {
            return;
        };
        info!("{} disconnected ({})", identity, id);

        for stream in state.streams.end_all_streamed_by(&identity) {
            info!(
                "Stream ended: {} (streamer {} disconnected after {}s)",
                stream.stream_id,
                identity,
                stream.elapsed_secs()
            );
            self.fan_out(
                &mut state,
                &ServerEvent::StreamEnded {
                    stream_id: stream.stream_id,
                },
            );
        }

        for stream_id in state.streams.remove_viewer_everywhere(&identity) {
            info!("{} left stream {} (disconnected)", identity, stream_id);
            self.fan_out(
                &mut state,
                &ServerEvent::ViewerLeft {
                    stream_id,
                    viewer: identity.clone(),
                },
            );
        }
    }

    /// Handle one raw text frame from a connection.
    ///
    /// Reportable failures are answered with an `error` event to the sender
    /// only; the connection stays open either way.
    pub fn handle_frame(&self, id: ConnectionId, text: &str) {
        let result = match ClientEvent::parse(text) {
            Ok(event) => {
                let name = event.name();
                self.handle_event(id, event)
                    .map_err(|e| (e, Some(name.to_string())))
            }
            Err(e) => Err((e, raw_event_name(text))),
        };

        if let Err((err, event)) = result {
            if !err.is_reported() {
                return;
            }
            warn!("Rejected {:?} from {}: {}", event, id, err);
            self.counters.events_rejected.fetch_add(1, Ordering::Relaxed);
            let reply = ServerEvent::error(&err, event);
            match reply.to_json() {
                Ok(frame) => {
                    let mut state = self.state.lock();
                    self.deliver(&mut state, id, frame);
                }
                Err(e) => warn!("Failed to encode error reply: {}", e),
            }
        }
    }

    /// Apply a decoded event on behalf of connection `id`
    pub fn handle_event(&self, id: ConnectionId, event: ClientEvent) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        match event {
            ClientEvent::StartStream { stream_id, streamer } => {
                state.streams.start(&stream_id, &streamer)?;
                info!("Stream started: {} by {}", stream_id, streamer);
                self.fan_out(&mut state, &ServerEvent::StreamStarted { stream_id, streamer });
            }

            ClientEvent::EndStream { stream_id } => {
                let stream = state.streams.end(&stream_id)?;
                info!(
                    "Stream ended: {} after {}s, viewers {:?}",
                    stream_id,
                    stream.elapsed_secs(),
                    stream.viewers
                );
                self.fan_out(&mut state, &ServerEvent::StreamEnded { stream_id });
            }

            ClientEvent::JoinStream { stream_id, viewer } => {
                if state.streams.join(&stream_id, &viewer)? {
                    info!("{} joined stream {}", viewer, stream_id);
                    self.fan_out(&mut state, &ServerEvent::ViewerJoined { stream_id, viewer });
                } else {
                    debug!("{} already watching {}", viewer, stream_id);
                }
            }

            ClientEvent::LeaveStream { stream_id, viewer } => {
                if state.streams.leave(&stream_id, &viewer)? {
                    info!("{} left stream {}", viewer, stream_id);
                    self.fan_out(&mut state, &ServerEvent::ViewerLeft { stream_id, viewer });
                } else {
                    debug!("{} was not watching {}", viewer, stream_id);
                }
            }

            ClientEvent::Signal(message) => self.route(&mut state, id, &message)?,
        }
        Ok(())
    }

    /// Relay a negotiation message to its target, or to everyone but the
    /// sender when no target is named
    fn route(
        &self,
        state: &mut HubState,
        sender: ConnectionId,
        message: &SignalMessage,
    ) -> Result<(), SignalingError> {
        debug!(
            "Signal: {} from {} to {:?}",
            message.kind.as_str(),
            message.from,
            message.to
        );
        let frame = ServerEvent::relay(message).to_json()?;

        match message.to.as_deref() {
            Some(target) => {
                let Some(conn) = state.connections.resolve(target) else {
                    self.counters.signals_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Dropping {} from {}: {} is not connected",
                        message.kind.as_str(),
                        message.from,
                        target
                    );
                    return Err(SignalingError::UnresolvedTarget(target.to_string()));
                };
                if self.deliver(state, conn, frame) {
                    self.counters.signals_relayed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.signals_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                let (queued, severed) = state.connections.broadcast(&frame, Some(sender));
                self.counters
                    .signals_relayed
                    .fetch_add(queued as u64, Ordering::Relaxed);
                self.record_overflow(severed);
            }
        }
        Ok(())
    }

    /// Broadcast a lifecycle event to every open connection, the actor included
    fn fan_out(&self, state: &mut HubState, event: &ServerEvent) {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        let (_, severed) = state.connections.broadcast(&frame, None);
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.record_overflow(severed);
    }

    fn deliver(&self, state: &mut HubState, id: ConnectionId, frame: String) -> bool {
        match state.connections.send_to(id, frame) {
            Delivery::Queued => true,
            Delivery::Overflow => {
                self.record_overflow(1);
                false
            }
            Delivery::Closed => false,
        }
    }

    fn record_overflow(&self, severed: usize) {
        if severed > 0 {
            self.counters
                .overflow_disconnects
                .fetch_add(severed as u64, Ordering::Relaxed);
        }
    }

    /// Close every connection's outbound queue.
    ///
    /// Each transport flushes what is already queued, sends a close frame
    /// and then runs the usual disconnect cleanup.
    pub fn close_all(&self) -> usize {
        let closed = self.state.lock().connections.close_all();
        if closed > 0 {
            info!("Closing {} signaling connections", closed);
        }
        closed
    }

    /// Active streams ordered by stream id
    pub fn active_streams(&self) -> Vec<Stream> {
        self.state.lock().streams.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn stats(&self) -> HubStats {
        let (connections, active_streams) = {
            let state = self.state.lock();
            (state.connections.len(), state.streams.len())
        };
        HubStats {
            connections,
            active_streams,
            signals_relayed: self.counters.signals_relayed.load(Ordering::Relaxed),
            signals_dropped: self.counters.signals_dropped.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            overflow_disconnects: self.counters.overflow_disconnects.load(Ordering::Relaxed),
            events_rejected: self.counters.events_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn events(frames: &[Value]) -> Vec<&str> {
        frames
            .iter()
            .map(|f| f["event"].as_str().unwrap())
            .collect()
    }

    fn start(stream_id: &str, streamer: &str) -> ClientEvent {
        ClientEvent::StartStream {
            stream_id: stream_id.to_string(),
            streamer: streamer.to_string(),
        }
    }

    fn join(stream_id: &str, viewer: &str) -> ClientEvent {
        ClientEvent::JoinStream {
            stream_id: stream_id.to_string(),
            viewer: viewer.to_string(),
        }
    }

    #[test]
    fn second_start_conflicts_and_only_first_is_broadcast() {
        let hub = SignalingHub::new(16);
        let (chris, mut chris_rx) = hub.connect("Chris");
        let (nick, mut nick_rx) = hub.connect("Nick");

        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        let err = hub.handle_event(nick, start("s1", "Nick")).unwrap_err();
        assert_eq!(err, SignalingError::Conflict("s1".to_string()));
        assert_eq!(hub.active_streams()[0].streamer, "Chris");

        assert_eq!(events(&drain(&mut chris_rx)), vec!["stream-started"]);
        assert_eq!(events(&drain(&mut nick_rx)), vec!["stream-started"]);
    }

    #[test]
    fn conflict_is_reported_to_sender_only() {
        let hub = SignalingHub::new(16);
        let (chris, mut chris_rx) = hub.connect("Chris");
        let (nick, mut nick_rx) = hub.connect("Nick");
        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        drain(&mut chris_rx);
        drain(&mut nick_rx);

        hub.handle_frame(
            nick,
            r#"{"event":"start-stream","data":{"streamId":"s1","streamer":"Nick"}}"#,
        );

        let frames = drain(&mut nick_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "error");
        assert_eq!(frames[0]["data"]["code"], "CONFLICT");
        assert_eq!(frames[0]["data"]["event"], "start-stream");
        assert!(drain(&mut chris_rx).is_empty());
        assert_eq!(hub.stats().events_rejected, 1);
    }

    #[test]
    fn malformed_frame_is_rejected_and_connection_kept() {
        let hub = SignalingHub::new(16);
        let (nick, mut nick_rx) = hub.connect("Nick");

        hub.handle_frame(nick, "not json");
        hub.handle_frame(nick, r#"{"event":"join-stream","data":{}}"#);

        let frames = drain(&mut nick_rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["data"]["code"], "INVALID_EVENT");
        assert_eq!(frames[0]["data"]["event"], Value::Null);
        assert_eq!(frames[1]["data"]["event"], "join-stream");
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn repeated_join_broadcasts_once() {
        let hub = SignalingHub::new(16);
        let (chris, mut chris_rx) = hub.connect("Chris");
        let (nick, _nick_rx) = hub.connect("Nick");
        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        hub.handle_event(nick, join("s1", "Nick")).unwrap();
        hub.handle_event(nick, join("s1", "Nick")).unwrap();

        assert_eq!(hub.active_streams()[0].viewers, vec!["Nick"]);
        assert_eq!(
            events(&drain(&mut chris_rx)),
            vec!["stream-started", "viewer-joined"]
        );
    }

    #[test]
    fn join_and_leave_after_end_are_not_found() {
        let hub = SignalingHub::new(16);
        let (chris, _chris_rx) = hub.connect("Chris");
        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        hub.handle_event(
            chris,
            ClientEvent::EndStream {
                stream_id: "s1".to_string(),
            },
        )
        .unwrap();

        assert_eq!(
            hub.handle_event(chris, join("s1", "Nick")).unwrap_err(),
            SignalingError::NotFound("s1".to_string())
        );
        let leave = ClientEvent::LeaveStream {
            stream_id: "s1".to_string(),
            viewer: "Nick".to_string(),
        };
        assert_eq!(
            hub.handle_event(chris, leave).unwrap_err(),
            SignalingError::NotFound("s1".to_string())
        );
    }

    #[test]
    fn unresolved_target_is_silently_dropped() {
        let hub = SignalingHub::new(16);
        let (nick, mut nick_rx) = hub.connect("Nick");
        let (_chris, mut chris_rx) = hub.connect("Chris");

        hub.handle_frame(
            nick,
            r#"{"event":"signal","data":{"type":"offer","from":"Nick","to":"Angel","data":{"sdp":"v=0"}}}"#,
        );

        assert!(drain(&mut nick_rx).is_empty());
        assert!(drain(&mut chris_rx).is_empty());
        let stats = hub.stats();
        assert_eq!(stats.signals_dropped, 1);
        assert_eq!(stats.events_rejected, 0);
    }

    #[test]
    fn untargeted_signal_skips_sender() {
        let hub = SignalingHub::new(16);
        let (nick, mut nick_rx) = hub.connect("Nick");
        let (_chris, mut chris_rx) = hub.connect("Chris");
        let (_angel, mut angel_rx) = hub.connect("Angel");

        hub.handle_frame(
            nick,
            r#"{"event":"signal","data":{"type":"ice-candidate","from":"Nick","data":{"candidate":"c"}}}"#,
        );

        assert!(drain(&mut nick_rx).is_empty());
        for rx in [&mut chris_rx, &mut angel_rx] {
            let frames = drain(rx);
            assert_eq!(
                frames,
                vec![json!({"event": "ice-candidate", "data": {"from": "Nick", "candidate": {"candidate": "c"}}})]
            );
        }
        assert_eq!(hub.stats().signals_relayed, 2);
    }

    #[test]
    fn targeted_signal_reaches_most_recent_connection() {
        let hub = SignalingHub::new(16);
        let (nick, _nick_rx) = hub.connect("Nick");
        let (_old, mut old_rx) = hub.connect("Chris");
        let (_new, mut new_rx) = hub.connect("Chris");

        hub.handle_frame(
            nick,
            r#"{"event":"signal","data":{"type":"answer","from":"Nick","to":"Chris","data":"X"}}"#,
        );

        assert!(drain(&mut old_rx).is_empty());
        assert_eq!(
            drain(&mut new_rx),
            vec![json!({"event": "answer", "data": {"from": "Nick", "answer": "X"}})]
        );
    }

    #[test]
    fn viewer_disconnect_emits_one_leave_per_stream() {
        let hub = SignalingHub::new(16);
        let (chris, mut chris_rx) = hub.connect("Chris");
        let (angel, _angel_rx) = hub.connect("Angel");
        let (nick, _nick_rx) = hub.connect("Nick");
        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        hub.handle_event(angel, start("s2", "Angel")).unwrap();
        hub.handle_event(nick, join("s1", "Nick")).unwrap();
        hub.handle_event(nick, join("s2", "Nick")).unwrap();
        drain(&mut chris_rx);

        hub.disconnect(nick);

        let frames = drain(&mut chris_rx);
        assert_eq!(events(&frames), vec!["viewer-left", "viewer-left"]);
        assert_eq!(frames[0]["data"], json!({"streamId": "s1", "viewer": "Nick"}));
        assert_eq!(frames[1]["data"], json!({"streamId": "s2", "viewer": "Nick"}));
        assert_eq!(hub.active_streams().len(), 2);
    }

    #[test]
    fn end_to_end_scenario() {
        let hub = SignalingHub::new(16);
        let (chris, mut chris_rx) = hub.connect("Chris");
        let (nick, mut nick_rx) = hub.connect("Nick");
        let (_angel, mut angel_rx) = hub.connect("Angel");

        hub.handle_frame(
            chris,
            r#"{"event":"start-stream","data":{"streamId":"s1","streamer":"Chris"}}"#,
        );
        let streams = hub.active_streams();
        assert_eq!(streams[0].stream_id, "s1");
        assert_eq!(streams[0].streamer, "Chris");
        assert!(streams[0].viewers.is_empty());
        for rx in [&mut chris_rx, &mut nick_rx, &mut angel_rx] {
            assert_eq!(
                drain(rx),
                vec![json!({"event": "stream-started", "data": {"streamId": "s1", "streamer": "Chris"}})]
            );
        }

        hub.handle_frame(
            nick,
            r#"{"event":"join-stream","data":{"streamId":"s1","viewer":"Nick"}}"#,
        );
        assert_eq!(hub.active_streams()[0].viewers, vec!["Nick"]);
        for rx in [&mut chris_rx, &mut nick_rx, &mut angel_rx] {
            assert_eq!(
                drain(rx),
                vec![json!({"event": "viewer-joined", "data": {"streamId": "s1", "viewer": "Nick"}})]
            );
        }

        hub.handle_frame(
            nick,
            r#"{"event":"signal","data":{"type":"offer","from":"Nick","to":"Chris","data":{"type":"offer","sdp":"X"}}}"#,
        );
        assert_eq!(
            drain(&mut chris_rx),
            vec![json!({"event": "offer", "data": {"from": "Nick", "offer": {"type": "offer", "sdp": "X"}}})]
        );
        assert!(drain(&mut nick_rx).is_empty());
        assert!(drain(&mut angel_rx).is_empty());

        hub.disconnect(chris);
        assert!(hub.active_streams().is_empty());
        for rx in [&mut nick_rx, &mut angel_rx] {
            assert_eq!(
                drain(rx),
                vec![json!({"event": "stream-ended", "data": {"streamId": "s1"}})]
            );
        }
        assert_eq!(hub.connection_count(), 2);
    }

    #[test]
    fn slow_receiver_is_severed_without_blocking() {
        let hub = SignalingHub::new(1);
        let (chris, mut chris_rx) = hub.connect("Chris");
        let (_slow, mut slow_rx) = hub.connect("Slow");

        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        drain(&mut chris_rx);
        hub.handle_event(chris, join("s1", "Chris")).unwrap();

        assert_eq!(hub.stats().overflow_disconnects, 1);
        assert_eq!(events(&drain(&mut chris_rx)), vec!["viewer-joined"]);
        // Queued frame is still readable, then the queue reports closed
        assert_eq!(slow_rx.try_recv().map(|_| ()), Ok(()));
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn concurrent_starts_on_one_stream_admit_exactly_one() {
        let hub = SignalingHub::new(64);
        let clients: Vec<_> = (0..8)
            .map(|i| {
                let name = format!("user-{}", i);
                let (id, rx) = hub.connect(&name);
                (id, name, rx)
            })
            .collect();

        let results: Vec<Result<(), SignalingError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = clients
                .iter()
                .map(|(id, name, _)| {
                    let hub = &hub;
                    scope.spawn(move || hub.handle_event(*id, start("s1", name)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(SignalingError::Conflict(id)) if id == "s1"))
            .count();
        assert_eq!(conflicts, 7);

        let streamer = hub.active_streams()[0].streamer.clone();
        for (_, _, mut rx) in clients {
            let frames = drain(&mut rx);
            assert_eq!(
                frames,
                vec![json!({"event": "stream-started", "data": {"streamId": "s1", "streamer": streamer}})]
            );
        }
    }

    #[test]
    fn concurrent_joins_are_all_recorded() {
        let hub = SignalingHub::new(64);
        let (chris, mut chris_rx) = hub.connect("Chris");
        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        drain(&mut chris_rx);

        let viewers: Vec<_> = (0..8)
            .map(|i| {
                let name = format!("viewer-{}", i);
                let (id, rx) = hub.connect(&name);
                (id, name, rx)
            })
            .collect();

        std::thread::scope(|scope| {
            for (id, name, _) in &viewers {
                let hub = &hub;
                scope.spawn(move || hub.handle_event(*id, join("s1", name)).unwrap());
            }
        });

        let mut recorded = hub.active_streams()[0].viewers.clone();
        recorded.sort();
        let mut expected: Vec<String> = viewers.iter().map(|(_, name, _)| name.clone()).collect();
        expected.sort();
        assert_eq!(recorded, expected);
        assert_eq!(events(&drain(&mut chris_rx)), vec!["viewer-joined"; 8]);
    }

    #[test]
    fn overflow_fires_sever_signal() {
        let hub = SignalingHub::new(1);
        let (chris, _chris_rx) = hub.connect("Chris");
        let (slow, _slow_rx) = hub.connect("Slow");
        let severed = hub.sever_signal(slow).unwrap();

        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        hub.handle_event(chris, join("s1", "Chris")).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(1), severed.notified())
                .await
                .expect("slow connection was not signalled");
        });
        assert!(hub.sever_signal(ConnectionId::new()).is_none());
    }

    #[test]
    fn disconnect_twice_is_harmless() {
        let hub = SignalingHub::new(4);
        let (chris, _rx) = hub.connect("Chris");
        hub.handle_event(chris, start("s1", "Chris")).unwrap();
        hub.disconnect(chris);
        hub.disconnect(chris);
        assert_eq!(hub.stats().broadcasts, 2);
        assert_eq!(hub.connection_count(), 0);
    }
}
