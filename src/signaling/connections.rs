//! Connection registry
//!
//! Associates each live connection with the identity it claimed when it
//! opened, and owns the bounded outbound queue used to reach it.
//!
//! Several connections may claim the same identity. Resolving an identity
//! always picks the most recently admitted connection that is still live.

use super::ConnectionId;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// Outcome of a single enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued for the writer task
    Queued,
    /// Unknown handle or writer already gone
    Closed,
    /// Queue was full; the connection has been severed
    Overflow,
}

struct ConnectionEntry {
    identity: String,
    /// Dropped on overflow so the writer task sees the end of the queue
    outbound: Option<mpsc::Sender<String>>,
    /// Fired on overflow; a writer stuck on a stalled socket never reaches
    /// the end of its queue
    severed: Arc<Notify>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
    /// Handles per identity, in admission order
    by_identity: HashMap<String, Vec<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection and its outbound queue
    pub fn admit(&mut self, id: ConnectionId, identity: &str, outbound: mpsc::Sender<String>) {
        self.entries.insert(
            id,
            ConnectionEntry {
                identity: identity.to_string(),
                outbound: Some(outbound),
                severed: Arc::new(Notify::new()),
            },
        );
        self.by_identity
            .entry(identity.to_string())
            .or_default()
            .push(id);
    }

    /// Evict a connection, returning the identity it held
    pub fn remove(&mut self, id: ConnectionId) -> Option<String> {
        let entry = self.entries.remove(&id)?;
        if let Some(handles) = self.by_identity.get_mut(&entry.identity) {
            handles.retain(|h| *h != id);
            if handles.is_empty() {
                self.by_identity.remove(&entry.identity);
            }
        }
        Some(entry.identity)
    }

    /// Most recently admitted live connection claiming `identity`
    pub fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.by_identity
            .get(identity)
            .and_then(|handles| handles.last())
            .copied()
    }

    /// Notified once if the connection is severed for overflowing its queue
    pub fn sever_signal(&self, id: ConnectionId) -> Option<Arc<Notify>> {
        self.entries.get(&id).map(|e| e.severed.clone())
    }

    pub fn identity(&self, id: ConnectionId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.identity.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue a frame for one connection without waiting
    pub fn send_to(&mut self, id: ConnectionId, frame: String) -> Delivery {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Delivery::Closed;
        };
        let Some(sender) = entry.outbound.as_ref() else {
            return Delivery::Closed;
        };
        match sender.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for {} ({}), disconnecting",
                    entry.identity, id
                );
                entry.outbound = None;
                entry.severed.notify_one();
                Delivery::Overflow
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {} ({})", entry.identity, id);
                Delivery::Closed
            }
        }
    }

    /// Close every outbound queue so each writer flushes what is queued and
    /// says goodbye; returns how many were still open
    pub fn close_all(&mut self) -> usize {
        self.entries
            .values_mut()
            .filter_map(|entry| entry.outbound.take())
            .count()
    }

    /// Enqueue a frame for every connection except `except`.
    ///
    /// Returns the number of connections the frame was queued for and the
    /// number severed because their queue overflowed.
    pub fn broadcast(&mut self, frame: &str, except: Option<ConnectionId>) -> (usize, usize) {
        let targets: Vec<ConnectionId> = self
            .entries
            .keys()
            .copied()
            .filter(|id| Some(*id) != except)
            .collect();

        let mut queued = 0;
        let mut severed = 0;
        for id in targets {
            match self.send_to(id, frame.to_string()) {
                Delivery::Queued => queued += 1,
                Delivery::Overflow => severed += 1,
                Delivery::Closed => {}
            }
        }
        (queued, severed)
    }
}
