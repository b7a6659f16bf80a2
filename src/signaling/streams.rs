//! Stream registry
//!
//! Holds the single active stream per stream id. A stream exists here only
//! while it is live; ending it removes the entry entirely.

use super::SignalingError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One in-progress broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub stream_id: String,
    pub streamer: String,
    /// Viewers in join order, no duplicates
    pub viewers: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl Stream {
    fn new(stream_id: String, streamer: String) -> Self {
        Self {
            stream_id,
            streamer,
            viewers: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn has_viewer(&self, viewer: &str) -> bool {
        self.viewers.iter().any(|v| v == viewer)
    }

    /// Whole seconds since the stream started
    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

/// Registry of active streams, keyed by stream id.
///
/// Not synchronized on its own; the hub owns it behind its lock.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: BTreeMap<String, Stream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a stream with an empty viewer set
    pub fn start(&mut self, stream_id: &str, streamer: &str) -> Result<&Stream, SignalingError> {
        if self.streams.contains_key(stream_id) {
            return Err(SignalingError::Conflict(stream_id.to_string()));
        }
        let stream = self
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(|| Stream::new(stream_id.to_string(), streamer.to_string()));
        Ok(stream)
    }

    /// End a stream, returning it with its final viewer list
    pub fn end(&mut self, stream_id: &str) -> Result<Stream, SignalingError> {
        self.streams
            .remove(stream_id)
            .ok_or_else(|| SignalingError::NotFound(stream_id.to_string()))
    }

    /// Add a viewer. Returns `false` if the viewer was already watching.
    pub fn join(&mut self, stream_id: &str, viewer: &str) -> Result<bool, SignalingError> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| SignalingError::NotFound(stream_id.to_string()))?;
        if stream.has_viewer(viewer) {
            return Ok(false);
        }
        stream.viewers.push(viewer.to_string());
        Ok(true)
    }

    /// Remove a viewer. Returns `false` if the viewer was not watching.
    pub fn leave(&mut self, stream_id: &str, viewer: &str) -> Result<bool, SignalingError> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| SignalingError::NotFound(stream_id.to_string()))?;
        let before = stream.viewers.len();
        stream.viewers.retain(|v| v != viewer);
        Ok(stream.viewers.len() != before)
    }

    /// End every stream whose streamer is `identity`
    pub fn end_all_streamed_by(&mut self, identity: &str) -> Vec<Stream> {
        let ids: Vec<String> = self
            .streams
            .values()
            .filter(|s| s.streamer == identity)
            .map(|s| s.stream_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.streams.remove(id)).collect()
    }

    /// Drop `identity` from every viewer set, returning the affected stream ids
    pub fn remove_viewer_everywhere(&mut self, identity: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for stream in self.streams.values_mut() {
            if stream.has_viewer(identity) {
                stream.viewers.retain(|v| v != identity);
                affected.push(stream.stream_id.clone());
            }
        }
        affected
    }

    pub fn get(&self, stream_id: &str) -> Option<&Stream> {
        self.streams.get(stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Active streams ordered by stream id
    pub fn snapshot(&self) -> Vec<Stream> {
        self.streams.values().cloned().collect()
    }
}
