//! Stream history
//!
//! SQLite-backed store for completed-stream summaries. Clients submit a
//! record after ending a stream; the server assigns the timestamp.

use chrono::{SecondsFormat, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS videos (
    id TEXT PRIMARY KEY,
    streamer_name TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    duration INTEGER NOT NULL,
    viewers TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
";

/// History store errors
#[derive(Debug)]
pub enum HistoryError {
    /// A record with this id already exists
    Duplicate(String),
    /// Database failure
    Storage(String),
    /// Viewer list could not be (de)serialized
    Encoding(String),
    /// Rejected before reaching the database
    Invalid(String),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::Duplicate(id) => write!(f, "Record already exists: {}", id),
            HistoryError::Storage(msg) => write!(f, "Storage error: {}", msg),
            HistoryError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            HistoryError::Invalid(msg) => write!(f, "Invalid record: {}", msg),
        }
    }
}

impl Error for HistoryError {}

impl From<rusqlite::Error> for HistoryError {
    fn from(err: rusqlite::Error) -> Self {
        HistoryError::Storage(err.to_string())
    }
}

/// A stored stream summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub streamer_name: String,
    /// RFC 3339 UTC time the record was stored
    pub timestamp: String,
    /// Duration in seconds
    pub duration: i64,
    pub viewers: Vec<String>,
}

/// Body of a create request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewVideoRecord {
    #[serde(rename = "streamId")]
    pub stream_id: String,
    pub streamer_name: String,
    pub duration: i64,
    #[serde(default)]
    pub viewers: Vec<String>,
}

pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Create or open the history database
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open(path)?;
        info!("History database opened at {:?}", path);
        Self::with_connection(conn)
    }

    /// Volatile store, used by tests
    pub fn in_memory() -> Result<Self, HistoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn create_record(&self, new: NewVideoRecord) -> Result<VideoRecord, HistoryError> {
        if new.duration < 0 {
            return Err(HistoryError::Invalid(format!(
                "duration of {} must not be negative, got {}",
                new.stream_id, new.duration
            )));
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let viewers = serde_json::to_string(&new.viewers)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO videos (id, streamer_name, timestamp, duration, viewers)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new.stream_id, new.streamer_name, timestamp, new.duration, viewers],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(HistoryError::Duplicate(new.stream_id));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(VideoRecord {
            id: new.stream_id,
            streamer_name: new.streamer_name,
            timestamp,
            duration: new.duration,
            viewers: new.viewers,
        })
    }

    /// All records, newest first
    pub fn list_records(&self) -> Result<Vec<VideoRecord>, HistoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, streamer_name, timestamp, duration, viewers
             FROM videos
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_row).collect()
    }

    pub fn get_record(&self, id: &str) -> Result<Option<VideoRecord>, HistoryError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, streamer_name, timestamp, duration, viewers
                 FROM videos WHERE id = ?1",
                params![id],
                read_row,
            )
            .optional()?;
        row.map(decode_row).transpose()
    }
}

type RawRow = (String, String, String, i64, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_row((id, streamer_name, timestamp, duration, viewers): RawRow) -> Result<VideoRecord, HistoryError> {
    let viewers = serde_json::from_str(&viewers)
        .map_err(|e| HistoryError::Encoding(format!("viewers of {}: {}", id, e)))?;
    Ok(VideoRecord {
        id,
        streamer_name,
        timestamp,
        duration,
        viewers,
    })
}
