/// Durable play log types
use super::{SongId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A play log row as stored durably, raw position preserved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPlayLog {
    pub user_id: UserId,
    pub song_id: SongId,
    pub song_name: Option<String>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    /// When the progress was last reported
    pub played_at: DateTime<Utc>,
}

/// One entry of a user's play history, as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayHistoryEntry {
    pub song_id: SongId,
    pub song_name: Option<String>,
    /// Resume position; zero once the song counts as finished
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub played_at: DateTime<Utc>,
    /// Still buffered, not yet flushed to durable storage
    #[serde(default)]
    pub pending: bool,
}
