//! Durable play log rows, one per `(user_id, song_id)`

use crate::StorageError;
use chrono::{DateTime, Utc};
use playlog_core::{PersistedPlayLog, PlayProgressRecord, SongId, UserId};
use sqlx::{FromRow, SqlitePool};

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, FromRow)]
struct PlayLogRow {
    user_id: i64,
    song_id: i64,
    song_name: String,
    current_position: f64,
    song_duration: f64,
    played_at: i64,
}

impl From<PlayLogRow> for PersistedPlayLog {
    fn from(row: PlayLogRow) -> Self {
        Self {
            user_id: UserId::new(row.user_id),
            song_id: SongId::new(row.song_id),
            song_name: Some(row.song_name).filter(|name| !name.is_empty()),
            position_seconds: row.current_position,
            duration_seconds: row.song_duration,
            played_at: DateTime::from_timestamp_millis(row.played_at)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// Insert or overwrite the row for the record's `(user_id, song_id)`
///
/// Every column is taken from the record, including the timestamps, so
/// re-applying the same record leaves the row unchanged.
pub async fn upsert(pool: &SqlitePool, record: &PlayProgressRecord) -> Result<()> {
    let touched = record.last_touched.timestamp_millis();
    let song_name = record.song_name.as_deref().unwrap_or_default();

    sqlx::query(
        "INSERT INTO play_logs
         (user_id, song_id, song_name, current_position, song_duration, played_at, update_time)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, song_id)
         DO UPDATE SET
            song_name = excluded.song_name,
            current_position = excluded.current_position,
            song_duration = excluded.song_duration,
            played_at = excluded.played_at,
            update_time = excluded.update_time",
    )
    .bind(record.user_id.get())
    .bind(record.song_id.get())
    .bind(song_name)
    .bind(record.position_seconds)
    .bind(record.duration_seconds)
    .bind(touched)
    .bind(touched)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get one row
pub async fn get(
    pool: &SqlitePool,
    user_id: UserId,
    song_id: SongId,
) -> Result<Option<PersistedPlayLog>> {
    let row = sqlx::query_as::<_, PlayLogRow>(
        "SELECT user_id, song_id, song_name, current_position, song_duration, played_at
         FROM play_logs WHERE user_id = ? AND song_id = ?",
    )
    .bind(user_id.get())
    .bind(song_id.get())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// A user's rows, most recently played first, raw positions
pub async fn recent(
    pool: &SqlitePool,
    user_id: UserId,
    limit: usize,
) -> Result<Vec<PersistedPlayLog>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows = sqlx::query_as::<_, PlayLogRow>(
        "SELECT user_id, song_id, song_name, current_position, song_duration, played_at
         FROM play_logs
         WHERE user_id = ?
         ORDER BY played_at DESC, id DESC
         LIMIT ?",
    )
    .bind(user_id.get())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Number of rows stored for a user
pub async fn count_for_user(pool: &SqlitePool, user_id: UserId) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM play_logs WHERE user_id = ?")
        .bind(user_id.get())
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}
