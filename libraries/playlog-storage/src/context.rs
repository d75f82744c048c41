/// `SQLite` implementation of the durable play log store
use crate::play_logs;
use async_trait::async_trait;
use playlog_core::{
    PersistedPlayLog, PlayLogStore, PlayProgressRecord, PlaylogError, Result, UserId,
};
use sqlx::SqlitePool;

/// Durable store backed by the `play_logs` table
#[derive(Clone)]
pub struct SqlitePlayLogStore {
    pool: SqlitePool,
}

impl SqlitePlayLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PlayLogStore for SqlitePlayLogStore {
    async fn upsert_play_position(&self, record: &PlayProgressRecord) -> Result<()> {
        play_logs::upsert(&self.pool, record)
            .await
            .map_err(|e| PlaylogError::durable_write(e.to_string()))
    }

    async fn query_recent(&self, user_id: UserId, limit: usize) -> Result<Vec<PersistedPlayLog>> {
        play_logs::recent(&self.pool, user_id, limit)
            .await
            .map_err(|e| PlaylogError::durable_read(e.to_string()))
    }
}
