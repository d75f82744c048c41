//! Play history query

use crate::buffer::WriteBackBuffer;
use crate::error::{PlaylogError, Result};
use crate::policy::ReconciliationPolicy;
use crate::store::{bounded, PlayLogStore};
use crate::types::{PlayHistoryEntry, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Most entries returned for one user
pub const RECENT_HISTORY_LIMIT: usize = 100;

pub struct PlayHistory {
    durable: Arc<dyn PlayLogStore>,
    policy: ReconciliationPolicy,
    op_timeout: Duration,
}

impl PlayHistory {
    pub fn new(
        durable: Arc<dyn PlayLogStore>,
        policy: ReconciliationPolicy,
        op_timeout: Duration,
    ) -> Self {
        Self {
            durable,
            policy,
            op_timeout,
        }
    }

    /// Persisted history, most recent first, finished songs reset to zero
    pub async fn recent(&self, user_id: UserId) -> Result<Vec<PlayHistoryEntry>> {
        let logs = bounded(
            self.op_timeout,
            "history query",
            self.durable.query_recent(user_id, RECENT_HISTORY_LIMIT),
            PlaylogError::DurableRead,
        )
        .await?;

        let entries: Vec<PlayHistoryEntry> = logs
            .into_iter()
            .map(|log| self.policy.normalize(log))
            .collect();

        tracing::info!(user_id = %user_id, count = entries.len(), "Retrieved play history");
        Ok(entries)
    }

    /// Persisted history with not-yet-flushed progress merged in
    ///
    /// A buffered record replaces the persisted entry for the same song.
    pub async fn recent_with_buffered(
        &self,
        user_id: UserId,
        buffer: &WriteBackBuffer,
    ) -> Result<Vec<PlayHistoryEntry>> {
        let persisted = self.recent(user_id).await?;
        let buffered = buffer.buffered_for_user(user_id).await?;

        let mut by_song: HashMap<_, PlayHistoryEntry> = persisted
            .into_iter()
            .map(|entry| (entry.song_id, entry))
            .collect();
        for record in buffered {
            by_song.insert(record.song_id, self.policy.normalize_buffered(record));
        }

        let mut entries: Vec<PlayHistoryEntry> = by_song.into_values().collect();
        entries.sort_by(|a, b| {
            b.played_at
                .cmp(&a.played_at)
                .then_with(|| a.song_id.cmp(&b.song_id))
        });
        entries.truncate(RECENT_HISTORY_LIMIT);
        Ok(entries)
    }
}
