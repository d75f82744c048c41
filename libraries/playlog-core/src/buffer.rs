//! Write-back buffer for playback progress
//!
//! Every accepted event overwrites the one buffered record for its
//! `(user_id, song_id)` and pushes its expiry out again. Nothing here touches
//! durable storage; that is the flusher's job.

use crate::error::{PlaylogError, Result};
use crate::store::{bounded, KeyedStore};
use crate::types::{PlayProgressRecord, ProgressKey, ProgressUpdate, SongId, UserId};
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Default namespace of buffered progress keys
pub const DEFAULT_NAMESPACE: &str = "play_log";

/// Default lifetime of an abandoned buffered record
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default deadline of one keyed-store call
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Key namespace, `{namespace}:{user_id}:{song_id}`
    pub namespace: String,
    /// Time-to-live renewed on every write
    pub ttl: Duration,
    /// Deadline applied to each keyed-store call
    pub op_timeout: Duration,
}

impl BufferConfig {
    /// Namespace that given-up records are moved to
    pub fn dead_letter_namespace(&self) -> String {
        format!("{}_dead", self.namespace)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: DEFAULT_TTL,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

pub struct WriteBackBuffer {
    store: Arc<dyn KeyedStore>,
    config: BufferConfig,
}

impl WriteBackBuffer {
    pub fn new(store: Arc<dyn KeyedStore>, config: BufferConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyedStore> {
        &self.store
    }

    /// Buffer a progress update, stamped with the current time
    pub async fn record_progress(&self, update: ProgressUpdate) -> Result<PlayProgressRecord> {
        self.record_progress_at(update, Utc::now()).await
    }

    /// Buffer a progress update stamped with `now`
    ///
    /// Returns the record as written. The write replaces the previous values
    /// for the same key in one store call and renews the key's expiry.
    pub async fn record_progress_at(
        &self,
        update: ProgressUpdate,
        now: DateTime<Utc>,
    ) -> Result<PlayProgressRecord> {
        // The buffer keeps microseconds; stamp with what will be read back
        let record = PlayProgressRecord::from_update(update, now.trunc_subsecs(6));
        let key = record.key().to_key(&self.config.namespace);

        bounded(
            self.config.op_timeout,
            "buffer write",
            self.store
                .set_fields(&key, &record.to_fields(), self.config.ttl),
            PlaylogError::StoreUnavailable,
        )
        .await?;

        tracing::debug!(
            user_id = %record.user_id,
            song_id = %record.song_id,
            position = record.position_seconds,
            "Buffered play progress"
        );

        Ok(record)
    }

    /// Read one buffered record
    pub async fn get(&self, user_id: UserId, song_id: SongId) -> Result<Option<PlayProgressRecord>> {
        let key = ProgressKey::new(user_id, song_id).to_key(&self.config.namespace);
        let fields = bounded(
            self.config.op_timeout,
            "buffer read",
            self.store.get_fields(&key),
            PlaylogError::StoreUnavailable,
        )
        .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        PlayProgressRecord::from_fields(&key, &fields).map(Some)
    }

    /// All readable records buffered for one user
    pub async fn buffered_for_user(&self, user_id: UserId) -> Result<Vec<PlayProgressRecord>> {
        let prefix = ProgressKey::user_prefix(&self.config.namespace, user_id);
        let keys = bounded(
            self.config.op_timeout,
            "buffer scan",
            self.store.keys_with_prefix(&prefix),
            PlaylogError::StoreUnavailable,
        )
        .await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let fields = bounded(
                self.config.op_timeout,
                "buffer read",
                self.store.get_fields(&key),
                PlaylogError::StoreUnavailable,
            )
            .await?;
            if fields.is_empty() {
                continue;
            }
            match PlayProgressRecord::from_fields(&key, &fields) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping malformed buffered record"),
            }
        }
        Ok(records)
    }

    /// Number of keys currently buffered in the namespace
    pub async fn len(&self) -> Result<usize> {
        let prefix = ProgressKey::namespace_prefix(&self.config.namespace);
        let keys = bounded(
            self.config.op_timeout,
            "buffer scan",
            self.store.keys_with_prefix(&prefix),
            PlaylogError::StoreUnavailable,
        )
        .await?;
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::fields;
    use proptest::prelude::*;

    fn buffer() -> (WriteBackBuffer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            WriteBackBuffer::new(store.clone(), BufferConfig::default()),
            store,
        )
    }

    fn update(user: i64, song: i64, position: f64) -> ProgressUpdate {
        ProgressUpdate::new(UserId::new(user), SongId::new(song), None, position, 200.0).unwrap()
    }

    #[tokio::test]
    async fn test_record_progress_writes_one_key() {
        let (buffer, store) = buffer();
        let record = buffer.record_progress(update(1, 100, 10.0)).await.unwrap();

        let keys = store.keys_with_prefix("play_log:").await.unwrap();
        assert_eq!(keys, vec!["play_log:1:100"]);

        let stored = buffer.get(UserId::new(1), SongId::new(100)).await.unwrap();
        assert_eq!(stored, Some(record));
    }

    #[tokio::test]
    async fn test_later_write_replaces_fields() {
        let (buffer, _) = buffer();
        let first = Utc::now();
        buffer.record_progress_at(update(1, 100, 10.0), first).await.unwrap();
        let second = first + chrono::Duration::seconds(5);
        buffer.record_progress_at(update(1, 100, 15.0), second).await.unwrap();

        let stored = buffer
            .get(UserId::new(1), SongId::new(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.position_seconds, 15.0);
        assert_eq!(stored.last_touched, second.trunc_subsecs(6));
        assert_eq!(buffer.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_keeps_flush_attempts() {
        let (buffer, store) = buffer();
        buffer.record_progress(update(1, 100, 10.0)).await.unwrap();
        store
            .increment_field("play_log:1:100", fields::FLUSH_ATTEMPTS, 2)
            .await
            .unwrap();

        buffer.record_progress(update(1, 100, 20.0)).await.unwrap();
        let stored = buffer.get(UserId::new(1), SongId::new(100)).await.unwrap().unwrap();
        assert_eq!(stored.flush_attempts, 2);
        assert_eq!(stored.position_seconds, 20.0);
    }

    #[tokio::test]
    async fn test_store_unavailable_is_reported() {
        let (buffer, store) = buffer();
        store.set_available(false);

        let err = buffer.record_progress(update(1, 100, 10.0)).await.unwrap_err();
        assert!(matches!(err, PlaylogError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_buffered_for_user_filters_by_user() {
        let (buffer, _) = buffer();
        buffer.record_progress(update(1, 100, 1.0)).await.unwrap();
        buffer.record_progress(update(1, 101, 2.0)).await.unwrap();
        buffer.record_progress(update(11, 100, 3.0)).await.unwrap();

        let records = buffer.buffered_for_user(UserId::new(1)).await.unwrap();
        let songs: Vec<i64> = records.iter().map(|r| r.song_id.get()).collect();
        assert_eq!(songs, vec![100, 101]);
    }

    proptest! {
        /// Property: after any burst of writes to one key, only the last one is visible
        #[test]
        fn coalescing_keeps_last_write(
            positions in prop::collection::vec((0.0f64..500.0, 1.0f64..600.0), 1..30)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let (buffer, store) = buffer();
                for (position, duration) in &positions {
                    let update = ProgressUpdate::new(
                        UserId::new(1), SongId::new(100), None, *position, *duration,
                    ).unwrap();
                    buffer.record_progress(update).await.unwrap();
                }

                let (last_position, last_duration) = *positions.last().unwrap();
                let stored = buffer.get(UserId::new(1), SongId::new(100)).await.unwrap().unwrap();
                prop_assert_eq!(stored.position_seconds, last_position);
                prop_assert_eq!(stored.duration_seconds, last_duration);
                prop_assert_eq!(store.keys_with_prefix("play_log:").await.unwrap().len(), 1);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
