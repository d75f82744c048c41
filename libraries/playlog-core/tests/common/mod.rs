//! Shared fixtures for core integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use playlog_core::{
    BufferConfig, Flusher, MemoryStore, PersistedPlayLog, PlayLogStore, PlayProgressRecord,
    PlaylogError, ProgressUpdate, ReconciliationPolicy, Result, SongId, UserId, WriteBackBuffer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Durable store kept in a map, with a switch to make writes fail
#[derive(Default)]
pub struct FakePlayLogStore {
    rows: Mutex<HashMap<(UserId, SongId), PersistedPlayLog>>,
    upserts: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakePlayLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn row(&self, user: i64, song: i64) -> Option<PersistedPlayLog> {
        self.rows
            .lock()
            .unwrap()
            .get(&(UserId::new(user), SongId::new(song)))
            .cloned()
    }

    pub fn insert(&self, log: PersistedPlayLog) {
        self.rows
            .lock()
            .unwrap()
            .insert((log.user_id, log.song_id), log);
    }
}

#[async_trait]
impl PlayLogStore for FakePlayLogStore {
    async fn upsert_play_position(&self, record: &PlayProgressRecord) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlaylogError::durable_write("database is down"));
        }

        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.insert(PersistedPlayLog {
            user_id: record.user_id,
            song_id: record.song_id,
            song_name: record.song_name.clone(),
            position_seconds: record.position_seconds,
            duration_seconds: record.duration_seconds,
            played_at: record.last_touched,
        });
        Ok(())
    }

    async fn query_recent(&self, user_id: UserId, limit: usize) -> Result<Vec<PersistedPlayLog>> {
        let mut rows: Vec<PersistedPlayLog> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|log| log.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Buffer and flusher wired to the same memory store
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub durable: Arc<FakePlayLogStore>,
    pub buffer: WriteBackBuffer,
    pub flusher: Flusher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(ReconciliationPolicy::default())
    }

    pub fn with_policy(policy: ReconciliationPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let durable = Arc::new(FakePlayLogStore::new());
        let config = BufferConfig::default();
        let buffer = WriteBackBuffer::new(store.clone(), config.clone());
        let flusher = Flusher::new(store.clone(), durable.clone(), policy, config);
        Self {
            store,
            durable,
            buffer,
            flusher,
        }
    }
}

pub fn update(user: i64, song: i64, position: f64, duration: f64) -> ProgressUpdate {
    ProgressUpdate::new(
        UserId::new(user),
        SongId::new(song),
        Some(format!("Song {song}")),
        position,
        duration,
    )
    .unwrap()
}

pub fn seconds_after(at: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    at + chrono::Duration::seconds(seconds)
}
