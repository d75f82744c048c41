//! Store traits and the in-process keyed store
//!
//! Two capabilities are injected into the core:
//!
//! - [`KeyedStore`]: the ephemeral keyed store holding buffered records as
//!   flat field maps with a time-to-live
//! - [`PlayLogStore`]: durable storage with last-write-wins upserts
//!
//! [`MemoryStore`] is a complete in-process [`KeyedStore`], used by tests and
//! by single-node deployments that accept losing the buffer on restart.

use crate::error::{PlaylogError, Result};
use crate::types::{PersistedPlayLog, PlayProgressRecord, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Flat field map of one buffered key
pub type FieldMap = HashMap<String, String>;

/// Ephemeral keyed store with per-key field maps and expiry
///
/// Every method is atomic per key: a reader never sees a mix of two writes.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Merge `fields` into the key's map and reset its time-to-live
    async fn set_fields(&self, key: &str, fields: &FieldMap, ttl: Duration) -> Result<()>;

    /// Read the whole map; empty when the key is absent or expired
    async fn get_fields(&self, key: &str) -> Result<FieldMap>;

    /// All live keys starting with `prefix`
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Add `by` to an integer field of an existing key
    ///
    /// Returns the new value, or `None` when the key does not exist. A missing
    /// or non-integer field counts as zero.
    async fn increment_field(&self, key: &str, field: &str, by: i64) -> Result<Option<i64>>;

    /// Delete the key only if `field` still holds `expected`
    ///
    /// `expected == None` means the field must be absent.
    async fn delete_if_field_eq(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
    ) -> Result<bool>;

    /// Physically remove expired keys, returning how many were dropped
    ///
    /// Expired keys are already invisible to reads; this reclaims their space.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Durable play log storage
#[async_trait]
pub trait PlayLogStore: Send + Sync {
    /// Insert or overwrite the row for `(user_id, song_id)`
    ///
    /// Applying the same record twice must leave the same row.
    async fn upsert_play_position(&self, record: &PlayProgressRecord) -> Result<()>;

    /// A user's rows, most recently played first, raw positions
    async fn query_recent(&self, user_id: UserId, limit: usize) -> Result<Vec<PersistedPlayLog>>;
}

/// Run a store call under a deadline
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &str,
    fut: F,
    on_timeout: fn(String) -> PlaylogError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "{operation} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

struct Entry {
    fields: FieldMap,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process [`KeyedStore`]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every call fail with `StoreUnavailable` (or recover)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlaylogError::store_unavailable("memory store is offline"))
        }
    }

    /// Keys held in memory, expired ones included
    pub async fn held(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn set_fields(&self, key: &str, fields: &FieldMap, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: FieldMap::new(),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.fields.clear();
        }
        entry
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> Result<FieldMap> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.fields.clone())
            .unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment_field(&self, key: &str, field: &str, by: i64) -> Result<Option<i64>> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) else {
            return Ok(None);
        };

        let current = entry
            .fields
            .get(field)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current.saturating_add(by);
        entry.fields.insert(field.to_string(), next.to_string());
        Ok(Some(next))
    }

    async fn delete_if_field_eq(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
    ) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .is_some_and(|entry| entry.fields.get(field).map(String::as_str) == expected);

        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}
