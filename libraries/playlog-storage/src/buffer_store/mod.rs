//! Embedded on-disk keyed store backed by redb
//!
//! Each key maps to a JSON-encoded [`StoredEntry`] holding the field map and a
//! wall-clock expiry. Expired entries are invisible to every read and are
//! physically removed on open and by [`KeyedStore::purge_expired`].

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use playlog_core::{FieldMap, KeyedStore, PlaylogError};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BUFFER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("buffer");

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    fields: FieldMap,
    expires_at_ms: i64,
}

impl StoredEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms().saturating_add(ttl_ms)
}

/// Read the live entry under `key` inside a write transaction
fn live_entry(
    table: &redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    now: i64,
) -> Result<Option<StoredEntry>> {
    let bytes = table.get(key)?.map(|guard| guard.value().to_vec());
    match bytes {
        Some(bytes) => {
            let entry = StoredEntry::decode(&bytes)?;
            Ok(entry.is_live(now).then_some(entry))
        }
        None => Ok(None),
    }
}

/// Remove expired (or unreadable) entries, returning how many were dropped
fn purge_expired_entries(db: &Database) -> Result<usize> {
    let now = now_ms();
    let txn = db.begin_write()?;
    let removed = {
        let mut table = txn.open_table(BUFFER_TABLE)?;
        let mut expired = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let live = StoredEntry::decode(value.value()).is_ok_and(|e| e.is_live(now));
            if !live {
                expired.push(key.value().to_string());
            }
        }
        for key in &expired {
            table.remove(key.as_str())?;
        }
        expired.len()
    };
    txn.commit()?;
    Ok(removed)
}

/// [`KeyedStore`] persisted in a single redb file
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the store at `path` and drop entries that expired
    /// while it was closed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || -> Result<Database> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let db = Database::create(&path)?;
            let txn = db.begin_write()?;
            txn.open_table(BUFFER_TABLE)?;
            txn.commit()?;
            Ok(db)
        })
        .await??;

        let store = Self { db: Arc::new(db) };
        let purged = store.run(purge_expired_entries).await?;
        tracing::debug!(purged, "Opened redb buffer store");
        Ok(store)
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db)).await?
    }

    async fn call<T, F>(&self, op: F) -> playlog_core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        self.run(op)
            .await
            .map_err(|e| PlaylogError::store_unavailable(e.to_string()))
    }
}

#[async_trait]
impl KeyedStore for RedbStore {
    async fn set_fields(
        &self,
        key: &str,
        fields: &FieldMap,
        ttl: Duration,
    ) -> playlog_core::Result<()> {
        let key = key.to_string();
        let fields = fields.clone();
        self.call(move |db| {
            let now = now_ms();
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(BUFFER_TABLE)?;
                let mut entry = live_entry(&table, &key, now)?.unwrap_or(StoredEntry {
                    fields: FieldMap::new(),
                    expires_at_ms: now,
                });
                entry.fields.extend(fields);
                entry.expires_at_ms = expiry(ttl);
                table.insert(key.as_str(), entry.encode()?.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_fields(&self, key: &str) -> playlog_core::Result<FieldMap> {
        let key = key.to_string();
        self.call(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(BUFFER_TABLE)?;
            let Some(guard) = table.get(key.as_str())? else {
                return Ok(FieldMap::new());
            };
            let entry = StoredEntry::decode(guard.value())?;
            Ok(if entry.is_live(now_ms()) {
                entry.fields
            } else {
                FieldMap::new()
            })
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> playlog_core::Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.call(move |db| {
            let now = now_ms();
            let txn = db.begin_read()?;
            let table = txn.open_table(BUFFER_TABLE)?;
            let mut keys = Vec::new();
            for item in table.range(prefix.as_str()..)? {
                let (key, value) = item?;
                let key = key.value();
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
                if StoredEntry::decode(value.value()).is_ok_and(|e| e.is_live(now)) {
                    keys.push(key.to_string());
                }
            }
            Ok(keys)
        })
        .await
    }

    async fn increment_field(
        &self,
        key: &str,
        field: &str,
        by: i64,
    ) -> playlog_core::Result<Option<i64>> {
        let key = key.to_string();
        let field = field.to_string();
        self.call(move |db| {
            let txn = db.begin_write()?;
            let next = {
                let mut table = txn.open_table(BUFFER_TABLE)?;
                let Some(mut entry) = live_entry(&table, &key, now_ms())? else {
                    return Ok(None);
                };
                let current = entry
                    .fields
                    .get(&field)
                    .and_then(|raw| raw.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current.saturating_add(by);
                entry.fields.insert(field, next.to_string());
                table.insert(key.as_str(), entry.encode()?.as_slice())?;
                next
            };
            txn.commit()?;
            Ok(Some(next))
        })
        .await
    }

    async fn delete_if_field_eq(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
    ) -> playlog_core::Result<bool> {
        let key = key.to_string();
        let field = field.to_string();
        let expected = expected.map(str::to_string);
        self.call(move |db| {
            let txn = db.begin_write()?;
            let matches = {
                let mut table = txn.open_table(BUFFER_TABLE)?;
                let matches = live_entry(&table, &key, now_ms())?
                    .is_some_and(|entry| entry.fields.get(&field) == expected.as_ref());
                if matches {
                    table.remove(key.as_str())?;
                }
                matches
            };
            txn.commit()?;
            Ok(matches)
        })
        .await
    }

    async fn purge_expired(&self) -> playlog_core::Result<usize> {
        self.call(purge_expired_entries).await
    }
}
