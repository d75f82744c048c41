//! Flush pass: move settled buffered records into durable storage
//!
//! A pass scans the whole namespace, skips records that were touched within
//! the staleness threshold and upserts the rest. A buffered key is deleted
//! only after its upsert succeeded, and only if no newer write replaced it
//! in the meantime. Failed records stay buffered and are retried on the next
//! pass, unless the policy caps the number of attempts.

use crate::buffer::BufferConfig;
use crate::error::{PlaylogError, Result};
use crate::policy::{Freshness, ReconciliationPolicy};
use crate::store::{bounded, FieldMap, KeyedStore, PlayLogStore};
use crate::types::{fields, PlayProgressRecord, ProgressKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

/// Outcome counts of one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Keys found in the namespace
    pub scanned: usize,
    /// Keys that were gone or empty by the time they were read
    pub empty: usize,
    /// Records still inside the staleness threshold
    pub fresh: usize,
    /// Upserted and removed from the buffer
    pub flushed: usize,
    /// Upserted, but a newer write arrived so the key was kept
    pub superseded: usize,
    /// Upsert failed; record stays buffered
    pub failed: usize,
    /// Moved to the dead-letter namespace after too many failures
    pub dead_lettered: usize,
    /// Field maps that could not be read as a record
    pub malformed: usize,
    /// Expired keys reclaimed from the store after the pass
    pub expired: usize,
}

pub struct Flusher {
    store: Arc<dyn KeyedStore>,
    durable: Arc<dyn PlayLogStore>,
    policy: ReconciliationPolicy,
    config: BufferConfig,
    pass_lock: Mutex<()>,
}

impl Flusher {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        durable: Arc<dyn PlayLogStore>,
        policy: ReconciliationPolicy,
        config: BufferConfig,
    ) -> Self {
        Self {
            store,
            durable,
            policy,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    /// Run one pass now
    pub async fn run_pass(&self) -> Result<FlushReport> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass, abandoning it after `limit`
    ///
    /// Dropping a pass halfway is safe: nothing is deleted before its upsert
    /// has been confirmed.
    pub async fn run_pass_with_timeout(&self, limit: Duration) -> Result<FlushReport> {
        tokio::time::timeout(limit, self.run_pass())
            .await
            .map_err(|_| PlaylogError::PassTimedOut(limit))?
    }

    /// Run one pass, judging staleness against `now`
    ///
    /// Passes never overlap; a second caller waits for the running pass.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<FlushReport> {
        let _guard = self.pass_lock.lock().await;
        let span = tracing::info_span!("flush_pass", pass_id = %Uuid::new_v4());

        async {
            let report = self.pass(now).await?;
            tracing::info!(
                scanned = report.scanned,
                flushed = report.flushed,
                fresh = report.fresh,
                failed = report.failed,
                superseded = report.superseded,
                dead_lettered = report.dead_lettered,
                malformed = report.malformed,
                expired = report.expired,
                "Flush pass complete"
            );
            Ok::<_, PlaylogError>(report)
        }
        .instrument(span)
        .await
    }

    async fn pass(&self, now: DateTime<Utc>) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        let prefix = ProgressKey::namespace_prefix(&self.config.namespace);

        let keys = self.kv("buffer scan", self.store.keys_with_prefix(&prefix)).await?;
        report.scanned = keys.len();
        tracing::debug!(keys = keys.len(), prefix = %prefix, "Scanning buffered records");

        for key in keys {
            let map = self.kv("buffer read", self.store.get_fields(&key)).await?;
            if map.is_empty() {
                // Flushed or expired since the scan
                report.empty += 1;
                continue;
            }

            let record = match PlayProgressRecord::from_fields(&key, &map) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed buffered record");
                    report.malformed += 1;
                    continue;
                }
            };

            if self.policy.classify(&record, now) == Freshness::Fresh {
                report.fresh += 1;
                continue;
            }

            self.flush_record(&key, &map, &record, &mut report).await?;
        }

        // Reclaim dead letters and abandoned keys whose TTL lapsed
        report.expired = self.kv("buffer purge", self.store.purge_expired()).await?;

        Ok(report)
    }

    async fn flush_record(
        &self,
        key: &str,
        map: &FieldMap,
        record: &PlayProgressRecord,
        report: &mut FlushReport,
    ) -> Result<()> {
        let stamp = map.get(fields::LAST_UPDATE).map(String::as_str);

        let upserted = bounded(
            self.config.op_timeout,
            "durable upsert",
            self.durable.upsert_play_position(record),
            PlaylogError::DurableWrite,
        )
        .await;

        match upserted {
            Ok(()) => {
                let deleted = self
                    .kv(
                        "buffer delete",
                        self.store.delete_if_field_eq(key, fields::LAST_UPDATE, stamp),
                    )
                    .await?;
                if deleted {
                    report.flushed += 1;
                    tracing::info!(
                        key = %key,
                        user_id = %record.user_id,
                        song_id = %record.song_id,
                        position = record.position_seconds,
                        "Flushed play progress to durable storage"
                    );
                } else {
                    report.superseded += 1;
                    tracing::debug!(key = %key, "Newer progress arrived during flush, keeping key");
                }
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    key = %key,
                    attempts = record.flush_attempts.saturating_add(1),
                    error = %e,
                    "Durable write failed, record stays buffered"
                );
                self.record_failure(key, map, record, stamp, report).await?;
            }
        }

        Ok(())
    }

    async fn record_failure(
        &self,
        key: &str,
        map: &FieldMap,
        record: &PlayProgressRecord,
        stamp: Option<&str>,
        report: &mut FlushReport,
    ) -> Result<()> {
        let attempts = self
            .kv(
                "buffer increment",
                self.store.increment_field(key, fields::FLUSH_ATTEMPTS, 1),
            )
            .await?;
        let Some(attempts) = attempts else {
            return Ok(());
        };

        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        if !self.policy.should_dead_letter(attempts) {
            return Ok(());
        }

        let dead_key = record.key().to_key(&self.config.dead_letter_namespace());
        let mut dead = map.clone();
        dead.insert(fields::FLUSH_ATTEMPTS.to_string(), attempts.to_string());

        self.kv(
            "dead-letter write",
            self.store.set_fields(&dead_key, &dead, self.config.ttl),
        )
        .await?;
        let removed = self
            .kv(
                "buffer delete",
                self.store.delete_if_field_eq(key, fields::LAST_UPDATE, stamp),
            )
            .await?;

        if removed {
            report.dead_lettered += 1;
            tracing::warn!(
                key = %key,
                dead_key = %dead_key,
                attempts,
                "Giving up on record after repeated durable write failures"
            );
        } else {
            // A newer write replaced the live key; it is retried as usual
            self.kv(
                "dead-letter delete",
                self.store.delete_if_field_eq(&dead_key, fields::LAST_UPDATE, stamp),
            )
            .await?;
            tracing::debug!(key = %key, "Newer progress arrived before dead-lettering, keeping key");
        }
        Ok(())
    }

    async fn kv<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        bounded(
            self.config.op_timeout,
            operation,
            fut,
            PlaylogError::StoreUnavailable,
        )
        .await
    }
}
