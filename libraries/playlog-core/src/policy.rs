//! Reconciliation policy
//!
//! Decides when a buffered record is settled enough to flush, when a
//! repeatedly failing record is given up on, and how a persisted position is
//! presented back to clients.

use crate::types::{PersistedPlayLog, PlayHistoryEntry, PlayProgressRecord};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default idle time before a record may be flushed
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(30);

/// Fraction of the duration past which a song counts as finished
pub const FINISHED_RATIO: f64 = 0.9;

/// Whether a buffered record is eligible for flushing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Updated within the threshold; reconsidered next pass
    Fresh,
    /// Idle for at least the threshold
    Stale,
}

#[derive(Debug, Clone)]
pub struct ReconciliationPolicy {
    staleness_threshold: Duration,
    /// `None` retries forever
    max_flush_attempts: Option<u32>,
}

impl ReconciliationPolicy {
    pub fn new(staleness_threshold: Duration, max_flush_attempts: Option<u32>) -> Self {
        Self {
            staleness_threshold,
            max_flush_attempts: max_flush_attempts.filter(|max| *max > 0),
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    pub fn max_flush_attempts(&self) -> Option<u32> {
        self.max_flush_attempts
    }

    /// Classify a record by its idle time at `now`
    pub fn classify(&self, record: &PlayProgressRecord, now: DateTime<Utc>) -> Freshness {
        let Ok(age) = (now - record.last_touched).to_std() else {
            // last_touched in the future
            return Freshness::Fresh;
        };
        if age >= self.staleness_threshold {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Whether a record with this many failed upserts should stop retrying
    pub fn should_dead_letter(&self, failed_attempts: u32) -> bool {
        self.max_flush_attempts
            .is_some_and(|max| failed_attempts >= max)
    }

    /// Position a client should resume from
    pub fn resume_position(position_seconds: f64, duration_seconds: f64) -> f64 {
        if position_seconds >= duration_seconds * FINISHED_RATIO {
            0.0
        } else {
            position_seconds
        }
    }

    /// Present a persisted row as a history entry
    pub fn normalize(&self, log: PersistedPlayLog) -> PlayHistoryEntry {
        PlayHistoryEntry {
            song_id: log.song_id,
            song_name: log.song_name,
            position_seconds: Self::resume_position(log.position_seconds, log.duration_seconds),
            duration_seconds: log.duration_seconds,
            played_at: log.played_at,
            pending: false,
        }
    }

    /// Present a still-buffered record as a history entry
    pub fn normalize_buffered(&self, record: PlayProgressRecord) -> PlayHistoryEntry {
        PlayHistoryEntry {
            song_id: record.song_id,
            song_name: record.song_name,
            position_seconds: Self::resume_position(
                record.position_seconds,
                record.duration_seconds,
            ),
            duration_seconds: record.duration_seconds,
            played_at: record.last_touched,
            pending: true,
        }
    }
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS_THRESHOLD, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SongId, UserId};
    use proptest::prelude::*;

    fn record_touched_at(last_touched: DateTime<Utc>) -> PlayProgressRecord {
        PlayProgressRecord {
            user_id: UserId::new(1),
            song_id: SongId::new(100),
            song_name: None,
            position_seconds: 10.0,
            duration_seconds: 200.0,
            last_touched,
            flush_attempts: 0,
        }
    }

    fn log(position: f64, duration: f64) -> PersistedPlayLog {
        PersistedPlayLog {
            user_id: UserId::new(1),
            song_id: SongId::new(100),
            song_name: Some("Song".to_string()),
            position_seconds: position,
            duration_seconds: duration,
            played_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_classify_at_threshold_boundary() {
        let policy = ReconciliationPolicy::default();
        let touched = Utc::now();
        let record = record_touched_at(touched);

        let just_before = touched + chrono::Duration::milliseconds(29_999);
        let exactly = touched + chrono::Duration::seconds(30);
        assert_eq!(policy.classify(&record, just_before), Freshness::Fresh);
        assert_eq!(policy.classify(&record, exactly), Freshness::Stale);
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let policy = ReconciliationPolicy::default();
        let now = Utc::now();
        let record = record_touched_at(now + chrono::Duration::minutes(5));
        assert_eq!(policy.classify(&record, now), Freshness::Fresh);
    }

    #[test]
    fn test_dead_letter_cutoff() {
        let unbounded = ReconciliationPolicy::default();
        assert!(!unbounded.should_dead_letter(u32::MAX));

        let zero_means_unbounded = ReconciliationPolicy::new(Duration::from_secs(30), Some(0));
        assert_eq!(zero_means_unbounded.max_flush_attempts(), None);

        let bounded = ReconciliationPolicy::new(Duration::from_secs(30), Some(3));
        assert!(!bounded.should_dead_letter(2));
        assert!(bounded.should_dead_letter(3));
    }

    #[test]
    fn test_normalize_finished_song_restarts() {
        let policy = ReconciliationPolicy::default();
        assert_eq!(policy.normalize(log(190.0, 200.0)).position_seconds, 0.0);
        assert_eq!(policy.normalize(log(180.0, 200.0)).position_seconds, 0.0);
        assert_eq!(policy.normalize(log(100.0, 200.0)).position_seconds, 100.0);
        assert_eq!(policy.normalize(log(15.0, 200.0)).position_seconds, 15.0);
    }

    #[test]
    fn test_normalize_zero_duration_restarts() {
        let policy = ReconciliationPolicy::default();
        assert_eq!(policy.normalize(log(42.0, 0.0)).position_seconds, 0.0);
        assert_eq!(policy.normalize(log(0.0, 0.0)).position_seconds, 0.0);
    }

    proptest! {
        /// Positions past 90% restart; anything below is returned untouched
        #[test]
        fn resume_position_threshold(duration in 1.0f64..10_000.0, ratio in 0.0f64..1.5) {
            let position = duration * ratio;
            let resumed = ReconciliationPolicy::resume_position(position, duration);
            if position >= duration * FINISHED_RATIO {
                prop_assert_eq!(resumed, 0.0);
            } else {
                prop_assert_eq!(resumed, position);
            }
        }
    }
}
