/// Playback progress types: the ingestion payload and the buffered record
use super::{SongId, UserId};
use crate::error::{PlaylogError, Result};
use crate::store::FieldMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names of a buffered record
///
/// These match what earlier deployments wrote into the cache, so a buffer
/// populated by either side stays readable.
pub mod fields {
    use chrono::{DateTime, Utc};

    pub const USER_ID: &str = "user_id";
    pub const SONG_ID: &str = "song_id";
    pub const SONG_NAME: &str = "song_name";
    pub const POSITION: &str = "current_time";
    pub const DURATION: &str = "duration";
    pub const LAST_UPDATE: &str = "last_update";
    pub const FLUSH_ATTEMPTS: &str = "flush_attempts";

    /// Encode a timestamp as fractional Unix seconds
    pub fn encode_timestamp(at: DateTime<Utc>) -> String {
        format!("{:.6}", at.timestamp_micros() as f64 / 1_000_000.0)
    }

    /// Decode fractional Unix seconds
    pub fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let secs: f64 = raw.trim().parse().ok()?;
        if !secs.is_finite() {
            return None;
        }
        DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
    }
}

/// Identity of a buffered record: one per `(user_id, song_id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    pub user_id: UserId,
    pub song_id: SongId,
}

impl ProgressKey {
    pub fn new(user_id: UserId, song_id: SongId) -> Self {
        Self { user_id, song_id }
    }

    /// Store key inside `namespace`, e.g. `play_log:1:100`
    pub fn to_key(self, namespace: &str) -> String {
        format!("{}:{}:{}", namespace, self.user_id, self.song_id)
    }

    /// Prefix matching every record in `namespace`
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{namespace}:")
    }

    /// Prefix matching every record of one user in `namespace`
    pub fn user_prefix(namespace: &str, user_id: UserId) -> String {
        format!("{namespace}:{user_id}:")
    }
}

/// Raw ingestion payload as received from a client
///
/// Every field is optional here so that a missing field surfaces as a
/// [`PlaylogError::Validation`] instead of a deserializer rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub user_id: Option<i64>,
    pub song_id: Option<i64>,
    #[serde(default)]
    pub song_name: Option<String>,
    #[serde(alias = "current_time")]
    pub position_seconds: Option<f64>,
    #[serde(alias = "duration")]
    pub duration_seconds: Option<f64>,
}

impl ProgressEvent {
    /// Check required fields and value ranges
    pub fn validate(self) -> Result<ProgressUpdate> {
        let user_id = self
            .user_id
            .ok_or_else(|| PlaylogError::validation("missing field: user_id"))?;
        let song_id = self
            .song_id
            .ok_or_else(|| PlaylogError::validation("missing field: song_id"))?;
        let position = self
            .position_seconds
            .ok_or_else(|| PlaylogError::validation("missing field: position_seconds"))?;
        let duration = self
            .duration_seconds
            .ok_or_else(|| PlaylogError::validation("missing field: duration_seconds"))?;

        ProgressUpdate::new(
            UserId::new(user_id),
            SongId::new(song_id),
            self.song_name,
            position,
            duration,
        )
    }
}

/// A validated progress update, ready for the buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub user_id: UserId,
    pub song_id: SongId,
    pub song_name: Option<String>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
}

impl ProgressUpdate {
    /// Build an update, rejecting non-finite or negative numbers
    pub fn new(
        user_id: UserId,
        song_id: SongId,
        song_name: Option<String>,
        position_seconds: f64,
        duration_seconds: f64,
    ) -> Result<Self> {
        check_seconds("position_seconds", position_seconds)?;
        check_seconds("duration_seconds", duration_seconds)?;

        Ok(Self {
            user_id,
            song_id,
            song_name: song_name.filter(|name| !name.is_empty()),
            position_seconds,
            duration_seconds,
        })
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.user_id, self.song_id)
    }
}

fn check_seconds(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(PlaylogError::validation(format!("{field} must be finite")));
    }
    if value < 0.0 {
        return Err(PlaylogError::validation(format!(
            "{field} must not be negative"
        )));
    }
    Ok(())
}

/// The coalesced, buffered state of one `(user_id, song_id)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayProgressRecord {
    pub user_id: UserId,
    pub song_id: SongId,
    pub song_name: Option<String>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub last_touched: DateTime<Utc>,
    /// Failed durable upserts so far
    pub flush_attempts: u32,
}

impl PlayProgressRecord {
    /// Stamp an update with the time it was received
    pub fn from_update(update: ProgressUpdate, now: DateTime<Utc>) -> Self {
        Self {
            user_id: update.user_id,
            song_id: update.song_id,
            song_name: update.song_name,
            position_seconds: update.position_seconds,
            duration_seconds: update.duration_seconds,
            last_touched: now,
            flush_attempts: 0,
        }
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.user_id, self.song_id)
    }

    /// Fields written by ingestion
    ///
    /// Excludes `flush_attempts`, which only the flush path writes and which
    /// must survive a newer write.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(fields::USER_ID.to_string(), self.user_id.to_string());
        map.insert(fields::SONG_ID.to_string(), self.song_id.to_string());
        map.insert(
            fields::SONG_NAME.to_string(),
            self.song_name.clone().unwrap_or_default(),
        );
        map.insert(
            fields::POSITION.to_string(),
            self.position_seconds.to_string(),
        );
        map.insert(
            fields::DURATION.to_string(),
            self.duration_seconds.to_string(),
        );
        map.insert(
            fields::LAST_UPDATE.to_string(),
            fields::encode_timestamp(self.last_touched),
        );
        map
    }

    /// Convert a buffered field map into a record
    ///
    /// Ids are required. Missing position or duration read as zero and a
    /// missing or unreadable `last_update` reads as the Unix epoch, so such a
    /// record is always stale and gets flushed rather than stranded.
    pub fn from_fields(key: &str, map: &FieldMap) -> Result<Self> {
        let user_id = parse_required::<i64>(key, map, fields::USER_ID)?;
        let song_id = parse_required::<i64>(key, map, fields::SONG_ID)?;
        let position_seconds = parse_or_zero(key, map, fields::POSITION)?;
        let duration_seconds = parse_or_zero(key, map, fields::DURATION)?;
        let last_touched = map
            .get(fields::LAST_UPDATE)
            .and_then(|raw| fields::decode_timestamp(raw))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let flush_attempts = map
            .get(fields::FLUSH_ATTEMPTS)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        let song_name = map
            .get(fields::SONG_NAME)
            .filter(|name| !name.is_empty())
            .cloned();

        Ok(Self {
            user_id: UserId::new(user_id),
            song_id: SongId::new(song_id),
            song_name,
            position_seconds,
            duration_seconds,
            last_touched,
            flush_attempts,
        })
    }
}

fn parse_required<T: std::str::FromStr>(key: &str, map: &FieldMap, field: &str) -> Result<T> {
    let raw = map
        .get(field)
        .ok_or_else(|| PlaylogError::malformed(key, format!("missing {field}")))?;
    raw.trim()
        .parse()
        .map_err(|_| PlaylogError::malformed(key, format!("unreadable {field}: {raw:?}")))
}

fn parse_or_zero(key: &str, map: &FieldMap, field: &str) -> Result<f64> {
    match map.get(field) {
        None => Ok(0.0),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| PlaylogError::malformed(key, format!("unreadable {field}: {raw:?}"))),
    }
}
