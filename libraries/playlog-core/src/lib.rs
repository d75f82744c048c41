//! Playlog Core
//!
//! Write-back buffering for playback progress events.
//!
//! Clients report "song X is at position P of duration D" many times per
//! minute. Writing each of those reports to the relational store would be
//! wasteful, so they land in a keyed ephemeral store first and a periodic
//! flush moves the settled ones into durable storage.
//!
//! # Architecture
//!
//! - **Write-Back Buffer** ([`WriteBackBuffer`]): coalesces events into one
//!   record per `(user_id, song_id)` and renews its time-to-live
//! - **Flusher** ([`Flusher`]): one scan-classify-upsert-delete pass over the
//!   buffer, confirm-before-delete
//! - **Reconciliation Policy** ([`ReconciliationPolicy`]): staleness, retry
//!   cutoff and read-time normalization
//! - **Play History** ([`PlayHistory`]): most-recent-first listing of a
//!   user's persisted progress
//!
//! Both stores are injected: [`KeyedStore`] for the ephemeral buffer and
//! [`PlayLogStore`] for durable storage.
//!
//! # Example
//!
//! ```rust
//! use playlog_core::{BufferConfig, MemoryStore, ProgressEvent, WriteBackBuffer};
//! use std::sync::Arc;
//!
//! # async fn example() -> playlog_core::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let buffer = WriteBackBuffer::new(store, BufferConfig::default());
//!
//! let event = ProgressEvent {
//!     user_id: Some(1),
//!     song_id: Some(100),
//!     song_name: Some("Intro".to_string()),
//!     position_seconds: Some(15.0),
//!     duration_seconds: Some(200.0),
//! };
//! buffer.record_progress(event.validate()?).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod buffer;
pub mod error;
pub mod flush;
pub mod history;
pub mod policy;
pub mod store;
pub mod types;

pub use buffer::{BufferConfig, WriteBackBuffer};
pub use error::{PlaylogError, Result};
pub use flush::{FlushReport, Flusher};
pub use history::{PlayHistory, RECENT_HISTORY_LIMIT};
pub use policy::{Freshness, ReconciliationPolicy};
pub use store::{FieldMap, KeyedStore, MemoryStore, PlayLogStore};
pub use types::{
    PersistedPlayLog, PlayHistoryEntry, PlayProgressRecord, ProgressEvent, ProgressKey,
    ProgressUpdate, SongId, UserId,
};
