//! Core domain types for Playlog

mod ids;
mod play_log;
mod progress;

pub use ids::{SongId, UserId};
pub use play_log::{PersistedPlayLog, PlayHistoryEntry};
pub use progress::{
    fields, PlayProgressRecord, ProgressEvent, ProgressKey, ProgressUpdate,
};
