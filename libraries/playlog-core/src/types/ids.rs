/// ID types for Playlog entities
use serde::{Deserialize, Serialize};
use std::fmt;

/// User identifier, supplied by the caller after external login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Create a new user ID
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Song identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(i64);

impl SongId {
    /// Create a new song ID
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for SongId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
