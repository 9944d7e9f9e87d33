use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error reading state: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid state JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bookmark `{0}` is neither an epoch value nor an RFC 3339 timestamp")]
    InvalidBookmark(String),
}

/// A single checkpoint value. Fireflies streams store either raw epoch
/// numbers or formatted timestamps, so both shapes round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BookmarkValue {
    Epoch(i64),
    Timestamp(String),
}

impl BookmarkValue {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        BookmarkValue::Timestamp(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Parses the timestamp variant; epoch values are returned as-is and
    /// must be interpreted by the caller, who knows the unit.
    pub fn parse_timestamp(&self) -> Result<DateTime<Utc>, StateError> {
        match self {
            BookmarkValue::Timestamp(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| StateError::InvalidBookmark(s.clone())),
            BookmarkValue::Epoch(n) => Err(StateError::InvalidBookmark(n.to_string())),
        }
    }
}

pub type StreamBookmarks = BTreeMap<String, BookmarkValue>;

/// Bookmark Store: one checkpoint per stream keyed by replication key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamBookmarks>,
    #[serde(default)]
    pub currently_syncing: Option<String>,
}

impl State {
    /// Builds a state from raw JSON, upgrading legacy flat bookmarks
    /// (`{"transcripts": "2024-03-01T10:00:00Z"}`) into the nested
    /// `{"transcripts": {"<replication_key>": "..."}}` shape.
    /// `replication_key_for` resolves the key for a stream name; a legacy
    /// bookmark for a stream without one (full-table or no longer known)
    /// is dropped with a warning.
    pub fn from_value<F>(mut raw: Value, replication_key_for: F) -> Result<Self, StateError>
    where
        F: Fn(&str) -> Option<&'static str>,
    {
        if let Some(bookmarks) = raw.get_mut("bookmarks").and_then(Value::as_object_mut) {
            let mut stale = Vec::new();

            for (stream, bookmark) in bookmarks.iter_mut() {
                if !(bookmark.is_string() || bookmark.is_number()) {
                    continue;
                }
                let Some(key) = replication_key_for(stream) else {
                    warn!(
                        "Dropping legacy bookmark {} for stream {}: no replication key",
                        bookmark, stream
                    );
                    stale.push(stream.clone());
                    continue;
                };
                let legacy = bookmark.take();
                let mut nested = serde_json::Map::new();
                nested.insert(key.to_string(), legacy);
                *bookmark = Value::Object(nested);
            }

            for stream in stale {
                bookmarks.remove(&stream);
            }
        }

        Ok(serde_json::from_value(raw)?)
    }

    pub fn load<F>(path: &Path, replication_key_for: F) -> Result<Self, StateError>
    where
        F: Fn(&str) -> Option<&'static str>,
    {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_value(serde_json::from_str(&raw)?, replication_key_for)
    }

    pub fn get_bookmark(&self, stream: &str, key: &str) -> Option<&BookmarkValue> {
        self.bookmarks.get(stream).and_then(|b| b.get(key))
    }

    pub fn set_bookmark(&mut self, stream: &str, key: &str, value: BookmarkValue) {
        self.bookmarks
            .entry(stream.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn set_currently_syncing(&mut self, stream: Option<&str>) {
        self.currently_syncing = stream.map(str::to_string);
    }
}
