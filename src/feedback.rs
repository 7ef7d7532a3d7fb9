//! User feedback on finished prompts, appended to a single JSON file.
//!
//! Feedback is advisory data, so the store is deliberately forgiving: a
//! missing file means an empty log, and a corrupt file is logged and treated
//! as empty rather than blocking new entries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How the user rated a finished prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub rating: Rating,
    pub comment: Option<String>,
}

/// File-backed feedback log. Each save rewrites the whole file; volumes are
/// small enough that this beats an append format that can tear mid-record.
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Vec<FeedbackEntry> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Failed to read feedback file");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Feedback file is corrupt; starting fresh");
                Vec::new()
            }
        }
    }

    pub fn record(
        &self,
        session_id: &str,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<FeedbackEntry> {
        let entry = FeedbackEntry {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            rating,
            comment,
        };
        let mut entries = self.load();
        entries.push(entry.clone());
        self.save(&entries)?;
        Ok(entry)
    }

    pub fn entries_for(&self, session_id: &str) -> Vec<FeedbackEntry> {
        self.load()
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect()
    }

    fn save(&self, entries: &[FeedbackEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Write via a temp file and rename so readers never see a half-written log.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempdir().unwrap();
        let log = FeedbackLog::new(dir.path().join("feedback.json"));
        assert!(log.load().is_empty());
    }

    #[test]
    fn test_record_appends_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feedback.json");
        let log = FeedbackLog::new(&path);

        log.record("sess_a", Rating::Positive, Some("great".into())).unwrap();
        log.record("sess_b", Rating::Negative, None).unwrap();

        let reopened = FeedbackLog::new(&path);
        let entries = reopened.load();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_id, "sess_a");
        assert_eq!(entries[0].rating, Rating::Positive);
        assert_eq!(entries[1].rating, Rating::Negative);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feedback.json");
        std::fs::write(&path, "{not json").unwrap();

        let log = FeedbackLog::new(&path);
        assert!(log.load().is_empty());
        // Recording over a corrupt file succeeds
        log.record("sess_a", Rating::Positive, None).unwrap();
        assert_eq!(log.load().len(), 1);
    }

    #[test]
    fn test_entries_for_filters_by_session() {
        let dir = tempdir().unwrap();
        let log = FeedbackLog::new(dir.path().join("feedback.json"));
        log.record("sess_a", Rating::Positive, None).unwrap();
        log.record("sess_b", Rating::Negative, None).unwrap();
        log.record("sess_a", Rating::Negative, None).unwrap();

        let entries = log.entries_for("sess_a");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.session_id == "sess_a"));
    }

    #[test]
    fn test_rating_serializes_lowercase() {
        let json = serde_json::to_value(Rating::Positive).unwrap();
        assert_eq!(json, "positive");
    }
}
