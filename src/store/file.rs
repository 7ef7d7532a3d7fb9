use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::SessionStore;
use crate::errors::StoreError;
use crate::session::{Session, SessionSummary};

/// File-per-session JSON backend. Survives restarts; suitable for a single
/// process working out of a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (or create) the session directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Ids are generated internally, but this store is also reachable with
        // caller-supplied ids over the API; refuse anything path-like.
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(StoreError::Backend(format!("Invalid session id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn read_session(path: &Path) -> Result<Session, StoreError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All sessions on disk, skipping files that fail to parse (logged).
    fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_session(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.path_for(&session.id)?;
        let json = serde_json::to_string_pretty(session)?;
        // Write-then-rename so a crash mid-write never leaves a torn record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session, StoreError> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Self::read_session(&path)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries: Vec<SessionSummary> =
            self.load_all()?.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Backend(format!("Invalid TTL: {}", e)))?;
        let mut removed = 0;
        for session in self.load_all()? {
            if session.updated_at < cutoff {
                let path = self.path_for(&session.id)?;
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
