//! Durable keyed storage for sessions, pluggable backend.
//!
//! The contract is identical across backends; callers never branch on the
//! backend type. Listing returns summaries only, so it stays cheap no matter
//! how much history a session has accumulated.

mod file;
mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::session::{Session, SessionSummary};

pub use file::FileStore;
pub use memory::InMemoryStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session record.
    async fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// Fetch a full session. `StoreError::NotFound` if the id is unknown.
    async fn get(&self, id: &str) -> Result<Session, StoreError>;

    /// Remove a session. `StoreError::NotFound` if the id is unknown.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Page through session summaries, newest first (by creation time).
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummary>, StoreError>;

    /// Drop sessions idle longer than `ttl` (by `updated_at`). Returns the
    /// number removed.
    async fn sweep_expired(&self, ttl: Duration) -> Result<usize, StoreError>;
}
