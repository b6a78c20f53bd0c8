use async_trait::async_trait;

use crate::domain::{DomainError, SyncCursor};

/// Persistence for per-stage sync cursors.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    async fn load(&self, stage: &str) -> Result<Option<SyncCursor>, DomainError>;

    async fn save(&self, cursor: &SyncCursor) -> Result<(), DomainError>;

    /// Deletes the cursor of `stage`. Returns whether one existed.
    async fn reset(&self, stage: &str) -> Result<bool, DomainError>;

    async fn list(&self) -> Result<Vec<SyncCursor>, DomainError>;
}
