use std::sync::Arc;

use crate::application::{CursorRepository, RecordRepository, VectorRepository};
use crate::domain::{DomainError, SyncStatus};

pub struct SyncStatusUseCase {
    records: Arc<dyn RecordRepository>,
    cursors: Arc<dyn CursorRepository>,
    vectors: Arc<dyn VectorRepository>,
}

impl SyncStatusUseCase {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        cursors: Arc<dyn CursorRepository>,
        vectors: Arc<dyn VectorRepository>,
    ) -> Self {
        Self {
            records,
            cursors,
            vectors,
        }
    }

    pub async fn execute(&self) -> Result<SyncStatus, DomainError> {
        Ok(SyncStatus {
            records: self.records.status_counts().await?,
            vectors: self.vectors.count().await?,
            cursors: self.cursors.list().await?,
        })
    }
}
