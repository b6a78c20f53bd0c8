use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::application::{RecordRepository, VectorRepository};
use crate::domain::DomainError;

/// Removes vectors whose record no longer exists in the relational store.
///
/// Relational rows are never touched.
pub struct SyncDeletionsUseCase {
    records: Arc<dyn RecordRepository>,
    vectors: Arc<dyn VectorRepository>,
}

impl SyncDeletionsUseCase {
    pub fn new(records: Arc<dyn RecordRepository>, vectors: Arc<dyn VectorRepository>) -> Self {
        Self { records, vectors }
    }

    pub async fn execute(&self) -> Result<u64, DomainError> {
        let known: HashSet<String> = self.records.list_ids().await?.into_iter().collect();
        let indexed = self.vectors.list_record_ids().await?;
        debug!(
            "Comparing {} indexed vectors against {} records",
            indexed.len(),
            known.len()
        );

        let orphaned: Vec<String> = indexed
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();

        if orphaned.is_empty() {
            info!("No orphaned vectors found");
            return Ok(0);
        }

        let deleted = self.vectors.delete(&orphaned).await?;
        info!("Deleted {} orphaned vectors", deleted);

        Ok(deleted)
    }
}
