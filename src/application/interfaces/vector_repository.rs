use async_trait::async_trait;

use crate::domain::{DomainError, EmbeddingVector, PersistedRecord};

/// Vector index keyed by record id.
#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Creates the collection when it does not exist yet.
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), DomainError>;

    /// Writes one point per record, replacing any previous point for the id.
    async fn upsert_batch(
        &self,
        records: &[PersistedRecord],
        embeddings: &[EmbeddingVector],
    ) -> Result<(), DomainError>;

    /// Overwrites the record fields in the payload of existing points without
    /// touching their vectors. Returns the number of points updated.
    async fn update_payloads(&self, records: &[PersistedRecord]) -> Result<u64, DomainError>;

    async fn delete(&self, record_ids: &[String]) -> Result<u64, DomainError>;

    async fn list_record_ids(&self) -> Result<Vec<String>, DomainError>;

    async fn count(&self) -> Result<u64, DomainError>;
}
