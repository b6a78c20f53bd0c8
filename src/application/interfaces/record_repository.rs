use async_trait::async_trait;

use serde_json::{Map, Value};

use crate::domain::{CanonicalRecord, DomainError, PersistedRecord, StatusCounts, UpsertOutcome};

/// Relational persistence for canonical records and their embedding status.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, DomainError>;

    /// Upserts a whole page in one transaction, one outcome per record.
    async fn upsert_batch(
        &self,
        records: &[CanonicalRecord],
    ) -> Result<Vec<UpsertOutcome>, DomainError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<PersistedRecord>, DomainError>;

    /// Rows with id greater than `after_id`, in id order. Only rows that are
    /// not `current` unless `include_current` is set.
    async fn find_for_embedding(
        &self,
        after_id: Option<&str>,
        limit: usize,
        include_current: bool,
    ) -> Result<Vec<PersistedRecord>, DomainError>;

    /// Flips a row to `current` if its content hash still equals `content_hash`.
    /// Returns whether the row was flipped.
    async fn mark_embedded(&self, id: &str, content_hash: &str) -> Result<bool, DomainError>;

    /// `current` rows whose stored fields changed since their vector payload
    /// was written, in id order after `after_id`.
    async fn find_outdated_payloads(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PersistedRecord>, DomainError>;

    /// Clears the outdated-payload flag if the stored fields still equal
    /// `fields`. Returns whether the flag was cleared.
    async fn mark_payload_refreshed(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<bool, DomainError>;

    /// Marks every `current` row `stale`. Returns the number of rows touched.
    async fn mark_all_stale(&self) -> Result<u64, DomainError>;

    async fn list_ids(&self) -> Result<Vec<String>, DomainError>;

    async fn status_counts(&self) -> Result<StatusCounts, DomainError>;
}
