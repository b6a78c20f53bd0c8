use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::VectorRepository;
use crate::domain::{point_id_for, vector_payload, DomainError, EmbeddingVector, PersistedRecord};

/// A point as held by [`InMemoryVectorRepository`].
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub embedding: EmbeddingVector,
    pub payload: Map<String, Value>,
}

/// Vector index kept in process memory, keyed by point id.
///
/// Counts every point write so callers can assert idempotent runs.
pub struct InMemoryVectorRepository {
    points: Arc<Mutex<HashMap<String, StoredPoint>>>,
    writes: AtomicU64,
    dimensions: Mutex<Option<usize>>,
    fail_writes: AtomicU64,
}

impl InMemoryVectorRepository {
    pub fn new() -> Self {
        Self {
            points: Arc::new(Mutex::new(HashMap::new())),
            writes: AtomicU64::new(0),
            dimensions: Mutex::new(None),
            fail_writes: AtomicU64::new(0),
        }
    }

    /// Total number of points written since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes the next `count` batch writes fail with a transient error.
    pub fn fail_next_writes(&self, count: u64) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    pub async fn get(&self, record_id: &str) -> Option<StoredPoint> {
        let points = self.points.lock().await;
        points.get(&point_id_for(record_id)).cloned()
    }
}

impl Default for InMemoryVectorRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorRepository for InMemoryVectorRepository {
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), DomainError> {
        let mut current = self.dimensions.lock().await;
        match *current {
            Some(existing) if existing != dimensions => Err(DomainError::fatal_config(format!(
                "collection has {} dimensions but the model produces {}",
                existing, dimensions
            ))),
            Some(_) => Ok(()),
            None => {
                *current = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn upsert_batch(
        &self,
        records: &[PersistedRecord],
        embeddings: &[EmbeddingVector],
    ) -> Result<(), DomainError> {
        if records.len() != embeddings.len() {
            return Err(DomainError::internal(format!(
                "{} records but {} embeddings",
                records.len(),
                embeddings.len()
            )));
        }

        let remaining_failures = self.fail_writes.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.fail_writes
                .store(remaining_failures - 1, Ordering::SeqCst);
            return Err(DomainError::transient("simulated vector write failure"));
        }

        let mut points = self.points.lock().await;
        for (record, embedding) in records.iter().zip(embeddings) {
            points.insert(
                embedding.point_id(),
                StoredPoint {
                    embedding: embedding.clone(),
                    payload: vector_payload(record, embedding),
                },
            );
        }
        self.writes
            .fetch_add(records.len() as u64, Ordering::SeqCst);

        debug!("Saved {} points to memory", records.len());
        Ok(())
    }

    async fn update_payloads(&self, records: &[PersistedRecord]) -> Result<u64, DomainError> {
        let mut points = self.points.lock().await;
        let mut updated = 0;
        for record in records {
            if let Some(point) = points.get_mut(&point_id_for(record.id())) {
                point
                    .payload
                    .insert("fields".to_string(), Value::Object(record.fields().clone()));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, record_ids: &[String]) -> Result<u64, DomainError> {
        let mut points = self.points.lock().await;
        let deleted = record_ids
            .iter()
            .filter(|id| points.remove(&point_id_for(id)).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn list_record_ids(&self) -> Result<Vec<String>, DomainError> {
        let points = self.points.lock().await;
        let mut ids: Vec<String> = points
            .values()
            .map(|point| point.embedding.record_id().to_string())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self) -> Result<u64, DomainError> {
        let points = self.points.lock().await;
        Ok(points.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EmbeddingStatus;

    fn record(id: &str) -> PersistedRecord {
        record_with(id, Map::new())
    }

    fn record_with(id: &str, fields: Map<String, Value>) -> PersistedRecord {
        PersistedRecord::reconstitute(
            id.to_string(),
            fields,
            "hash".to_string(),
            0,
            EmbeddingStatus::Pending,
            None,
            0,
            0,
        )
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_record_id() {
        let repo = InMemoryVectorRepository::new();
        let records = vec![record("A")];

        repo.upsert_batch(&records, &[EmbeddingVector::new("A", vec![1.0], "h1", "m")])
            .await
            .unwrap();
        repo.upsert_batch(&records, &[EmbeddingVector::new("A", vec![2.0], "h2", "m")])
            .await
            .unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.write_count(), 2);
        let point = repo.get("A").await.unwrap();
        assert_eq!(point.embedding.vector(), &[2.0]);
        assert_eq!(point.payload["content_hash"], Value::String("h2".to_string()));
    }

    #[tokio::test]
    async fn test_payload_update_keeps_vector() {
        let repo = InMemoryVectorRepository::new();
        repo.upsert_batch(&[record("A")], &[EmbeddingVector::new("A", vec![1.0], "h", "m")])
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("price".to_string(), Value::from(99));
        let updated = repo
            .update_payloads(&[record_with("A", fields), record("missing")])
            .await
            .unwrap();

        assert_eq!(updated, 1);
        assert_eq!(repo.write_count(), 1);
        let point = repo.get("A").await.unwrap();
        assert_eq!(point.embedding.vector(), &[1.0]);
        assert_eq!(point.payload["fields"]["price"], Value::from(99));
        assert_eq!(point.payload["content_hash"], Value::String("h".to_string()));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let repo = InMemoryVectorRepository::new();
        repo.upsert_batch(
            &[record("A"), record("B")],
            &[
                EmbeddingVector::new("A", vec![1.0], "h", "m"),
                EmbeddingVector::new("B", vec![1.0], "h", "m"),
            ],
        )
        .await
        .unwrap();

        let deleted = repo
            .delete(&["A".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.list_record_ids().await.unwrap(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let repo = InMemoryVectorRepository::new();
        repo.ensure_collection(4).await.unwrap();
        repo.ensure_collection(4).await.unwrap();
        assert!(repo.ensure_collection(8).await.unwrap_err().is_fatal());
    }
}
