use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::application::{EmbeddingService, RetryPolicy};
use crate::domain::{DomainError, EmbeddingVector, PersistedRecord, RecordNormalizer};

/// Derives vectors from the embeddable fields of persisted records.
pub struct EmbeddingDeriver {
    service: Arc<dyn EmbeddingService>,
    normalizer: RecordNormalizer,
    retry: RetryPolicy,
    concurrency: usize,
}

impl EmbeddingDeriver {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        normalizer: RecordNormalizer,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            service,
            normalizer,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn model(&self) -> &str {
        self.service.config().model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.service.config().dimensions()
    }

    pub async fn embed_record(
        &self,
        record: &PersistedRecord,
    ) -> Result<EmbeddingVector, DomainError> {
        let text = self.text_for(record)?;
        self.embed_with_text(record, &text).await
    }

    /// Embeds a batch with one service call, falling back to per-record calls
    /// when the batch call fails.
    ///
    /// Returns one result per input record, in input order. A fatal error from
    /// the service is returned as the outer `Err`.
    pub async fn embed_batch(
        &self,
        records: &[PersistedRecord],
    ) -> Result<Vec<Result<EmbeddingVector, DomainError>>, DomainError> {
        let mut results: Vec<Option<Result<EmbeddingVector, DomainError>>> =
            records.iter().map(|_| None).collect();
        let mut pending: Vec<(usize, String)> = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            match self.text_for(record) {
                Ok(text) => pending.push((index, text)),
                Err(e) => results[index] = Some(Err(e)),
            }
        }

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
            let batch = self
                .retry
                .run("embed batch", || self.service.embed_texts(&texts))
                .await;

            match batch {
                Ok(vectors) if vectors.len() == texts.len() => {
                    for ((index, _), vector) in pending.iter().zip(vectors) {
                        results[*index] = Some(self.build(&records[*index], vector));
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                other => {
                    match other {
                        Ok(vectors) => warn!(
                            "Embedding service returned {} vectors for {} texts, retrying per record",
                            vectors.len(),
                            texts.len()
                        ),
                        Err(e) => warn!("Batch embedding failed, retrying per record: {}", e),
                    }

                    let fallback: Vec<(usize, Result<EmbeddingVector, DomainError>)> =
                        stream::iter(pending)
                            .map(|(index, text)| async move {
                                let result = self.embed_with_text(&records[index], &text).await;
                                (index, result)
                            })
                            .buffer_unordered(self.concurrency)
                            .collect()
                            .await;

                    let mut fatal = None;
                    for (index, result) in fallback {
                        match result {
                            Err(e) if e.is_fatal() => fatal = Some(e),
                            other => results[index] = Some(other),
                        }
                    }
                    if let Some(e) = fatal {
                        return Err(e);
                    }
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(DomainError::internal("record was not embedded")))
            })
            .collect())
    }

    fn text_for(&self, record: &PersistedRecord) -> Result<String, DomainError> {
        let text = self.normalizer.embedding_text(record.fields());
        if text.is_empty() {
            return Err(DomainError::validation(format!(
                "[{}] no embeddable content",
                record.id()
            )));
        }
        Ok(text)
    }

    async fn embed_with_text(
        &self,
        record: &PersistedRecord,
        text: &str,
    ) -> Result<EmbeddingVector, DomainError> {
        let what = format!("embed {}", record.id());
        let vector = self
            .retry
            .run(&what, || self.service.embed_text(text))
            .await?;
        self.build(record, vector)
    }

    fn build(
        &self,
        record: &PersistedRecord,
        vector: Vec<f32>,
    ) -> Result<EmbeddingVector, DomainError> {
        let expected = self.dimensions();
        if vector.len() != expected {
            return Err(DomainError::embedding(format!(
                "[{}] expected {} dimensions, got {}",
                record.id(),
                expected,
                vector.len()
            )));
        }

        debug!("Embedded {} ({} dims)", record.id(), vector.len());
        Ok(EmbeddingVector::new(
            record.id(),
            vector,
            record.content_hash(),
            self.model(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockEmbedding;
    use crate::domain::{compute_content_hash, EmbeddingStatus, RecordSchema};
    use serde_json::{json, Map, Value};

    fn record(id: &str, name: Option<&str>) -> PersistedRecord {
        let mut fields = Map::new();
        fields.insert("sku".to_string(), json!(id));
        fields.insert(
            "name".to_string(),
            name.map(|n| json!(n)).unwrap_or(Value::Null),
        );
        let hash = compute_content_hash(&fields, RecordSchema::default().embeddable_fields());
        PersistedRecord::reconstitute(
            id.to_string(),
            fields,
            hash,
            0,
            EmbeddingStatus::Pending,
            None,
            0,
            0,
        )
    }

    fn deriver(service: Arc<MockEmbedding>) -> EmbeddingDeriver {
        EmbeddingDeriver::new(
            service,
            RecordNormalizer::default(),
            RetryPolicy::immediate(1),
            2,
        )
    }

    #[tokio::test]
    async fn test_embed_record_carries_hash_and_model() {
        let deriver = deriver(Arc::new(MockEmbedding::new()));
        let record = record("A", Some("Blue Shirt"));

        let embedding = deriver.embed_record(&record).await.unwrap();

        assert_eq!(embedding.record_id(), "A");
        assert_eq!(embedding.content_hash_at_embedding(), record.content_hash());
        assert_eq!(embedding.model(), "mock-embedding");
        assert_eq!(embedding.dimensions(), 384);
    }

    #[tokio::test]
    async fn test_embed_is_deterministic() {
        let deriver = deriver(Arc::new(MockEmbedding::new()));
        let record = record("A", Some("Blue Shirt"));

        let first = deriver.embed_record(&record).await.unwrap();
        let second = deriver.embed_record(&record).await.unwrap();
        assert_eq!(first.vector(), second.vector());
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_reports_empty_text() {
        let deriver = deriver(Arc::new(MockEmbedding::new()));
        let records = vec![record("A", Some("one")), record("B", None), record("C", Some("three"))];

        let results = deriver.embed_batch(&records).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().record_id(), "A");
        assert!(results[1].as_ref().unwrap_err().is_validation());
        assert_eq!(results[2].as_ref().unwrap().record_id(), "C");
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_per_record() {
        let service = Arc::new(MockEmbedding::new().failing_on("poison"));
        let deriver = deriver(service);
        let records = vec![record("A", Some("fine")), record("B", Some("poison pill"))];

        let results = deriver.embed_batch(&records).await.unwrap();

        assert!(results[0].is_ok());
        assert!(!results[1].as_ref().unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_wrong_dimensions_are_rejected() {
        let service = MockEmbedding::with_config(crate::domain::EmbeddingConfig::new(
            "mock-embedding",
            8,
        ))
        .with_output_dimensions(4);
        let deriver = deriver(Arc::new(service));

        let err = deriver
            .embed_record(&record("A", Some("x")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 8 dimensions"));
    }
}
