use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::PersistedRecord;

/// Vector derived from a record's embeddable fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingVector {
    record_id: String,
    vector: Vec<f32>,
    content_hash_at_embedding: String,
    model: String,
}

impl EmbeddingVector {
    pub fn new(
        record_id: impl Into<String>,
        vector: Vec<f32>,
        content_hash_at_embedding: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            vector,
            content_hash_at_embedding: content_hash_at_embedding.into(),
            model: model.into(),
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn content_hash_at_embedding(&self) -> &str {
        &self.content_hash_at_embedding
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }

    /// Stable vector-index key for this record.
    pub fn point_id(&self) -> String {
        point_id_for(&self.record_id)
    }
}

/// Maps a source record id to a UUID v5 so repeated writes hit the same point.
pub fn point_id_for(record_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, record_id.as_bytes()).to_string()
}

/// Payload stored next to a vector: identity, provenance and the record fields.
pub fn vector_payload(record: &PersistedRecord, embedding: &EmbeddingVector) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        "record_id".to_string(),
        Value::String(record.id().to_string()),
    );
    payload.insert(
        "content_hash".to_string(),
        Value::String(embedding.content_hash_at_embedding().to_string()),
    );
    payload.insert(
        "model".to_string(),
        Value::String(embedding.model().to_string()),
    );
    payload.insert("fields".to_string(), Value::Object(record.fields().clone()));
    payload
}

/// Configuration for the embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    model_name: String,
    dimensions: usize,
}

impl EmbeddingConfig {
    pub fn new(model_name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimensions,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::new("mock-embedding", 384)
    }
}
