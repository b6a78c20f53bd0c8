use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use tracing::debug;

use crate::application::EmbeddingService;
use crate::domain::{DomainError, EmbeddingConfig};

/// Deterministic embedding service seeded from the text hash.
pub struct MockEmbedding {
    config: EmbeddingConfig,
    output_dimensions: usize,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_config(EmbeddingConfig::default())
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self::with_config(EmbeddingConfig::new("mock-embedding", dimensions))
    }

    pub fn with_config(config: EmbeddingConfig) -> Self {
        Self {
            output_dimensions: config.dimensions(),
            config,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Produce vectors of a length other than the configured one.
    pub fn with_output_dimensions(mut self, dimensions: usize) -> Self {
        self.output_dimensions = dimensions;
        self
    }

    /// Fail every request containing a text that contains `pattern`.
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    /// Number of texts embedded so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, text: &str) -> Result<(), DomainError> {
        match &self.fail_on {
            Some(pattern) if text.contains(pattern.as_str()) => Err(DomainError::embedding(
                format!("mock embedding refused text containing '{}'", pattern),
            )),
            _ => Ok(()),
        }
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        self.config.model_name().hash(&mut hasher);
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut vector: Vec<f32> = (0..self.output_dimensions)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vector {
                *x /= magnitude;
            }
        }

        vector
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedding {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        self.check(text)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.generate_embedding(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        for text in texts {
            self.check(text)?;
        }
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);

        let results: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| self.generate_embedding(text))
            .collect();

        debug!("Generated {} mock embeddings", results.len());

        Ok(results)
    }

    fn config(&self) -> &EmbeddingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_consistency() {
        let service = MockEmbedding::new();

        let embedding1 = service.embed_text("hello world").await.unwrap();
        let embedding2 = service.embed_text("hello world").await.unwrap();

        assert_eq!(embedding1, embedding2);
    }

    #[tokio::test]
    async fn test_mock_embedding_dimensions() {
        let service = MockEmbedding::with_dimensions(128);

        let embedding = service.embed_text("test").await.unwrap();

        assert_eq!(embedding.len(), 128);
    }

    #[tokio::test]
    async fn test_mock_embedding_normalized() {
        let service = MockEmbedding::new();

        let embedding = service.embed_text("test").await.unwrap();
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

        assert!((magnitude - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_model_name_changes_vectors() {
        let a = MockEmbedding::with_config(EmbeddingConfig::new("model-a", 16));
        let b = MockEmbedding::with_config(EmbeddingConfig::new("model-b", 16));

        assert_ne!(
            a.embed_text("same").await.unwrap(),
            b.embed_text("same").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_failing_pattern_rejects_whole_batch() {
        let service = MockEmbedding::new().failing_on("bad");
        let texts = vec!["good".to_string(), "bad text".to_string()];

        assert!(service.embed_texts(&texts).await.is_err());
        assert!(service.embed_text("good").await.is_ok());
        assert_eq!(service.call_count(), 1);
    }
}
