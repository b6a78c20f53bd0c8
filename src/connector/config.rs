use std::time::Duration;

use crate::application::RetryPolicy;
use crate::domain::{DomainError, EmbeddingConfig, RecordSchema};

/// Runtime settings read from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_timeout: Duration,
    pub api_max_retries: usize,
    pub api_page_size: usize,
    pub endpoints: Vec<String>,

    /// PostgreSQL connection string. DuckDB under the data dir when unset.
    pub database_url: Option<String>,

    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,

    pub embedding_api_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    pub batch_size: usize,
    pub schema: RecordSchema,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: usize| -> Result<usize, DomainError> {
            match get(key) {
                Some(value) => value.parse::<usize>().map_err(|_| {
                    DomainError::fatal_config(format!("{} must be a number, got '{}'", key, value))
                }),
                None => Ok(default),
            }
        };
        let list = |key: &str| {
            get(key).map(|value| {
                value
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect::<Vec<_>>()
            })
        };

        let defaults = RecordSchema::default();
        let id_field = get("RECORD_ID_FIELD").unwrap_or_else(|| defaults.id_field().to_string());
        let embeddable =
            list("EMBEDDABLE_FIELDS").unwrap_or_else(|| defaults.embeddable_fields().to_vec());
        let required =
            list("REQUIRED_FIELDS").unwrap_or_else(|| defaults.required_fields().to_vec());
        let mut schema = RecordSchema::new(id_field, embeddable).with_required_fields(required);
        match get("VERSION_FIELD") {
            Some(field) => schema = schema.with_version_field(field),
            None => {
                if let Some(field) = defaults.version_field() {
                    schema = schema.with_version_field(field);
                }
            }
        }
        if schema.embeddable_fields().is_empty() {
            return Err(DomainError::fatal_config("EMBEDDABLE_FIELDS must not be empty"));
        }

        let endpoints = list("SYNC_ENDPOINTS").unwrap_or_else(|| vec!["/products".to_string()]);

        Ok(Self {
            api_base_url: get("API_BASE_URL"),
            api_key: get("API_KEY"),
            api_timeout: Duration::from_secs(number("API_TIMEOUT", 30)? as u64),
            api_max_retries: number("API_MAX_RETRIES", 3)?,
            api_page_size: number("API_PAGE_SIZE", 100)?.max(1),
            endpoints,
            database_url: get("DATABASE_URL"),
            qdrant_url: get_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: get("QDRANT_API_KEY"),
            qdrant_collection: get_or("QDRANT_COLLECTION", "products"),
            embedding_api_url: get_or(
                "EMBEDDING_API_URL",
                "https://api.voyageai.com/v1/embeddings",
            ),
            embedding_api_key: get("EMBEDDING_API_KEY").or_else(|| get("VOYAGE_API_KEY")),
            embedding_model: get_or("EMBEDDING_MODEL", "voyage-3"),
            embedding_dimensions: number("EMBEDDING_DIMENSIONS", 1024)?,
            batch_size: number("BATCH_SIZE", 50)?.max(1),
            schema,
            log_level: get_or("LOG_LEVEL", "info"),
        })
    }

    pub fn require_api_base_url(&self) -> Result<&str, DomainError> {
        self.api_base_url
            .as_deref()
            .ok_or_else(|| DomainError::fatal_config("API_BASE_URL is not set"))
    }

    pub fn require_embedding_api_key(&self) -> Result<&str, DomainError> {
        self.embedding_api_key.as_deref().ok_or_else(|| {
            DomainError::fatal_config("EMBEDDING_API_KEY (or VOYAGE_API_KEY) is not set")
        })
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig::new(self.embedding_model.clone(), self.embedding_dimensions)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.api_max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, DomainError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();

        assert!(settings.api_base_url.is_none());
        assert_eq!(settings.api_timeout, Duration::from_secs(30));
        assert_eq!(settings.api_max_retries, 3);
        assert_eq!(settings.api_page_size, 100);
        assert_eq!(settings.endpoints, vec!["/products".to_string()]);
        assert_eq!(settings.qdrant_url, "http://localhost:6333");
        assert_eq!(settings.qdrant_collection, "products");
        assert_eq!(settings.embedding_model, "voyage-3");
        assert_eq!(settings.embedding_dimensions, 1024);
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.schema, RecordSchema::default());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_overrides_and_lists() {
        let settings = settings(&[
            ("API_BASE_URL", "https://api.example.com"),
            ("SYNC_ENDPOINTS", "/products, /services,,"),
            ("EMBEDDABLE_FIELDS", "title,body"),
            ("RECORD_ID_FIELD", "id"),
            ("REQUIRED_FIELDS", "id"),
            ("BATCH_SIZE", "10"),
            ("LOG_LEVEL", "warn"),
        ])
        .unwrap();

        assert_eq!(settings.require_api_base_url().unwrap(), "https://api.example.com");
        assert_eq!(settings.endpoints, vec!["/products", "/services"]);
        assert_eq!(settings.schema.id_field(), "id");
        assert_eq!(settings.schema.embeddable_fields(), &["title", "body"]);
        assert_eq!(settings.schema.required_fields(), &["id"]);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.log_level, "warn");
    }

    #[test]
    fn test_voyage_key_fallback() {
        let fallback = settings(&[("VOYAGE_API_KEY", "vk")]).unwrap();
        assert_eq!(fallback.require_embedding_api_key().unwrap(), "vk");

        let both = settings(&[("VOYAGE_API_KEY", "vk"), ("EMBEDDING_API_KEY", "primary")]).unwrap();
        assert_eq!(both.require_embedding_api_key().unwrap(), "primary");
    }

    #[test]
    fn test_malformed_numbers_are_fatal() {
        let err = settings(&[("API_PAGE_SIZE", "lots")]).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("API_PAGE_SIZE"));
    }

    #[test]
    fn test_missing_required_values_are_fatal() {
        let settings = settings(&[("API_BASE_URL", "  ")]).unwrap();
        assert!(settings.require_api_base_url().unwrap_err().is_fatal());
        assert!(settings.require_embedding_api_key().unwrap_err().is_fatal());
    }
}
