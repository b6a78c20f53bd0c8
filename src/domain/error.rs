use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    /// Network hiccups, timeouts, throttling. Retried with backoff.
    #[error("Transient I/O error: {0}")]
    Transient(String),

    /// A malformed record from the source. The record is skipped.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication, schema or configuration mismatch. Aborts the run.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    /// The vector write was acknowledged but the status flip was not persisted.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fatal_config(msg: impl Into<String>) -> Self {
        Self::FatalConfig(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalConfig(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Self::StorageError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers_match_variants() {
        assert!(DomainError::transient("timeout").is_transient());
        assert!(DomainError::fatal_config("401").is_fatal());
        assert!(DomainError::validation("missing id").is_validation());
        assert!(!DomainError::storage("locked").is_transient());
        assert!(!DomainError::consistency("flip").is_fatal());
    }

    #[test]
    fn display_includes_category() {
        let err = DomainError::fatal_config("API responded with 401");
        assert_eq!(
            err.to_string(),
            "Fatal configuration error: API responded with 401"
        );
    }
}
