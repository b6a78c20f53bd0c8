use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Whether a persisted record's vector matches its current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    /// Never embedded.
    #[default]
    Pending,
    Current,
    /// Embedded from an older content hash.
    Stale,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Current => "current",
            EmbeddingStatus::Stale => "stale",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => EmbeddingStatus::Pending,
            "current" => EmbeddingStatus::Current,
            "stale" => EmbeddingStatus::Stale,
            unknown => {
                warn!(
                    "Unknown embedding status '{}', treating record as stale",
                    unknown
                );
                EmbeddingStatus::Stale
            }
        }
    }
}

impl std::fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of writing one canonical record into the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Relational-store row mirroring a canonical record plus sync bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    id: String,
    fields: Map<String, Value>,
    content_hash: String,
    source_version: i64,
    embedding_status: EmbeddingStatus,
    embedded_hash: Option<String>,
    created_at: i64,
    last_synced_at: i64,
}

impl PersistedRecord {
    /// Reconstitutes from persisted data (used by adapters).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: String,
        fields: Map<String, Value>,
        content_hash: String,
        source_version: i64,
        embedding_status: EmbeddingStatus,
        embedded_hash: Option<String>,
        created_at: i64,
        last_synced_at: i64,
    ) -> Self {
        Self {
            id,
            fields,
            content_hash,
            source_version,
            embedding_status,
            embedded_hash,
            created_at,
            last_synced_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source_version(&self) -> i64 {
        self.source_version
    }

    pub fn embedding_status(&self) -> EmbeddingStatus {
        self.embedding_status
    }

    pub fn embedded_hash(&self) -> Option<&str> {
        self.embedded_hash.as_deref()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn last_synced_at(&self) -> i64 {
        self.last_synced_at
    }

    pub fn needs_embedding(&self) -> bool {
        self.embedding_status != EmbeddingStatus::Current
    }
}

/// Decides how an incoming record changes a stored row.
///
/// `stored` is `(content_hash, source_version)` of the existing row, if any.
/// An incoming record older than the stored one (both versions known) is
/// ignored and reported as unchanged.
pub fn classify_upsert(
    stored: Option<(&str, i64)>,
    incoming_hash: &str,
    incoming_version: i64,
) -> (UpsertOutcome, bool) {
    match stored {
        None => (UpsertOutcome::Inserted, true),
        Some((_, stored_version))
            if stored_version > 0 && incoming_version > 0 && incoming_version < stored_version =>
        {
            (UpsertOutcome::Unchanged, false)
        }
        Some((stored_hash, _)) if stored_hash == incoming_hash => (UpsertOutcome::Unchanged, true),
        Some(_) => (UpsertOutcome::Updated, true),
    }
}

pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_unknown() {
        for status in [
            EmbeddingStatus::Pending,
            EmbeddingStatus::Current,
            EmbeddingStatus::Stale,
        ] {
            assert_eq!(EmbeddingStatus::from_str(status.as_str()), status);
        }
        assert_eq!(EmbeddingStatus::from_str("bogus"), EmbeddingStatus::Stale);
    }

    #[test]
    fn test_classify_new_record_is_inserted() {
        assert_eq!(classify_upsert(None, "h", 0), (UpsertOutcome::Inserted, true));
    }

    #[test]
    fn test_classify_same_hash_is_unchanged_but_written() {
        assert_eq!(
            classify_upsert(Some(("h", 1)), "h", 2),
            (UpsertOutcome::Unchanged, true)
        );
    }

    #[test]
    fn test_classify_different_hash_is_updated() {
        assert_eq!(
            classify_upsert(Some(("h1", 1)), "h2", 2),
            (UpsertOutcome::Updated, true)
        );
    }

    #[test]
    fn test_classify_older_version_is_ignored() {
        assert_eq!(
            classify_upsert(Some(("h1", 10)), "h2", 5),
            (UpsertOutcome::Unchanged, false)
        );
        // Unknown versions fall back to hash comparison.
        assert_eq!(
            classify_upsert(Some(("h1", 10)), "h2", 0),
            (UpsertOutcome::Updated, true)
        );
    }
}
