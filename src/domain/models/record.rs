use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized representation of a source entity, independent of API wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    id: String,
    fields: Map<String, Value>,
    content_hash: String,
    source_version: i64,
}

impl CanonicalRecord {
    /// Builds a record, hashing the `embeddable` subset of `fields`.
    pub fn new(
        id: impl Into<String>,
        fields: Map<String, Value>,
        embeddable: &[String],
        source_version: i64,
    ) -> Self {
        let content_hash = compute_content_hash(&fields, embeddable);
        Self {
            id: id.into(),
            fields,
            content_hash,
            source_version,
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
}

/// Computes the SHA-256 digest of the embeddable fields.
///
/// Keys are serialized in sorted order and missing fields count as `null`, so
/// the digest depends only on the embeddable values.
pub fn compute_content_hash(fields: &Map<String, Value>, embeddable: &[String]) -> String {
    use sha2::{Digest, Sha256};

    let subset: BTreeMap<&str, &Value> = embeddable
        .iter()
        .map(|key| (key.as_str(), fields.get(key).unwrap_or(&Value::Null)))
        .collect();
    let canonical = serde_json::to_string(&subset).unwrap_or_default();

    let hash = Sha256::digest(canonical.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn embeddable() -> Vec<String> {
        vec!["name".to_string(), "description".to_string()]
    }

    #[test]
    fn test_compute_content_hash_is_deterministic() {
        let a = fields(json!({"name": "Shirt", "description": "Blue", "price": 10}));
        let hash = compute_content_hash(&a, &embeddable());

        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_content_hash(&a, &embeddable()));
    }

    #[test]
    fn test_content_hash_ignores_non_embeddable_fields() {
        let a = fields(json!({"name": "Shirt", "description": "Blue", "price": 10}));
        let b = fields(json!({"name": "Shirt", "description": "Blue", "price": 99}));

        assert_eq!(
            compute_content_hash(&a, &embeddable()),
            compute_content_hash(&b, &embeddable())
        );
    }

    #[test]
    fn test_content_hash_changes_with_embeddable_fields() {
        let a = fields(json!({"name": "A"}));
        let b = fields(json!({"name": "B"}));

        assert_ne!(
            compute_content_hash(&a, &embeddable()),
            compute_content_hash(&b, &embeddable())
        );
    }

    #[test]
    fn test_missing_field_hashes_like_null() {
        let a = fields(json!({"name": "A"}));
        let b = fields(json!({"name": "A", "description": null}));

        assert_eq!(
            compute_content_hash(&a, &embeddable()),
            compute_content_hash(&b, &embeddable())
        );
    }

    #[test]
    fn test_canonical_record_carries_hash() {
        let record = CanonicalRecord::new("R1", fields(json!({"name": "A"})), &embeddable(), 3);

        assert_eq!(record.id(), "R1");
        assert_eq!(record.source_version(), 3);
        assert_eq!(
            record.content_hash(),
            compute_content_hash(record.fields(), &embeddable())
        );
    }
}
