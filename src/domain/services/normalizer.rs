use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{CanonicalRecord, DomainError, RecordSchema};

const MAX_ID_LENGTH: usize = 100;

/// A raw record the normalizer refused, with the id when one could be read.
#[derive(Debug)]
pub struct RejectedRecord {
    pub id: Option<String>,
    pub error: DomainError,
}

/// Output of normalizing one raw page.
#[derive(Debug, Default)]
pub struct NormalizedPage {
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<RejectedRecord>,
    /// Raw records folded into a later occurrence with the same id.
    pub duplicates: usize,
}

/// Turns raw source objects into canonical records.
///
/// Cleans text, validates identity and required fields, and derives the
/// content hash and source version according to the [`RecordSchema`].
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    schema: RecordSchema,
}

impl RecordNormalizer {
    pub fn new(schema: RecordSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn normalize(&self, raw: &Value) -> Result<CanonicalRecord, DomainError> {
        let object = raw
            .as_object()
            .ok_or_else(|| DomainError::validation("record is not a JSON object"))?;

        let fields = match clean_value(Value::Object(object.clone())) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let id = self.extract_id(&fields)?;

        for required in self.schema.required_fields() {
            if fields.get(required).map_or(true, Value::is_null) {
                return Err(DomainError::validation(format!(
                    "[{}] required field '{}' is missing",
                    id, required
                )));
            }
        }

        let source_version = self
            .schema
            .version_field()
            .and_then(|field| fields.get(field))
            .map(parse_source_version)
            .unwrap_or(0);

        Ok(CanonicalRecord::new(
            id,
            fields,
            self.schema.embeddable_fields(),
            source_version,
        ))
    }

    /// Normalizes a page, keeping the latest occurrence of each id at the
    /// position of its first occurrence.
    pub fn normalize_page(&self, raw: &[Value]) -> NormalizedPage {
        let mut page = NormalizedPage::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for value in raw {
            match self.normalize(value) {
                Ok(record) => match positions.get(record.id()) {
                    Some(&index) => {
                        page.records[index] = record;
                        page.duplicates += 1;
                    }
                    None => {
                        positions.insert(record.id().to_string(), page.records.len());
                        page.records.push(record);
                    }
                },
                Err(error) => {
                    let id = value
                        .get(self.schema.id_field())
                        .and_then(id_from_value);
                    warn!(
                        "Skipping invalid record {}: {}",
                        id.as_deref().unwrap_or("UNKNOWN"),
                        error
                    );
                    page.rejected.push(RejectedRecord { id, error });
                }
            }
        }

        if page.duplicates > 0 {
            debug!("Merged {} duplicate records in page", page.duplicates);
        }

        page
    }

    /// Renders the embeddable fields as `field: value` sentences.
    pub fn embedding_text(&self, fields: &Map<String, Value>) -> String {
        self.schema
            .embeddable_fields()
            .iter()
            .filter_map(|field| {
                let value = fields.get(field)?;
                let rendered = render_value(value)?;
                Some(format!("{}: {}", field, rendered))
            })
            .collect::<Vec<_>>()
            .join(". ")
    }

    fn extract_id(&self, fields: &Map<String, Value>) -> Result<String, DomainError> {
        let id_field = self.schema.id_field();
        let id = fields
            .get(id_field)
            .and_then(id_from_value)
            .ok_or_else(|| {
                DomainError::validation(format!("missing or empty id field '{}'", id_field))
            })?;

        if id.chars().count() > MAX_ID_LENGTH {
            return Err(DomainError::validation(format!(
                "id '{}' exceeds {} characters",
                id, MAX_ID_LENGTH
            )));
        }

        Ok(id)
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Trims strings, collapses inner whitespace and turns empty strings into null.
pub fn clean_value(value: Value) -> Value {
    match value {
        Value::String(s) => clean_text(&s).map(Value::String).unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.into_iter().map(clean_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, clean_value(value)))
                .collect(),
        ),
        other => other,
    }
}

fn clean_text(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Integers are used as is, RFC 3339 timestamps become epoch milliseconds.
/// Anything else is `0`, meaning unknown.
pub fn parse_source_version(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.parse::<i64>().unwrap_or_else(|_| {
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(0)
        }),
        _ => 0,
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::default()
    }

    #[test]
    fn test_normalize_cleans_text_fields() {
        let record = normalizer()
            .normalize(&json!({
                "sku": "  SKU-1 ",
                "name": "  Blue    Shirt ",
                "description": "   ",
                "price": 10.5
            }))
            .expect("valid record");

        assert_eq!(record.id(), "SKU-1");
        assert_eq!(record.fields()["name"], json!("Blue Shirt"));
        assert_eq!(record.fields()["description"], Value::Null);
        assert_eq!(record.fields()["price"], json!(10.5));
    }

    #[test]
    fn test_numeric_ids_are_stringified() {
        let record = normalizer()
            .normalize(&json!({"sku": 42, "name": "Hat"}))
            .expect("valid record");
        assert_eq!(record.id(), "42");
    }

    #[test]
    fn test_missing_required_field_is_validation_error() {
        let err = normalizer()
            .normalize(&json!({"sku": "SKU-1", "name": "  "}))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_missing_id_and_non_object_are_rejected() {
        assert!(normalizer()
            .normalize(&json!({"name": "No id"}))
            .unwrap_err()
            .is_validation());
        assert!(normalizer().normalize(&json!(["a"])).unwrap_err().is_validation());

        let long_id = "x".repeat(101);
        assert!(normalizer()
            .normalize(&json!({"sku": long_id, "name": "Long"}))
            .is_err());
    }

    #[test]
    fn test_normalize_page_dedups_keeping_latest() {
        let page = normalizer().normalize_page(&[
            json!({"sku": "A", "name": "first"}),
            json!({"sku": "B", "name": "other"}),
            json!({"sku": "A", "name": "second"}),
            json!({"name": "missing id"}),
        ]);

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id(), "A");
        assert_eq!(page.records[0].fields()["name"], json!("second"));
        assert_eq!(page.records[1].id(), "B");
        assert_eq!(page.duplicates, 1);
        assert_eq!(page.rejected.len(), 1);
        assert!(page.rejected[0].id.is_none());
    }

    #[test]
    fn test_source_version_parsing() {
        assert_eq!(parse_source_version(&json!(7)), 7);
        assert_eq!(parse_source_version(&json!("12")), 12);
        assert_eq!(
            parse_source_version(&json!("1970-01-01T00:00:01Z")),
            1000
        );
        assert_eq!(parse_source_version(&json!("yesterday")), 0);
        assert_eq!(parse_source_version(&Value::Null), 0);
    }

    #[test]
    fn test_embedding_text_follows_schema_order() {
        let fields = json!({
            "category": "shirts",
            "name": "Blue Shirt",
            "description": null,
            "price": 10
        });
        let text = normalizer().embedding_text(fields.as_object().unwrap());

        assert_eq!(text, "name: Blue Shirt. category: shirts");
    }

    #[test]
    fn test_embedding_text_renders_arrays() {
        let schema = RecordSchema::new("id", vec!["tags".to_string()]);
        let text = RecordNormalizer::new(schema)
            .embedding_text(json!({"tags": ["red", "cotton", 3]}).as_object().unwrap());

        assert_eq!(text, "tags: red, cotton, 3");
    }
}
