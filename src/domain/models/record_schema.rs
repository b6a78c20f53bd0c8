use serde::{Deserialize, Serialize};

/// Describes which source attributes identify, version and describe a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    id_field: String,
    /// Fields fed to the embedding model, in rendering order.
    embeddable_fields: Vec<String>,
    required_fields: Vec<String>,
    version_field: Option<String>,
}

impl RecordSchema {
    pub fn new(id_field: impl Into<String>, embeddable_fields: Vec<String>) -> Self {
        let id_field = id_field.into();
        Self {
            required_fields: vec![id_field.clone()],
            id_field,
            embeddable_fields,
            version_field: None,
        }
    }

    pub fn with_required_fields(mut self, fields: Vec<String>) -> Self {
        self.required_fields = fields;
        self
    }

    pub fn with_version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn embeddable_fields(&self) -> &[String] {
        &self.embeddable_fields
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    pub fn version_field(&self) -> Option<&str> {
        self.version_field.as_deref()
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::new(
            "sku",
            vec![
                "name".to_string(),
                "description".to_string(),
                "category".to_string(),
            ],
        )
        .with_required_fields(vec!["sku".to_string(), "name".to_string()])
        .with_version_field("updated_at")
    }
}
