use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of raw records as returned by a source endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPage {
    records: Vec<Value>,
    /// Opaque marker covering everything up to and including this page.
    position: String,
    has_more: bool,
}

impl RawPage {
    pub fn new(records: Vec<Value>, position: impl Into<String>, has_more: bool) -> Self {
        Self {
            records,
            position: position.into(),
            has_more,
        }
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Value> {
        self.records
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
