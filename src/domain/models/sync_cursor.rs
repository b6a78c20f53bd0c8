use serde::{Deserialize, Serialize};

use super::current_timestamp;

/// Cursor stage of the embedding pass; its position records the model in use.
pub const EMBED_STAGE: &str = "embed";

/// Durable position of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    stage: String,
    position: String,
    /// The pass that last advanced this cursor reached the end of the source.
    exhausted: bool,
    updated_at: i64,
}

impl SyncCursor {
    pub fn new(stage: impl Into<String>, position: impl Into<String>, exhausted: bool) -> Self {
        Self {
            stage: stage.into(),
            position: position.into(),
            exhausted,
            updated_at: current_timestamp(),
        }
    }

    pub fn reconstitute(stage: String, position: String, exhausted: bool, updated_at: i64) -> Self {
        Self {
            stage,
            position,
            exhausted,
            updated_at,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Position to resume extraction after, or `None` to start a fresh pass.
    pub fn resume_position(&self) -> Option<&str> {
        if self.exhausted {
            None
        } else {
            Some(&self.position)
        }
    }
}

/// Cursor stage name for extraction from `endpoint`.
pub fn extract_stage(endpoint: &str) -> String {
    format!("extract:{}", endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_position_respects_exhaustion() {
        let mid_pass = SyncCursor::new(extract_stage("/products"), "3", false);
        assert_eq!(mid_pass.resume_position(), Some("3"));

        let finished = SyncCursor::new(extract_stage("/products"), "5", true);
        assert_eq!(finished.resume_position(), None);
        assert_eq!(finished.position(), "5");
    }

    #[test]
    fn test_extract_stage_name() {
        assert_eq!(extract_stage("/products"), "extract:/products");
    }
}
