use serde::{Deserialize, Serialize};

/// Which edges of the pipeline a run drives.
///
/// `endpoint: None` means every configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum RunMode {
    ApiToPostgres { endpoint: Option<String> },
    PostgresToQdrant,
    FullSync { endpoint: Option<String> },
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::ApiToPostgres { .. } => "api-to-postgres",
            RunMode::PostgresToQdrant => "postgres-to-qdrant",
            RunMode::FullSync { .. } => "full-sync",
        }
    }

    pub fn extracts(&self) -> bool {
        matches!(self, RunMode::ApiToPostgres { .. } | RunMode::FullSync { .. })
    }

    pub fn embeds(&self) -> bool {
        matches!(self, RunMode::PostgresToQdrant | RunMode::FullSync { .. })
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RunMode::ApiToPostgres { endpoint } | RunMode::FullSync { endpoint } => {
                endpoint.as_deref()
            }
            RunMode::PostgresToQdrant => None,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_edges() {
        let extract = RunMode::ApiToPostgres { endpoint: None };
        assert!(extract.extracts() && !extract.embeds());

        assert!(!RunMode::PostgresToQdrant.extracts());
        assert!(RunMode::PostgresToQdrant.embeds());

        let full = RunMode::FullSync {
            endpoint: Some("/products".to_string()),
        };
        assert!(full.extracts() && full.embeds());
        assert_eq!(full.endpoint(), Some("/products"));
        assert_eq!(full.to_string(), "full-sync");
    }
}
