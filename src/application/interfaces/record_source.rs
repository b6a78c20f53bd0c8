use async_trait::async_trait;

use crate::domain::{DomainError, RawPage};

/// Paginated access to a remote record API.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches the page strictly after `after`, or the first page when `None`.
    async fn fetch_page(&self, endpoint: &str, after: Option<&str>)
        -> Result<RawPage, DomainError>;
}
