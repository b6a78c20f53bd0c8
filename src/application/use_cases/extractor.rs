use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::application::{RecordSource, RetryPolicy};
use crate::domain::{DomainError, RawPage};

/// Turns a paginated [`RecordSource`] into a lazy stream of pages.
pub struct Extractor {
    source: Arc<dyn RecordSource>,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(source: Arc<dyn RecordSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Streams the pages of `endpoint` strictly after `after`.
    ///
    /// The stream ends after the first page without `has_more`, or right after
    /// yielding an error. Every fetch goes through the retry policy.
    ///
    /// An empty page past a known position is reported at that position, so
    /// the endpoint is marked exhausted where its last records were.
    pub fn pages(
        &self,
        endpoint: &str,
        after: Option<String>,
    ) -> BoxStream<'static, Result<RawPage, DomainError>> {
        let source = Arc::clone(&self.source);
        let retry = self.retry.clone();
        let endpoint = endpoint.to_string();

        stream::unfold(Some(after), move |state| {
            let source = Arc::clone(&source);
            let retry = retry.clone();
            let endpoint = endpoint.clone();

            async move {
                let after = state?;
                let what = format!("fetch {}", endpoint);
                let result = retry
                    .run(&what, || source.fetch_page(&endpoint, after.as_deref()))
                    .await;

                match result {
                    Ok(page) if page.is_empty() && after.is_some() => {
                        let position = after.unwrap_or_default();
                        debug!("{} has no records after position {}", endpoint, position);
                        Some((Ok(RawPage::new(Vec::new(), position, false)), None))
                    }
                    Ok(page) => {
                        debug!(
                            "Fetched {} records from {} at position {}",
                            page.len(),
                            endpoint,
                            page.position()
                        );
                        let stalled = after.as_deref() == Some(page.position());
                        let next = if page.has_more() && !page.is_empty() && !stalled {
                            Some(Some(page.position().to_string()))
                        } else {
                            None
                        };
                        Some((Ok(page), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
        .boxed()
    }
}
