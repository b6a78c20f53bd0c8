use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::application::RecordSource;
use crate::domain::{DomainError, RawPage};

/// In-memory record source paginated by page number, like the HTTP source.
///
/// Supports injected transient failures for exercising retry and resume paths.
pub struct StaticRecordSource {
    page_size: usize,
    endpoints: Mutex<HashMap<String, Vec<Value>>>,
    fail_next: AtomicUsize,
    page_failures: Mutex<HashMap<u64, usize>>,
    fetches: AtomicUsize,
}

impl StaticRecordSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            endpoints: Mutex::new(HashMap::new()),
            fail_next: AtomicUsize::new(0),
            page_failures: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, records: Vec<Value>) -> Self {
        self.endpoints.get_mut().insert(endpoint.into(), records);
        self
    }

    /// Replaces the records served by `endpoint`.
    pub async fn set_records(&self, endpoint: &str, records: Vec<Value>) {
        self.endpoints
            .lock()
            .await
            .insert(endpoint.to_string(), records);
    }

    /// Makes the next `count` fetches fail with a transient error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Makes the next `times` fetches of `page` (1-based) fail with a transient error.
    pub async fn fail_page(&self, page: u64, times: usize) {
        self.page_failures.lock().await.insert(page, times);
    }

    /// Number of fetch attempts so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn fetch_page(
        &self,
        endpoint: &str,
        after: Option<&str>,
    ) -> Result<RawPage, DomainError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let previous = match after {
            Some(position) => position.parse::<u64>().map_err(|_| {
                DomainError::fatal_config(format!(
                    "cursor position '{}' is not a page number",
                    position
                ))
            })?,
            None => 0,
        };
        let page = previous + 1;

        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(DomainError::transient(format!("simulated failure on page {}", page)));
        }

        {
            let mut failures = self.page_failures.lock().await;
            if let Some(remaining) = failures.get_mut(&page) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DomainError::transient(format!(
                        "simulated failure on page {}",
                        page
                    )));
                }
            }
        }

        let endpoints = self.endpoints.lock().await;
        let records = endpoints
            .get(endpoint)
            .ok_or_else(|| DomainError::fatal_config(format!("unknown endpoint {}", endpoint)))?;

        let start = (previous as usize).saturating_mul(self.page_size).min(records.len());
        let end = (start + self.page_size).min(records.len());

        Ok(RawPage::new(
            records[start..end].to_vec(),
            page.to_string(),
            end < records.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pages_by_number() {
        let source = StaticRecordSource::new(2).with_endpoint(
            "/items",
            vec![json!({"sku": "A"}), json!({"sku": "B"}), json!({"sku": "C"})],
        );

        let first = source.fetch_page("/items", None).await.unwrap();
        assert_eq!(first.position(), "1");
        assert!(first.has_more());

        let second = source.fetch_page("/items", Some("1")).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(!second.has_more());
    }

    #[tokio::test]
    async fn test_page_failures_are_consumed() {
        let source = StaticRecordSource::new(2).with_endpoint("/items", vec![json!({"sku": "A"})]);
        source.fail_page(1, 1).await;

        assert!(source.fetch_page("/items", None).await.unwrap_err().is_transient());
        assert!(source.fetch_page("/items", None).await.is_ok());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_fatal() {
        let source = StaticRecordSource::new(2);
        assert!(source.fetch_page("/nope", None).await.unwrap_err().is_fatal());
    }
}
