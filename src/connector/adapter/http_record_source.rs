use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::application::RecordSource;
use crate::domain::{DomainError, RawPage};

/// Keys checked, in order, for the record array of an enveloped response.
const ENVELOPE_KEYS: [&str; 4] = ["data", "products", "items", "results"];

/// Maps an HTTP status to the error taxonomy. Every non-retryable status from
/// the record source is a configuration problem.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> DomainError {
    classify_status_with(status, body, DomainError::fatal_config)
}

/// Throttling and server errors are transient, 401/403 are fatal. Any other
/// rejection goes through `rejected`, so a service can report a bad request
/// without aborting the run.
pub(crate) fn classify_status_with(
    status: StatusCode,
    body: &str,
    rejected: impl FnOnce(String) -> DomainError,
) -> DomainError {
    let message = format!("HTTP {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DomainError::transient(message)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        DomainError::fatal_config(message)
    } else {
        rejected(message)
    }
}

/// Connect errors and timeouts are transient, anything else is fatal.
pub(crate) fn classify_request_error(e: reqwest::Error) -> DomainError {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
        DomainError::transient(e.to_string())
    } else {
        DomainError::fatal_config(e.to_string())
    }
}

/// Page-number paginated JSON API source.
pub struct HttpRecordSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl HttpRecordSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        page_size: usize,
    ) -> Result<Self, DomainError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(DomainError::fatal_config(format!(
                "API base URL must be an http(s) URL: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::fatal_config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            page_size: page_size.max(1),
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

/// Extracts the record list from a response body.
///
/// Accepts a bare array, an object holding the array under a known envelope
/// key, or a single record object carrying `id` or `sku`.
pub fn extract_records(body: Value) -> Result<Vec<Value>, DomainError> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut object) => {
            for key in ENVELOPE_KEYS {
                if let Some(Value::Array(_)) = object.get(key) {
                    if let Some(Value::Array(records)) = object.remove(key) {
                        return Ok(records);
                    }
                }
            }
            if object.contains_key("id") || object.contains_key("sku") {
                return Ok(vec![Value::Object(object)]);
            }
            Err(DomainError::validation(format!(
                "unrecognized response envelope with keys: {}",
                object.keys().cloned().collect::<Vec<_>>().join(", ")
            )))
        }
        other => Err(DomainError::validation(format!(
            "unexpected response body: {}",
            other
        ))),
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch_page(
        &self,
        endpoint: &str,
        after: Option<&str>,
    ) -> Result<RawPage, DomainError> {
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

        let mut request = self
            .client
            .get(self.url_for(endpoint))
            .query(&[("page", page.to_string()), ("limit", self.page_size.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &body));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                DomainError::validation(format!("undecodable page {} of {}: {}", page, endpoint, e))
            } else {
                classify_request_error(e)
            }
        })?;
        let records = extract_records(body)?;

        debug!("GET {} page {} -> {} records", endpoint, page, records.len());

        let has_more = records.len() == self.page_size;
        Ok(RawPage::new(records, page.to_string(), has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_bare_array() {
        let records = extract_records(json!([{"sku": "A"}, {"sku": "B"}])).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_extract_enveloped_arrays() {
        for key in ENVELOPE_KEYS {
            let body = json!({ key: [{"sku": "A"}], "total": 1 });
            assert_eq!(extract_records(body).unwrap().len(), 1, "key {}", key);
        }
    }

    #[test]
    fn test_envelope_priority_follows_key_order() {
        let body = json!({"results": [{"sku": "R"}], "data": [{"sku": "D"}]});
        let records = extract_records(body).unwrap();
        assert_eq!(records[0]["sku"], json!("D"));
    }

    #[test]
    fn test_extract_single_object() {
        let records = extract_records(json!({"id": 7, "name": "Solo"})).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!(7));
    }

    #[test]
    fn test_unknown_shapes_are_validation_errors() {
        assert!(extract_records(json!({"meta": {}})).unwrap_err().is_validation());
        assert!(extract_records(json!("nope")).unwrap_err().is_validation());
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::UNAUTHORIZED, "").is_fatal());
        assert!(classify_status(StatusCode::FORBIDDEN, "").is_fatal());
        assert!(classify_status(StatusCode::NOT_FOUND, "").is_fatal());
    }

    #[test]
    fn test_rejections_use_the_callers_category() {
        let bad_request = classify_status_with(StatusCode::BAD_REQUEST, "", DomainError::embedding);
        assert!(!bad_request.is_fatal());
        assert!(matches!(bad_request, DomainError::EmbeddingError(_)));

        let unauthorized =
            classify_status_with(StatusCode::UNAUTHORIZED, "", DomainError::embedding);
        assert!(unauthorized.is_fatal());

        let throttled =
            classify_status_with(StatusCode::TOO_MANY_REQUESTS, "", DomainError::storage);
        assert!(throttled.is_transient());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = HttpRecordSource::new("ftp://example", None, Duration::from_secs(1), 10);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_numeric_position_is_fatal() {
        let source =
            HttpRecordSource::new("http://localhost:1", None, Duration::from_secs(1), 10).unwrap();
        let err = source
            .fetch_page("/products", Some("abc"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
