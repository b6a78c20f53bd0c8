use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::http_record_source::{classify_request_error, classify_status_with};
use crate::application::VectorRepository;
use crate::domain::{point_id_for, vector_payload, DomainError, EmbeddingVector, PersistedRecord};

const SCROLL_PAGE_SIZE: usize = 256;

/// Qdrant collection accessed through its REST API.
pub struct QdrantVectorRepository {
    client: Client,
    base_url: String,
    collection: String,
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<ScrollPoint>,
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrollPoint {
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

impl QdrantVectorRepository {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(DomainError::fatal_config(format!(
                "Qdrant URL must be an http(s) URL: {}",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
            let value = HeaderValue::from_str(key.trim())
                .map_err(|e| DomainError::fatal_config(format!("invalid Qdrant API key: {}", e)))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| DomainError::fatal_config(format!("Failed to build Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, DomainError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(classify_request_error)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, DomainError> {
        let response = self.send(method, path, body).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status_with(status, &body, DomainError::storage));
        }

        let payload: QdrantResponse<T> = response
            .json()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to parse Qdrant response: {}", e)))?;
        Ok(payload.result)
    }
}

#[async_trait]
impl VectorRepository for QdrantVectorRepository {
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), DomainError> {
        let response = self.send(Method::GET, "", None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                let _: Value = self
                    .call(
                        Method::PUT,
                        "",
                        Some(json!({"vectors": {"size": dimensions, "distance": "Cosine"}})),
                    )
                    .await?;
                info!(
                    "Created Qdrant collection {} ({} dims)",
                    self.collection, dimensions
                );
                Ok(())
            }
            status if status.is_success() => {
                let info: QdrantResponse<Value> = response.json().await.map_err(|e| {
                    DomainError::storage(format!("Failed to parse Qdrant response: {}", e))
                })?;
                let existing = info.result["config"]["params"]["vectors"]["size"].as_u64();
                match existing {
                    Some(size) if size as usize != dimensions => {
                        Err(DomainError::fatal_config(format!(
                            "collection {} has {} dimensions but the model produces {}",
                            self.collection, size, dimensions
                        )))
                    }
                    _ => Ok(()),
                }
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                Err(classify_status_with(status, &body, DomainError::storage))
            }
        }
    }

    async fn upsert_batch(
        &self,
        records: &[PersistedRecord],
        embeddings: &[EmbeddingVector],
    ) -> Result<(), DomainError> {
        if records.len() != embeddings.len() {
            return Err(DomainError::internal(format!(
                "{} records but {} embeddings",
                records.len(),
                embeddings.len()
            )));
        }
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = records
            .iter()
            .zip(embeddings)
            .map(|(record, embedding)| {
                json!({
                    "id": embedding.point_id(),
                    "vector": embedding.vector(),
                    "payload": vector_payload(record, embedding),
                })
            })
            .collect();

        let _: Value = self
            .call(Method::PUT, "/points?wait=true", Some(json!({ "points": points })))
            .await?;

        debug!("Upserted {} points to Qdrant", records.len());
        Ok(())
    }

    async fn update_payloads(&self, records: &[PersistedRecord]) -> Result<u64, DomainError> {
        let mut updated = 0;
        for record in records {
            let body = json!({
                "payload": { "fields": record.fields() },
                "points": [point_id_for(record.id())],
            });
            let _: Value = self
                .call(Method::POST, "/points/payload?wait=true", Some(body))
                .await?;
            updated += 1;
        }

        debug!("Updated payload of {} Qdrant points", updated);
        Ok(updated)
    }

    async fn delete(&self, record_ids: &[String]) -> Result<u64, DomainError> {
        if record_ids.is_empty() {
            return Ok(0);
        }

        let points: Vec<String> = record_ids.iter().map(|id| point_id_for(id)).collect();
        let _: Value = self
            .call(
                Method::POST,
                "/points/delete?wait=true",
                Some(json!({ "points": points })),
            )
            .await?;

        debug!("Deleted {} points from Qdrant", record_ids.len());
        Ok(record_ids.len() as u64)
    }

    async fn list_record_ids(&self) -> Result<Vec<String>, DomainError> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": ["record_id"],
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let page: ScrollResult = self.call(Method::POST, "/points/scroll", Some(body)).await?;
            ids.extend(page.points.into_iter().filter_map(|point| {
                point
                    .payload
                    .and_then(|payload| payload["record_id"].as_str().map(String::from))
            }));

            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }

    async fn count(&self) -> Result<u64, DomainError> {
        let result: CountResult = self
            .call(Method::POST, "/points/count", Some(json!({"exact": true})))
            .await?;
        Ok(result.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_urls() {
        let repo = QdrantVectorRepository::new(
            "http://localhost:6333/",
            None,
            "products",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            repo.url("/points/scroll"),
            "http://localhost:6333/collections/products/points/scroll"
        );
        assert_eq!(repo.url(""), "http://localhost:6333/collections/products");
    }

    #[test]
    fn test_scroll_response_parsing() {
        let response: QdrantResponse<ScrollResult> = serde_json::from_str(
            r#"{"result": {"points": [{"id": "x", "payload": {"record_id": "A"}}],
                "next_page_offset": null}, "status": "ok"}"#,
        )
        .unwrap();

        assert_eq!(response.result.points.len(), 1);
        assert!(response.result.next_page_offset.is_none());
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(
            QdrantVectorRepository::new("localhost", None, "c", Duration::from_secs(1)).is_err()
        );
    }
}
