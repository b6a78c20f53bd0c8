use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Settings;
use crate::application::{
    CursorRepository, EmbeddingService, RecordRepository, RecordSource, SyncDeletionsUseCase,
    SyncPipelineUseCase, SyncStatusUseCase, VectorRepository,
};
use crate::connector::{
    connect_postgres, DuckdbCursorRepository, DuckdbRecordRepository, HttpEmbedding,
    HttpRecordSource, InMemoryVectorRepository, MockEmbedding, PostgresCursorRepository,
    PostgresRecordRepository, QdrantVectorRepository,
};
use crate::domain::{DomainError, RecordNormalizer, RunMode};

const QDRANT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ContainerConfig {
    pub data_dir: String,
    pub mock_embeddings: bool,
    pub memory_vectors: bool,
    pub show_progress: bool,
}

/// Wires adapters from settings and hands out ready use cases.
pub struct Container {
    settings: Settings,
    records: Arc<dyn RecordRepository>,
    cursors: Arc<dyn CursorRepository>,
    vectors: Arc<dyn VectorRepository>,
    config: ContainerConfig,
}

impl Container {
    pub async fn new(settings: Settings, config: ContainerConfig) -> Result<Self, DomainError> {
        let (records, cursors): (Arc<dyn RecordRepository>, Arc<dyn CursorRepository>) =
            match settings.database_url.as_deref() {
                Some(url) => {
                    let pool = connect_postgres(url).await?;
                    info!("Using PostgreSQL relational store");
                    (
                        Arc::new(PostgresRecordRepository::new(pool.clone())),
                        Arc::new(PostgresCursorRepository::new(pool)),
                    )
                }
                None => {
                    let db_path = PathBuf::from(&config.data_dir).join("recordsync.duckdb");
                    // DuckDB only allows one write connection per file
                    let records = DuckdbRecordRepository::new(&db_path)?;
                    let cursors =
                        DuckdbCursorRepository::with_connection(records.shared_connection())
                            .await?;
                    info!("Using DuckDB relational store at {}", db_path.display());
                    (Arc::new(records), Arc::new(cursors))
                }
            };

        let vectors: Arc<dyn VectorRepository> = if config.memory_vectors {
            info!("Using in-memory vector storage");
            Arc::new(InMemoryVectorRepository::new())
        } else {
            debug!(
                "Using Qdrant at {} collection {}",
                settings.qdrant_url, settings.qdrant_collection
            );
            Arc::new(QdrantVectorRepository::new(
                settings.qdrant_url.clone(),
                settings.qdrant_api_key.clone(),
                settings.qdrant_collection.clone(),
                QDRANT_TIMEOUT,
            )?)
        };

        Ok(Self {
            settings,
            records,
            cursors,
            vectors,
            config,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn record_source(&self) -> Result<Arc<dyn RecordSource>, DomainError> {
        let source = HttpRecordSource::new(
            self.settings.require_api_base_url()?,
            self.settings.api_key.clone(),
            self.settings.api_timeout,
            self.settings.api_page_size,
        )?;
        Ok(Arc::new(source))
    }

    pub fn embedding_service(&self) -> Result<Arc<dyn EmbeddingService>, DomainError> {
        let embedding_config = self.settings.embedding_config();
        if self.config.mock_embeddings {
            debug!("Using mock embedding service");
            return Ok(Arc::new(MockEmbedding::with_config(embedding_config)));
        }

        debug!("Using embedding API at {}", self.settings.embedding_api_url);
        let service = HttpEmbedding::new(
            self.settings.embedding_api_url.clone(),
            self.settings.require_embedding_api_key()?,
            embedding_config,
            self.settings.api_timeout,
        )?;
        Ok(Arc::new(service))
    }

    /// Builds a pipeline with only the parts `mode` needs. Without a mode the
    /// pipeline can only reset cursors and invalidate embeddings.
    pub fn sync_pipeline(
        &self,
        mode: Option<&RunMode>,
        batch_size: Option<usize>,
        cancel: CancellationToken,
    ) -> Result<SyncPipelineUseCase, DomainError> {
        let mut builder = SyncPipelineUseCase::builder(
            Arc::clone(&self.records),
            Arc::clone(&self.cursors),
            Arc::clone(&self.vectors),
        )
        .normalizer(RecordNormalizer::new(self.settings.schema.clone()))
        .endpoints(self.settings.endpoints.clone())
        .batch_size(batch_size.unwrap_or(self.settings.batch_size))
        .retry_policy(self.settings.retry_policy())
        .cancellation_token(cancel)
        .show_progress(self.config.show_progress);

        if let Some(mode) = mode {
            if mode.extracts() {
                builder = builder.source(self.record_source()?);
            }
            if mode.embeds() {
                builder = builder.embeddings(self.embedding_service()?);
            }
        }

        Ok(builder.build())
    }

    pub fn sync_deletions(&self) -> SyncDeletionsUseCase {
        SyncDeletionsUseCase::new(Arc::clone(&self.records), Arc::clone(&self.vectors))
    }

    pub fn sync_status(&self) -> SyncStatusUseCase {
        SyncStatusUseCase::new(
            Arc::clone(&self.records),
            Arc::clone(&self.cursors),
            Arc::clone(&self.vectors),
        )
    }
}
