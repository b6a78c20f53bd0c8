use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::{
    CursorRepository, EmbeddingDeriver, EmbeddingService, Extractor, RecordRepository,
    RecordSource, RetryPolicy, VectorRepository,
};
use crate::domain::{
    extract_stage, DomainError, EmbeddingVector, PersistedRecord, RecordNormalizer, RunMode,
    SyncCursor, SyncReport, EMBED_STAGE,
};

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_CONCURRENCY: usize = 4;

/// Drives records from the source API into the relational store and from
/// there into the vector index.
///
/// Extraction cursors advance only after a page is durably upserted. Vectors
/// are written before the relational row is flipped to `current`, so a crash
/// between the two causes a harmless recomputation on the next run.
pub struct SyncPipelineUseCase {
    records: Arc<dyn RecordRepository>,
    cursors: Arc<dyn CursorRepository>,
    vectors: Arc<dyn VectorRepository>,
    extractor: Option<Extractor>,
    deriver: Option<EmbeddingDeriver>,
    normalizer: RecordNormalizer,
    endpoints: Vec<String>,
    batch_size: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    show_progress: bool,
}

/// Builder for [`SyncPipelineUseCase`].
///
/// The record source is only needed by extracting modes and the embedding
/// service only by embedding modes.
pub struct SyncPipelineBuilder {
    records: Arc<dyn RecordRepository>,
    cursors: Arc<dyn CursorRepository>,
    vectors: Arc<dyn VectorRepository>,
    source: Option<Arc<dyn RecordSource>>,
    embeddings: Option<Arc<dyn EmbeddingService>>,
    normalizer: RecordNormalizer,
    endpoints: Vec<String>,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    show_progress: bool,
}

impl SyncPipelineBuilder {
    pub fn source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn embeddings(mut self, embeddings: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn normalizer(mut self, normalizer: RecordNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn build(self) -> SyncPipelineUseCase {
        SyncPipelineUseCase {
            extractor: self
                .source
                .map(|source| Extractor::new(source, self.retry.clone())),
            deriver: self.embeddings.map(|embeddings| {
                EmbeddingDeriver::new(
                    embeddings,
                    self.normalizer.clone(),
                    self.retry.clone(),
                    self.concurrency,
                )
            }),
            records: self.records,
            cursors: self.cursors,
            vectors: self.vectors,
            normalizer: self.normalizer,
            endpoints: self.endpoints,
            batch_size: self.batch_size,
            retry: self.retry,
            cancel: self.cancel,
            show_progress: self.show_progress,
        }
    }
}

impl SyncPipelineUseCase {
    pub fn builder(
        records: Arc<dyn RecordRepository>,
        cursors: Arc<dyn CursorRepository>,
        vectors: Arc<dyn VectorRepository>,
    ) -> SyncPipelineBuilder {
        SyncPipelineBuilder {
            records,
            cursors,
            vectors,
            source: None,
            embeddings: None,
            normalizer: RecordNormalizer::default(),
            endpoints: vec!["/products".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            show_progress: false,
        }
    }

    /// Runs one pipeline pass for `mode`.
    ///
    /// Returns `Err` only for fatal errors. Record and batch failures are
    /// counted in the report and make its outcome partial.
    pub async fn run(&self, mode: RunMode, force: bool) -> Result<SyncReport, DomainError> {
        let start_time = Instant::now();
        let mut report = SyncReport::new(mode.clone(), force);

        info!("Starting {} run{}", mode, if force { " (force)" } else { "" });

        if mode.extracts() && self.extractor.is_none() {
            return Err(DomainError::fatal_config("no record source configured"));
        }
        if mode.embeds() && self.deriver.is_none() {
            return Err(DomainError::fatal_config("no embedding service configured"));
        }

        if mode.extracts() {
            let endpoints: Vec<String> = match mode.endpoint() {
                Some(endpoint) => vec![endpoint.to_string()],
                None => self.endpoints.clone(),
            };
            if endpoints.is_empty() {
                return Err(DomainError::fatal_config("no source endpoints configured"));
            }

            for endpoint in &endpoints {
                if report.interrupted {
                    break;
                }
                self.extract_endpoint(endpoint, force, &mut report).await?;
            }
        }

        if mode.embeds() && !report.interrupted {
            self.embed_records(force, &mut report).await?;
        }

        report.duration = start_time.elapsed();
        info!("{} in {:.2?}", report.summary(), report.duration);

        Ok(report)
    }

    /// Deletes the cursor of `stage` so the next run starts it from scratch.
    pub async fn reset_cursor(&self, stage: &str) -> Result<bool, DomainError> {
        let existed = self.cursors.reset(stage).await?;
        if existed {
            info!("Reset cursor for stage {}", stage);
        } else {
            info!("No cursor stored for stage {}", stage);
        }
        Ok(existed)
    }

    /// Marks every embedded record stale so the next embedding run redoes it.
    pub async fn invalidate_embeddings(&self) -> Result<u64, DomainError> {
        let count = self.records.mark_all_stale().await?;
        info!("Invalidated embeddings for {} records", count);
        Ok(count)
    }

    async fn extract_endpoint(
        &self,
        endpoint: &str,
        force: bool,
        report: &mut SyncReport,
    ) -> Result<(), DomainError> {
        let Some(extractor) = &self.extractor else {
            return Err(DomainError::fatal_config("no record source configured"));
        };

        let stage = extract_stage(endpoint);
        let stored = self.cursors.load(&stage).await?;

        let resume = if force {
            None
        } else {
            stored
                .as_ref()
                .and_then(|cursor| cursor.resume_position().map(String::from))
        };

        match (&resume, &stored) {
            (Some(position), _) => info!("Resuming {} after position {}", endpoint, position),
            (None, Some(_)) => info!("Starting new pass over {}", endpoint),
            (None, None) => info!("First extraction of {}", endpoint),
        }

        let mut pages = extractor.pages(endpoint, resume);

        loop {
            if self.cancel.is_cancelled() {
                warn!("Extraction of {} interrupted", endpoint);
                report.interrupted = true;
                break;
            }

            let page = match pages.next().await {
                Some(Ok(page)) => page,
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    error!("Failed to fetch page from {}: {}", endpoint, e);
                    report.failed_batches += 1;
                    report.record_error(format!("{}: {}", endpoint, e));
                    break;
                }
                None => break,
            };

            report.extracted += page.len() as u64;

            let normalized = self.normalizer.normalize_page(page.records());
            report.skipped += normalized.rejected.len() as u64;

            let outcomes = match self.records.upsert_batch(&normalized.records).await {
                Ok(outcomes) => outcomes,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(
                        "Failed to persist page {} of {}: {}",
                        page.position(),
                        endpoint,
                        e
                    );
                    report.failed_batches += 1;
                    report.record_error(format!("{} page {}: {}", endpoint, page.position(), e));
                    break;
                }
            };
            for outcome in outcomes {
                report.record_upsert(outcome);
            }

            let cursor = SyncCursor::new(&stage, page.position(), !page.has_more());
            if let Err(e) = self.cursors.save(&cursor).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("Failed to advance cursor for {}: {}", endpoint, e);
                report.failed_batches += 1;
                report.record_error(format!("{} cursor: {}", endpoint, e));
                break;
            }
            report
                .cursors
                .insert(stage.clone(), page.position().to_string());

            debug!(
                "Committed page {} of {} ({} records, {} skipped)",
                page.position(),
                endpoint,
                normalized.records.len(),
                normalized.rejected.len()
            );
        }

        Ok(())
    }

    async fn embed_records(&self, force: bool, report: &mut SyncReport) -> Result<(), DomainError> {
        let Some(deriver) = &self.deriver else {
            return Err(DomainError::fatal_config("no embedding service configured"));
        };
        let model = deriver.model().to_string();

        match self.cursors.load(EMBED_STAGE).await? {
            Some(cursor) if cursor.position() == model => {}
            stored => {
                if let Some(cursor) = stored {
                    warn!(
                        "Embedding model changed from {} to {}, invalidating existing vectors",
                        cursor.position(),
                        model
                    );
                    self.records.mark_all_stale().await?;
                }
                self.cursors
                    .save(&SyncCursor::new(EMBED_STAGE, model.as_str(), true))
                    .await?;
            }
        }

        let dimensions = deriver.dimensions();
        self.retry
            .run("ensure collection", || {
                self.vectors.ensure_collection(dimensions)
            })
            .await?;

        let counts = self.records.status_counts().await?;
        let total = if force {
            counts.total()
        } else {
            counts.pending + counts.stale
        };
        info!(
            "Embedding {} records with {}{}",
            total,
            model,
            if force { " (force)" } else { "" }
        );

        let progress_bar = self.progress_bar(total);
        let mut after: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                warn!("Embedding interrupted");
                report.interrupted = true;
                break;
            }

            let batch = match self
                .records
                .find_for_embedding(after.as_deref(), self.batch_size, force)
                .await
            {
                Ok(batch) => batch,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Failed to load records for embedding: {}", e);
                    report.failed_batches += 1;
                    report.record_error(format!("{}: {}", EMBED_STAGE, e));
                    break;
                }
            };

            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id().to_string());

            self.embed_batch(deriver, &batch, report).await?;
            progress_bar.inc(batch.len() as u64);
        }

        progress_bar.finish_and_clear();

        if !report.interrupted {
            self.refresh_payloads(report).await?;
        }
        Ok(())
    }

    /// Pushes field changes that did not alter the embedded text into the
    /// payload of already embedded points.
    async fn refresh_payloads(&self, report: &mut SyncReport) -> Result<(), DomainError> {
        let mut after: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                warn!("Payload refresh interrupted");
                report.interrupted = true;
                break;
            }

            let batch = match self
                .records
                .find_outdated_payloads(after.as_deref(), self.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Failed to load records with outdated payloads: {}", e);
                    report.failed_batches += 1;
                    report.record_error(format!("{}: {}", EMBED_STAGE, e));
                    break;
                }
            };

            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id().to_string());

            let updated = self
                .retry
                .run("payload update", || self.vectors.update_payloads(&batch))
                .await;
            match updated {
                Ok(count) => debug!("Refreshed payload of {} points", count),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Failed to update {} payloads: {}", batch.len(), e);
                    report.failed_batches += 1;
                    report.record_error(e.to_string());
                    continue;
                }
            }

            for record in &batch {
                match self
                    .records
                    .mark_payload_refreshed(record.id(), record.fields())
                    .await
                {
                    Ok(true) => report.payload_updated += 1,
                    Ok(false) => debug!(
                        "{} changed while refreshing its payload, left for the next run",
                        record.id()
                    ),
                    Err(e) => {
                        warn!("Failed to clear payload flag of {}: {}", record.id(), e);
                        report.failed += 1;
                        report.record_error(e.to_string());
                    }
                }
            }
        }

        Ok(())
    }

    async fn embed_batch(
        &self,
        deriver: &EmbeddingDeriver,
        batch: &[PersistedRecord],
        report: &mut SyncReport,
    ) -> Result<(), DomainError> {
        let results = deriver.embed_batch(batch).await?;

        let mut records: Vec<PersistedRecord> = Vec::with_capacity(batch.len());
        let mut embeddings: Vec<EmbeddingVector> = Vec::with_capacity(batch.len());

        for (record, result) in batch.iter().zip(results) {
            match result {
                Ok(embedding) => {
                    records.push(record.clone());
                    embeddings.push(embedding);
                }
                Err(e) if e.is_validation() => {
                    warn!("Skipping {}: {}", record.id(), e);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to embed {}: {}", record.id(), e);
                    report.failed += 1;
                    report.record_error(e.to_string());
                }
            }
        }

        if records.is_empty() {
            return Ok(());
        }

        let written = self
            .retry
            .run("vector upsert", || {
                self.vectors.upsert_batch(&records, &embeddings)
            })
            .await;
        match written {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Failed to write {} vectors: {}", records.len(), e);
                report.failed_batches += 1;
                report.failed += records.len() as u64;
                report.record_error(e.to_string());
                return Ok(());
            }
        }

        for embedding in &embeddings {
            let flipped = self
                .records
                .mark_embedded(embedding.record_id(), embedding.content_hash_at_embedding())
                .await;
            match flipped {
                Ok(true) => report.embedded += 1,
                Ok(false) => debug!(
                    "{} changed while embedding, left for the next run",
                    embedding.record_id()
                ),
                Err(e) => {
                    let e = DomainError::consistency(format!(
                        "[{}] vector written but status not updated: {}",
                        embedding.record_id(),
                        e
                    ));
                    warn!("{}", e);
                    report.failed += 1;
                    report.record_error(e.to_string());
                }
            }
        }

        debug!("Embedded batch of {} records", embeddings.len());
        Ok(())
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress_bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ) {
            progress_bar.set_style(style.progress_chars("#>-"));
        }
        progress_bar
    }
}
