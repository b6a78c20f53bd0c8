use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::application::{CursorRepository, RecordRepository};
use crate::domain::{
    classify_upsert, current_timestamp, CanonicalRecord, DomainError, EmbeddingStatus,
    PersistedRecord, StatusCounts, SyncCursor, UpsertOutcome,
};

const RECORD_COLUMNS: &str = "id, fields, content_hash, source_version, embedding_status, \
                              embedded_hash, created_at, last_synced_at";

/// Connection failures are retryable, everything else is a storage error.
fn map_sqlx(context: &str, e: sqlx::Error) -> DomainError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            DomainError::transient(format!("{}: {}", context, e))
        }
        other => DomainError::storage(format!("{}: {}", context, other)),
    }
}

/// Opens a connection pool and bootstraps the `records` and `sync_cursors` tables.
pub async fn connect_postgres(database_url: &str) -> Result<PgPool, DomainError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| DomainError::fatal_config(format!("Failed to connect to PostgreSQL: {}", e)))?;

    initialize_schema(&pool).await?;
    Ok(pool)
}

async fn initialize_schema(pool: &PgPool) -> Result<(), DomainError> {
    let statements = [
        r#"CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            fields JSONB NOT NULL,
            content_hash TEXT NOT NULL,
            source_version BIGINT NOT NULL DEFAULT 0,
            embedding_status TEXT NOT NULL DEFAULT 'pending',
            embedded_hash TEXT,
            payload_dirty BOOLEAN NOT NULL DEFAULT FALSE,
            created_at BIGINT NOT NULL,
            last_synced_at BIGINT NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_records_status ON records(embedding_status)",
        r#"CREATE TABLE IF NOT EXISTS sync_cursors (
            stage TEXT PRIMARY KEY,
            position TEXT NOT NULL,
            exhausted BOOLEAN NOT NULL DEFAULT FALSE,
            updated_at BIGINT NOT NULL
        )"#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx("Failed to initialize schema", e))?;
    }

    debug!("PostgreSQL schema initialized");
    Ok(())
}

pub struct PostgresRecordRepository {
    pool: PgPool,
}

impl PostgresRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: &PgRow) -> Result<PersistedRecord, DomainError> {
        let read = |e| map_sqlx("Failed to read row", e);
        let fields: Json<Map<String, Value>> = row.try_get("fields").map_err(read)?;
        let status: String = row.try_get("embedding_status").map_err(read)?;

        Ok(PersistedRecord::reconstitute(
            row.try_get("id").map_err(read)?,
            fields.0,
            row.try_get("content_hash").map_err(read)?,
            row.try_get("source_version").map_err(read)?,
            EmbeddingStatus::from_str(&status),
            row.try_get("embedded_hash").map_err(read)?,
            row.try_get("created_at").map_err(read)?,
            row.try_get("last_synced_at").map_err(read)?,
        ))
    }
}

#[async_trait]
impl RecordRepository for PostgresRecordRepository {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, DomainError> {
        let mut outcomes = self.upsert_batch(std::slice::from_ref(record)).await?;
        outcomes
            .pop()
            .ok_or_else(|| DomainError::internal("upsert produced no outcome"))
    }

    async fn upsert_batch(
        &self,
        records: &[CanonicalRecord],
    ) -> Result<Vec<UpsertOutcome>, DomainError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let now = current_timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("Failed to begin transaction", e))?;

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let stored: Option<(String, i64)> = sqlx::query_as(
                "SELECT content_hash, source_version FROM records WHERE id = $1 FOR UPDATE",
            )
            .bind(record.id())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx("Failed to read record", e))?;

            let (outcome, write) = classify_upsert(
                stored.as_ref().map(|(hash, version)| (hash.as_str(), *version)),
                record.content_hash(),
                record.source_version(),
            );
            outcomes.push(outcome);
            if !write {
                debug!("Ignoring out-of-order version of {}", record.id());
                continue;
            }

            let fields = Json(record.fields());
            let query = match outcome {
                UpsertOutcome::Inserted => sqlx::query(
                    "INSERT INTO records (id, fields, content_hash, source_version, \
                     embedding_status, embedded_hash, created_at, last_synced_at) \
                     VALUES ($1, $2, $3, $4, $5, NULL, $6, $6)",
                )
                .bind(record.id())
                .bind(fields)
                .bind(record.content_hash())
                .bind(record.source_version())
                .bind(EmbeddingStatus::Pending.as_str())
                .bind(now),
                UpsertOutcome::Updated => sqlx::query(
                    "UPDATE records SET fields = $2, content_hash = $3, source_version = $4, \
                     embedding_status = $5, payload_dirty = FALSE, last_synced_at = $6 \
                     WHERE id = $1",
                )
                .bind(record.id())
                .bind(fields)
                .bind(record.content_hash())
                .bind(record.source_version())
                .bind(EmbeddingStatus::Stale.as_str())
                .bind(now),
                // Fields outside the embedded text may still differ.
                UpsertOutcome::Unchanged => sqlx::query(
                    "UPDATE records SET payload_dirty = payload_dirty OR fields IS DISTINCT FROM $2, \
                     fields = $2, source_version = $3, last_synced_at = $4 WHERE id = $1",
                )
                .bind(record.id())
                .bind(fields)
                .bind(record.source_version())
                .bind(now),
            };

            query
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx(&format!("Failed to upsert record {}", record.id()), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx("Failed to commit", e))?;

        debug!("Upserted {} records to PostgreSQL", records.len());
        Ok(outcomes)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PersistedRecord>, DomainError> {
        let sql = format!("SELECT {} FROM records WHERE id = $1", RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to query record", e))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_for_embedding(
        &self,
        after_id: Option<&str>,
        limit: usize,
        include_current: bool,
    ) -> Result<Vec<PersistedRecord>, DomainError> {
        let sql = format!(
            "SELECT {} FROM records \
             WHERE ($1::TEXT IS NULL OR id > $1) AND ($2 OR embedding_status <> 'current') \
             ORDER BY id LIMIT $3",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(after_id)
            .bind(include_current)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to query records", e))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn mark_embedded(&self, id: &str, content_hash: &str) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE records SET embedding_status = $3, embedded_hash = $2, payload_dirty = FALSE \
             WHERE id = $1 AND content_hash = $2",
        )
        .bind(id)
        .bind(content_hash)
        .bind(EmbeddingStatus::Current.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(&format!("Failed to mark {} embedded", id), e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_outdated_payloads(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PersistedRecord>, DomainError> {
        let sql = format!(
            "SELECT {} FROM records \
             WHERE payload_dirty AND embedding_status = $1 AND ($2::TEXT IS NULL OR id > $2) \
             ORDER BY id LIMIT $3",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(EmbeddingStatus::Current.as_str())
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to query outdated payloads", e))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn mark_payload_refreshed(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<bool, DomainError> {
        let result =
            sqlx::query("UPDATE records SET payload_dirty = FALSE WHERE id = $1 AND fields = $2")
                .bind(id)
                .bind(Json(fields))
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx(&format!("Failed to mark payload of {} refreshed", id), e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_stale(&self) -> Result<u64, DomainError> {
        let result = sqlx::query("UPDATE records SET embedding_status = $1 WHERE embedding_status = $2")
            .bind(EmbeddingStatus::Stale.as_str())
            .bind(EmbeddingStatus::Current.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to mark records stale", e))?;

        Ok(result.rows_affected())
    }

    async fn list_ids(&self) -> Result<Vec<String>, DomainError> {
        sqlx::query_scalar("SELECT id FROM records ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to list record ids", e))
    }

    async fn status_counts(&self) -> Result<StatusCounts, DomainError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT embedding_status, COUNT(*)::BIGINT FROM records GROUP BY embedding_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to count records", e))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match EmbeddingStatus::from_str(&status) {
                EmbeddingStatus::Pending => counts.pending += count as u64,
                EmbeddingStatus::Current => counts.current += count as u64,
                EmbeddingStatus::Stale => counts.stale += count as u64,
            }
        }

        Ok(counts)
    }
}

pub struct PostgresCursorRepository {
    pool: PgPool,
}

impl PostgresCursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorRepository for PostgresCursorRepository {
    async fn load(&self, stage: &str) -> Result<Option<SyncCursor>, DomainError> {
        let row: Option<(String, String, bool, i64)> = sqlx::query_as(
            "SELECT stage, position, exhausted, updated_at FROM sync_cursors WHERE stage = $1",
        )
        .bind(stage)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to load cursor", e))?;

        Ok(row.map(|(stage, position, exhausted, updated_at)| {
            SyncCursor::reconstitute(stage, position, exhausted, updated_at)
        }))
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), DomainError> {
        sqlx::query(
            r#"INSERT INTO sync_cursors (stage, position, exhausted, updated_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (stage) DO UPDATE
               SET position = EXCLUDED.position,
                   exhausted = EXCLUDED.exhausted,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(cursor.stage())
        .bind(cursor.position())
        .bind(cursor.is_exhausted())
        .bind(cursor.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to save cursor", e))?;

        debug!("Saved cursor {} at {}", cursor.stage(), cursor.position());
        Ok(())
    }

    async fn reset(&self, stage: &str) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM sync_cursors WHERE stage = $1")
            .bind(stage)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to reset cursor", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<SyncCursor>, DomainError> {
        let rows: Vec<(String, String, bool, i64)> = sqlx::query_as(
            "SELECT stage, position, exhausted, updated_at FROM sync_cursors ORDER BY stage",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list cursors", e))?;

        Ok(rows
            .into_iter()
            .map(|(stage, position, exhausted, updated_at)| {
                SyncCursor::reconstitute(stage, position, exhausted, updated_at)
            })
            .collect())
    }
}
