use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::{params, Connection, OptionalExt};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::RecordRepository;
use crate::domain::{
    classify_upsert, current_timestamp, CanonicalRecord, DomainError, EmbeddingStatus,
    PersistedRecord, StatusCounts, UpsertOutcome,
};

const RECORD_COLUMNS: &str = "id, fields, content_hash, source_version, embedding_status, \
                              embedded_hash, created_at, last_synced_at";

type RawRow = (String, String, String, i64, String, Option<String>, i64, i64);

pub struct DuckdbRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DuckdbRecordRepository {
    pub fn new(db_path: &Path) -> Result<Self, DomainError> {
        let conn = Connection::open(db_path)
            .map_err(|e| DomainError::storage(format!("Failed to open DuckDB database: {}", e)))?;
        Self::initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, DomainError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            DomainError::storage(format!("Failed to open DuckDB in-memory DB: {}", e))
        })?;
        Self::initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns a clone of the shared connection Arc.
    /// DuckDB only allows one write connection per file, so the cursor
    /// repository reuses this one.
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DomainError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                fields TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                source_version BIGINT NOT NULL DEFAULT 0,
                embedding_status TEXT NOT NULL DEFAULT 'pending',
                embedded_hash TEXT,
                payload_dirty BOOLEAN NOT NULL DEFAULT FALSE,
                created_at BIGINT NOT NULL,
                last_synced_at BIGINT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_status
            ON records(embedding_status);
            "#,
        )
        .map_err(|e| DomainError::storage(format!("Failed to initialize records schema: {}", e)))?;

        debug!("DuckDB records table initialized");
        Ok(())
    }

    fn upsert_in(
        conn: &Connection,
        record: &CanonicalRecord,
        now: i64,
    ) -> Result<UpsertOutcome, DomainError> {
        let stored: Option<(String, i64)> = conn
            .query_row(
                "SELECT content_hash, source_version FROM records WHERE id = ?",
                params![record.id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| DomainError::storage(format!("Failed to read record: {}", e)))?;

        let (outcome, write) = classify_upsert(
            stored.as_ref().map(|(hash, version)| (hash.as_str(), *version)),
            record.content_hash(),
            record.source_version(),
        );
        if !write {
            debug!("Ignoring out-of-order version of {}", record.id());
            return Ok(outcome);
        }

        let fields = serde_json::to_string(record.fields())
            .map_err(|e| DomainError::internal(format!("Failed to serialize fields: {}", e)))?;

        let result = match outcome {
            UpsertOutcome::Inserted => conn.execute(
                "INSERT INTO records (id, fields, content_hash, source_version, embedding_status, \
                 embedded_hash, created_at, last_synced_at) VALUES (?, ?, ?, ?, ?, NULL, ?, ?)",
                params![
                    record.id(),
                    fields,
                    record.content_hash(),
                    record.source_version(),
                    EmbeddingStatus::Pending.as_str(),
                    now,
                    now,
                ],
            ),
            UpsertOutcome::Updated => conn.execute(
                "UPDATE records SET fields = ?, content_hash = ?, source_version = ?, \
                 embedding_status = ?, payload_dirty = FALSE, last_synced_at = ? WHERE id = ?",
                params![
                    fields,
                    record.content_hash(),
                    record.source_version(),
                    EmbeddingStatus::Stale.as_str(),
                    now,
                    record.id(),
                ],
            ),
            // Fields outside the embedded text may still differ.
            UpsertOutcome::Unchanged => conn.execute(
                "UPDATE records SET payload_dirty = payload_dirty OR fields <> ?, fields = ?, \
                 source_version = ?, last_synced_at = ? WHERE id = ?",
                params![fields, fields, record.source_version(), now, record.id()],
            ),
        };
        result.map_err(|e| {
            DomainError::storage(format!("Failed to upsert record {}: {}", record.id(), e))
        })?;

        Ok(outcome)
    }

    fn query_records<P: duckdb::Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<PersistedRecord>, DomainError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map_err(|e| DomainError::storage(format!("Failed to query records: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let row: RawRow =
                row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?;
            records.push(Self::row_to_record(row)?);
        }

        Ok(records)
    }

    fn row_to_record(row: RawRow) -> Result<PersistedRecord, DomainError> {
        let (id, fields, content_hash, source_version, status, embedded_hash, created, synced) =
            row;
        let fields: Map<String, Value> = serde_json::from_str(&fields).map_err(|e| {
            DomainError::storage(format!("Corrupt fields for record {}: {}", id, e))
        })?;

        Ok(PersistedRecord::reconstitute(
            id,
            fields,
            content_hash,
            source_version,
            EmbeddingStatus::from_str(&status),
            embedded_hash,
            created,
            synced,
        ))
    }
}

#[async_trait]
impl RecordRepository for DuckdbRecordRepository {
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
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(Self::upsert_in(&tx, record, now)?);
        }

        tx.commit()
            .map_err(|e| DomainError::storage(format!("Failed to commit: {}", e)))?;

        debug!("Upserted {} records to DuckDB", records.len());
        Ok(outcomes)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PersistedRecord>, DomainError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM records WHERE id = ?", RECORD_COLUMNS);
        Ok(Self::query_records(&conn, &sql, params![id])?.pop())
    }

    async fn find_for_embedding(
        &self,
        after_id: Option<&str>,
        limit: usize,
        include_current: bool,
    ) -> Result<Vec<PersistedRecord>, DomainError> {
        let conn = self.conn.lock().await;

        let status_filter = if include_current {
            ""
        } else {
            " AND embedding_status <> 'current'"
        };
        let limit = limit as i64;

        match after_id {
            Some(after_id) => {
                let sql = format!(
                    "SELECT {} FROM records WHERE id > ?{} ORDER BY id LIMIT ?",
                    RECORD_COLUMNS, status_filter
                );
                Self::query_records(&conn, &sql, params![after_id, limit])
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM records WHERE 1 = 1{} ORDER BY id LIMIT ?",
                    RECORD_COLUMNS, status_filter
                );
                Self::query_records(&conn, &sql, params![limit])
            }
        }
    }

    async fn mark_embedded(&self, id: &str, content_hash: &str) -> Result<bool, DomainError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE records SET embedding_status = ?, embedded_hash = ?, payload_dirty = FALSE \
                 WHERE id = ? AND content_hash = ?",
                params![EmbeddingStatus::Current.as_str(), content_hash, id, content_hash],
            )
            .map_err(|e| DomainError::storage(format!("Failed to mark {} embedded: {}", id, e)))?;

        Ok(updated > 0)
    }

    async fn find_outdated_payloads(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PersistedRecord>, DomainError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM records WHERE payload_dirty AND embedding_status = ? \
             AND id > ? ORDER BY id LIMIT ?",
            RECORD_COLUMNS
        );
        Self::query_records(
            &conn,
            &sql,
            params![
                EmbeddingStatus::Current.as_str(),
                after_id.unwrap_or(""),
                limit as i64
            ],
        )
    }

    async fn mark_payload_refreshed(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<bool, DomainError> {
        let fields = serde_json::to_string(fields)
            .map_err(|e| DomainError::internal(format!("Failed to serialize fields: {}", e)))?;
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE records SET payload_dirty = FALSE WHERE id = ? AND fields = ?",
                params![id, fields],
            )
            .map_err(|e| {
                DomainError::storage(format!("Failed to mark payload of {} refreshed: {}", id, e))
            })?;

        Ok(updated > 0)
    }

    async fn mark_all_stale(&self) -> Result<u64, DomainError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE records SET embedding_status = ? WHERE embedding_status = ?",
                params![
                    EmbeddingStatus::Stale.as_str(),
                    EmbeddingStatus::Current.as_str()
                ],
            )
            .map_err(|e| DomainError::storage(format!("Failed to mark records stale: {}", e)))?;

        Ok(updated as u64)
    }

    async fn list_ids(&self) -> Result<Vec<String>, DomainError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id FROM records ORDER BY id")
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DomainError::storage(format!("Failed to list record ids: {}", e)))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?);
        }

        Ok(ids)
    }

    async fn status_counts(&self) -> Result<StatusCounts, DomainError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT embedding_status, COUNT(*) FROM records GROUP BY embedding_status")
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| DomainError::storage(format!("Failed to count records: {}", e)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) =
                row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?;
            match EmbeddingStatus::from_str(&status) {
                EmbeddingStatus::Pending => counts.pending += count as u64,
                EmbeddingStatus::Current => counts.current += count as u64,
                EmbeddingStatus::Stale => counts.stale += count as u64,
            }
        }

        Ok(counts)
    }
}
