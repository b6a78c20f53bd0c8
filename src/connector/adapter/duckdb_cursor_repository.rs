use std::sync::Arc;

use async_trait::async_trait;
use duckdb::{params, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::CursorRepository;
use crate::domain::{DomainError, SyncCursor};

pub struct DuckdbCursorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DuckdbCursorRepository {
    /// Create a new adapter using an existing shared connection.
    pub async fn with_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, DomainError> {
        let conn_guard = conn.lock().await;
        Self::initialize_schema(&conn_guard)?;
        drop(conn_guard);

        Ok(Self { conn })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DomainError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_cursors (
                stage TEXT PRIMARY KEY,
                position TEXT NOT NULL,
                exhausted BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at BIGINT NOT NULL
            );
            "#,
        )
        .map_err(|e| {
            DomainError::storage(format!("Failed to initialize sync_cursors schema: {}", e))
        })?;

        debug!("DuckDB sync_cursors table initialized");
        Ok(())
    }

    fn query_cursors<P: duckdb::Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<SyncCursor>, DomainError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map(params, |row| {
                Ok(SyncCursor::reconstitute(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            })
            .map_err(|e| DomainError::storage(format!("Failed to query cursors: {}", e)))?;

        let mut cursors = Vec::new();
        for row in rows {
            cursors
                .push(row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?);
        }

        Ok(cursors)
    }
}

#[async_trait]
impl CursorRepository for DuckdbCursorRepository {
    async fn load(&self, stage: &str) -> Result<Option<SyncCursor>, DomainError> {
        let conn = self.conn.lock().await;
        let mut cursors = Self::query_cursors(
            &conn,
            "SELECT stage, position, exhausted, updated_at FROM sync_cursors WHERE stage = ?",
            params![stage],
        )?;
        Ok(cursors.pop())
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), DomainError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO sync_cursors (stage, position, exhausted, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (stage) DO UPDATE SET
                position = excluded.position,
                exhausted = excluded.exhausted,
                updated_at = excluded.updated_at
            "#,
            params![
                cursor.stage(),
                cursor.position(),
                cursor.is_exhausted(),
                cursor.updated_at(),
            ],
        )
        .map_err(|e| DomainError::storage(format!("Failed to save cursor: {}", e)))?;

        debug!(
            "Saved cursor {} at {} (exhausted: {})",
            cursor.stage(),
            cursor.position(),
            cursor.is_exhausted()
        );
        Ok(())
    }

    async fn reset(&self, stage: &str) -> Result<bool, DomainError> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM sync_cursors WHERE stage = ?", params![stage])
            .map_err(|e| DomainError::storage(format!("Failed to reset cursor: {}", e)))?;

        Ok(deleted > 0)
    }

    async fn list(&self) -> Result<Vec<SyncCursor>, DomainError> {
        let conn = self.conn.lock().await;
        Self::query_cursors(
            &conn,
            "SELECT stage, position, exhausted, updated_at FROM sync_cursors ORDER BY stage",
            [],
        )
    }
}
