use serde::{Deserialize, Serialize};

use super::SyncCursor;

/// Relational row counts per embedding status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub current: u64,
    pub stale: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.current + self.stale
    }
}

/// Snapshot of both stores and every stage cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub records: StatusCounts,
    pub vectors: u64,
    pub cursors: Vec<SyncCursor>,
}
