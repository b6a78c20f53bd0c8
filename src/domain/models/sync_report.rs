use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{RunMode, UpsertOutcome};

/// Exit code for runs aborted by a fatal error.
pub const FATAL_EXIT_CODE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    /// Some records or batches were deferred to the next run.
    Partial,
}

impl SyncOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncOutcome::Success => 0,
            SyncOutcome::Partial => 2,
        }
    }
}

/// Counts and diagnostics for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub mode: RunMode,
    pub force: bool,
    pub extracted: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub embedded: u64,
    /// Points whose payload was refreshed without re-embedding.
    pub payload_updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failed_batches: u64,
    pub interrupted: bool,
    /// Final cursor position per extraction stage.
    pub cursors: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn new(mode: RunMode, force: bool) -> Self {
        Self {
            mode,
            force,
            extracted: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            embedded: 0,
            payload_updated: 0,
            skipped: 0,
            failed: 0,
            failed_batches: 0,
            interrupted: false,
            cursors: BTreeMap::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn upserted(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    pub fn record_upsert(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn outcome(&self) -> SyncOutcome {
        if self.failed > 0 || self.failed_batches > 0 || self.interrupted {
            SyncOutcome::Partial
        } else {
            SyncOutcome::Success
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: extracted={} upserted={} (inserted={}, updated={}, unchanged={}) embedded={} payload_updated={} skipped={} failed={} failed_batches={}{}",
            self.mode,
            self.extracted,
            self.upserted(),
            self.inserted,
            self.updated,
            self.unchanged,
            self.embedded,
            self.payload_updated,
            self.skipped,
            self.failed,
            self.failed_batches,
            if self.interrupted { " (interrupted)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_report_is_success() {
        let mut report = SyncReport::new(RunMode::PostgresToQdrant, false);
        report.embedded = 3;
        // Skipped records are reported but do not make the run partial.
        report.skipped = 1;

        assert_eq!(report.outcome(), SyncOutcome::Success);
        assert_eq!(report.outcome().exit_code(), 0);
    }

    #[test]
    fn test_failures_make_report_partial() {
        let mut report = SyncReport::new(RunMode::PostgresToQdrant, false);
        report.failed = 1;
        assert_eq!(report.outcome(), SyncOutcome::Partial);

        let mut report = SyncReport::new(RunMode::PostgresToQdrant, false);
        report.interrupted = true;
        assert_eq!(report.outcome().exit_code(), 2);
        assert_ne!(report.outcome().exit_code(), FATAL_EXIT_CODE);
    }

    #[test]
    fn test_upserted_sums_outcomes() {
        let mut report = SyncReport::new(RunMode::ApiToPostgres { endpoint: None }, false);
        report.record_upsert(UpsertOutcome::Inserted);
        report.record_upsert(UpsertOutcome::Updated);
        report.record_upsert(UpsertOutcome::Unchanged);

        assert_eq!(report.upserted(), 3);
        assert!(report.summary().contains("upserted=3"));
    }
}
