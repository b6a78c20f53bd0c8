use clap::{Subcommand, ValueEnum};

use crate::domain::RunMode;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or both pipeline stages
    Run {
        mode: ModeArg,

        /// Restrict extraction to a single endpoint
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Ignore cursors and stored hashes, re-processing everything
        #[arg(short, long)]
        force: bool,

        /// Records per relational or vector batch
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Delete vectors whose record no longer exists in the relational store
    SyncDeletions,

    /// Show record counts per embedding status, vector count, and cursors
    Status,

    /// Forget a stage cursor so the next run starts from the beginning
    ResetCursor {
        /// Endpoint whose extraction cursor is reset
        #[arg(long, conflicts_with = "stage")]
        endpoint: Option<String>,

        /// Raw stage name, e.g. "embed"
        #[arg(long)]
        stage: Option<String>,
    },

    /// Mark every embedded record stale so the next sync re-embeds it
    InvalidateEmbeddings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    ApiToPostgres,
    PostgresToQdrant,
    FullSync,
}

impl ModeArg {
    pub fn into_mode(self, endpoint: Option<String>) -> RunMode {
        match self {
            ModeArg::ApiToPostgres => RunMode::ApiToPostgres { endpoint },
            ModeArg::PostgresToQdrant => RunMode::PostgresToQdrant,
            ModeArg::FullSync => RunMode::FullSync { endpoint },
        }
    }
}
