use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use recordsync::cli::Commands;
use recordsync::domain::extract_stage;
use recordsync::{Container, ContainerConfig, Settings, FATAL_EXIT_CODE};

#[derive(Parser)]
#[command(name = "recordsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Location of the DuckDB store when DATABASE_URL is unset
    #[arg(short, long, global = true, default_value = "~/.recordsync")]
    data_dir: String,

    #[arg(long, global = true)]
    mock_embeddings: bool,

    /// Keep vectors in process memory instead of Qdrant
    #[arg(long, global = true)]
    memory_vectors: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    let configured = settings.as_ref().ok().map(|s| s.log_level.as_str());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, configured))
        .with_target(false)
        .init();

    let result = match settings {
        Ok(settings) => run(cli, settings).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(FATAL_EXIT_CODE)
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<ExitCode> {
    let data_dir = expand_tilde(&cli.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let container = Container::new(
        settings,
        ContainerConfig {
            data_dir,
            mock_embeddings: cli.mock_embeddings,
            memory_vectors: cli.memory_vectors,
            show_progress: true,
        },
    )
    .await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Run {
            mode,
            endpoint,
            force,
            batch_size,
        } => {
            let mode = mode.into_mode(endpoint);
            let pipeline = container.sync_pipeline(Some(&mode), batch_size, cancel)?;
            let report = pipeline.run(mode, force).await?;

            println!("{}", report.summary());
            for (stage, position) in &report.cursors {
                println!("  cursor {} -> {}", stage, position);
            }
            for message in report.errors.iter().take(10) {
                println!("  error: {}", message);
            }
            if report.errors.len() > 10 {
                println!("  ... and {} more errors", report.errors.len() - 10);
            }
            println!("Finished in {:.1}s", report.duration.as_secs_f64());

            return Ok(ExitCode::from(report.outcome().exit_code()));
        }

        Commands::SyncDeletions => {
            let deleted = container.sync_deletions().execute().await?;
            println!("Deleted {} orphaned vectors.", deleted);
        }

        Commands::Status => {
            let status = container.sync_status().execute().await?;

            println!("Record Sync Status");
            println!("==================");
            println!("Records:  {}", status.records.total());
            println!("  pending: {}", status.records.pending);
            println!("  current: {}", status.records.current);
            println!("  stale:   {}", status.records.stale);
            println!("Vectors:  {}", status.vectors);

            if status.cursors.is_empty() {
                println!("Cursors:  (none)");
            } else {
                println!("Cursors:");
                for cursor in &status.cursors {
                    let updated = chrono::DateTime::from_timestamp(cursor.updated_at(), 0)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| cursor.updated_at().to_string());
                    println!(
                        "  {} = {}{} (updated {})",
                        cursor.stage(),
                        cursor.position(),
                        if cursor.is_exhausted() { " [done]" } else { "" },
                        updated
                    );
                }
            }
        }

        Commands::ResetCursor { endpoint, stage } => {
            let stage = match (endpoint, stage) {
                (Some(endpoint), _) => extract_stage(&endpoint),
                (None, Some(stage)) => stage,
                (None, None) => anyhow::bail!("reset-cursor needs --endpoint or --stage"),
            };
            let pipeline = container.sync_pipeline(None, None, cancel)?;
            if pipeline.reset_cursor(&stage).await? {
                info!("Reset cursor {}", stage);
                println!("Cursor {} reset.", stage);
            } else {
                println!("No cursor named {}.", stage);
            }
        }

        Commands::InvalidateEmbeddings => {
            let pipeline = container.sync_pipeline(None, None, cancel)?;
            let count = pipeline.invalidate_embeddings().await?;
            println!("Marked {} records stale.", count);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// `--verbose` wins over `LOG_LEVEL`. Unparsable levels fall back to info.
fn log_filter(verbose: bool, configured: Option<&str>) -> EnvFilter {
    let level = if verbose {
        "debug"
    } else {
        configured.unwrap_or("info")
    };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            if path == "~" {
                return home.to_string_lossy().to_string();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use recordsync::cli::ModeArg;

    #[test]
    fn parses_run_with_flags() {
        let cli = Cli::try_parse_from([
            "recordsync",
            "run",
            "full-sync",
            "--endpoint",
            "/products",
            "--force",
            "--batch-size",
            "10",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                mode,
                endpoint,
                force,
                batch_size,
            } => {
                assert_eq!(mode, ModeArg::FullSync);
                assert_eq!(endpoint.as_deref(), Some("/products"));
                assert!(force);
                assert_eq!(batch_size, Some(10));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn rejects_unknown_mode() {
        let res = Cli::try_parse_from(["recordsync", "run", "qdrant-to-api"]);
        assert!(res.is_err());
    }

    #[test]
    fn reset_cursor_flags_conflict() {
        let res = Cli::try_parse_from([
            "recordsync",
            "reset-cursor",
            "--endpoint",
            "/products",
            "--stage",
            "embed",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn log_filter_follows_configured_level() {
        assert_eq!(log_filter(false, Some("warn")).to_string(), "warn");
        assert_eq!(log_filter(true, Some("warn")).to_string(), "debug");
        assert_eq!(log_filter(false, None).to_string(), "info");
        assert_eq!(log_filter(false, Some("app=notalevel")).to_string(), "info");
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = std::env::var_os("HOME") {
            let expanded = expand_tilde("~/.recordsync");
            assert_eq!(
                expanded,
                format!("{}/.recordsync", home.to_string_lossy())
            );
        }
        assert_eq!(expand_tilde("/tmp/data"), "/tmp/data");
    }
}
