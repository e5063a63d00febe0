//! # embed-backfill CLI
//!
//! ## Usage
//!
//! ```bash
//! embed-backfill [--config ./config/backfill.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `embed-backfill run <owner> <name>` | Resolve the repository and embed every pending chunk |
//! | `embed-backfill status <owner> <name>` | Show how many chunks are embedded |
//!
//! `run` exits non-zero when the repository cannot be resolved or the
//! embedding model fails. A run that saves only some chunks still exits
//! zero; its summary lists the failures, and the next run retries them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use embed_backfill::backfill::{self, BackfillOptions};
use embed_backfill::config;
use embed_backfill::models::RepoKey;
use embed_backfill::progress::ProgressMode;
use embed_backfill::stats;

/// Backfill vector embeddings for ingested source-code chunks.
#[derive(Parser)]
#[command(name = "embed-backfill", version)]
struct Cli {
    /// Path to configuration file (TOML). Optional; environment variables
    /// (`DATABASE_URL`, `BACKEND_URL`, `INGEST_TIMEOUT_SECS`) override it.
    #[arg(long, global = true, default_value = "./config/backfill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every chunk of a repository that has no embedding yet.
    ///
    /// Asks the ingestion service to process the repository first. If the
    /// service is rate limiting or times out, the most recent matching
    /// repository already in the database is used instead.
    Run {
        #[command(flatten)]
        repo: RepoArgs,

        /// Resolve the repository from the database without calling the
        /// ingestion service.
        #[arg(long)]
        skip_ingest: bool,

        /// Count pending chunks without embedding anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show embedding coverage for a repository already in the database.
    Status {
        #[command(flatten)]
        repo: RepoArgs,
    },
}

#[derive(clap::Args)]
struct RepoArgs {
    /// Repository owner (user or organization).
    owner: String,

    /// Repository name.
    name: String,

    /// Subfolder the repository was ingested from. Omit for the whole
    /// repository.
    #[arg(long)]
    folder: Option<String>,
}

impl RepoArgs {
    fn key(self) -> RepoKey {
        RepoKey::new(self.owner, self.name, self.folder)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            repo,
            skip_ingest,
            dry_run,
            progress,
        } => {
            let key = repo.key();
            let options = BackfillOptions {
                dry_run,
                skip_ingest,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let report = backfill::run_backfill(&cfg, &key, options, mode).await?;
            backfill::print_summary(&key, &report);
        }
        Commands::Status { repo } => {
            stats::run_status(&cfg, &repo.key()).await?;
        }
    }

    Ok(())
}
