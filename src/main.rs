use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use feedsift::config::Config;
use feedsift::feed::{FeedClient, HttpFeedClient, ManifestFetcher};
use feedsift::ingest::{aggregate_with, filter_known, BatchScheduler, CandidateSet, RunSummary};
use feedsift::storage::{Database, DatabaseError, ENTRIES_TABLE};
use feedsift::util::validate_url;

/// Get the config directory path (~/.config/feedsift/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsift"))
}

#[derive(Parser, Debug)]
#[command(name = "feedsift", version, about = "Discover, validate and store RSS/Atom feeds")]
struct Cli {
    /// Config file (default: ~/.config/feedsift/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Command-line values that win over the config file.
#[derive(Args, Debug)]
struct Overrides {
    /// Candidates per batch
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Concurrent fetches per batch
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Per-fetch timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect candidates from OPML files and remote lists, then ingest them
    AddLists {
        /// Feed store
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Directory scanned recursively for OPML files
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Remote JSON/YAML list of feed URLs (repeatable)
        #[arg(long = "source", value_name = "URL")]
        sources: Vec<String>,
    },

    /// Treat every link of a places store as a candidate
    Convert {
        /// Places store to read links from
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Feed store to write to
        #[arg(long, value_name = "FILE")]
        output_db: PathBuf,

        /// Table of the places store holding the links
        #[arg(long, default_value = ENTRIES_TABLE)]
        table: String,
    },

    /// Copy records of another feed store whose links are unknown here
    Merge {
        /// Target feed store
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Store to copy from
        #[arg(long, value_name = "FILE")]
        other: PathBuf,
    },
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in path: {}", path.display()))
}

async fn open_store(path: &Path) -> Result<Database> {
    report_locked(path, Database::open(path_str(path)?).await)
}

fn report_locked(path: &Path, opened: Result<Database, DatabaseError>) -> Result<Database> {
    match opened {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: '{}' is locked or cannot be opened. Close other users of it and try again.",
                path.display()
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database '{}': {}", path.display(), e)),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(batch_size) = cli.overrides.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(workers) = cli.overrides.workers {
        config.workers = workers;
    }
    if let Some(timeout_secs) = cli.overrides.timeout_secs {
        config.fetch_timeout_secs = timeout_secs;
    }
    config.validate()?;
    Ok(config)
}

/// Filter `candidates` against `db_path`, then ingest what is left.
async fn ingest(
    config: &Config,
    client: Arc<dyn FeedClient>,
    db_path: &Path,
    candidates: CandidateSet,
) -> Result<RunSummary> {
    let db = open_store(db_path).await?;
    let remaining = filter_known(
        candidates,
        client.as_ref(),
        &db,
        config.fetch_timeout(),
        config.allow_private_hosts,
    )
    .await
    .context("Failed to check candidates against the store")?;
    db.close().await;

    println!("{} new candidates to validate", remaining.len());

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            println!("{update}");
        }
    });

    let scheduler = BatchScheduler::new(path_str(db_path)?, client)
        .batch_size(config.batch_size)
        .pool_options(config.pool_options())
        .progress_updates(progress_tx);
    let result = scheduler.run(remaining.into_vec()).await;

    // Dropping the scheduler closes the progress channel
    drop(scheduler);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Progress printer failed");
    }

    result
}

async fn merge(db_path: &Path, other_path: &Path) -> Result<()> {
    let target = open_store(db_path).await?;
    let other = open_store(other_path).await?;

    let summary = target
        .merge_from(&other)
        .await
        .with_context(|| format!("Failed to merge '{}' into '{}'", other_path.display(), db_path.display()))?;
    other.close().await;
    target.close().await;

    println!(
        "Merged {} records: {} copied, {} already present",
        summary.read, summary.copied, summary.present
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let client = HttpFeedClient::with_user_agent(&config.user_agent)
        .context("Failed to build HTTP client")?
        .max_retries(config.max_retries);

    match &cli.command {
        Command::AddLists { db, dir, sources } => {
            let sources = config.sources(dir.as_deref(), sources);
            if sources.is_empty() {
                anyhow::bail!("No sources: pass --dir or --source, or set scan_dir/remote_sources in the config");
            }

            let fetcher = ManifestFetcher::new(client.http().clone()).timeout(config.fetch_timeout());
            let candidates = aggregate_with(&sources, &fetcher, config.allow_private_hosts).await;
            println!("Collected {} candidates from {} sources", candidates.len(), sources.len());

            let summary = ingest(&config, Arc::new(client), db, candidates).await?;
            println!("{summary}");
        }
        Command::Convert { db, output_db, table } => {
            let places = report_locked(db, Database::open_read_only(path_str(db)?).await)?;
            let links = places
                .get_entry_links(table)
                .await
                .with_context(|| format!("Failed to read links from '{}'", db.display()))?;
            places.close().await;

            let candidates: CandidateSet = links
                .iter()
                .filter(|link| config.allow_private_hosts || validate_url(link).is_ok())
                .collect();
            println!("Read {} links, {} candidates", links.len(), candidates.len());

            let summary = ingest(&config, Arc::new(client), output_db, candidates).await?;
            println!("{summary}");
        }
        Command::Merge { db, other } => merge(db, other).await?,
    }

    Ok(())
}
