//! chainmirror CLI: inspect the mirror and replay blocks into it.
//!
//! Usage:
//! ```bash
//! chainmirror info
//! chainmirror config [--file mirror.yaml]
//! chainmirror status --db ./mirror.db
//! chainmirror blocks --db ./mirror.db --limit 20 [--next 0000002a]
//! chainmirror replay --db ./mirror.db --blocks ./blocks.json [--config mirror.yaml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chainmirror_core::block::BlockMapper;
use chainmirror_core::config::SyncConfig;
use chainmirror_core::driver::{CycleOutcome, SyncDriver};
use chainmirror_core::pagination::PageQuery;
use chainmirror_core::source::MemorySource;
use chainmirror_core::status::StatusLedger;
use chainmirror_core::types::SourceBlock;
use chainmirror_indexers::default_registry;
use chainmirror_storage::SqliteStore;

#[derive(Parser)]
#[command(
    name = "chainmirror",
    about = "Reorg-safe blockchain mirror: ChainMirror CLI",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show build and capability info
    Info,

    /// Print the effective sync configuration as YAML
    Config {
        /// YAML file to load; defaults apply to missing fields
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show the status ledger and the indexed tip
    Status {
        /// SQLite database of the mirror
        #[arg(long)]
        db: String,
    },

    /// List indexed blocks, newest first
    Blocks {
        #[arg(long)]
        db: String,
        #[arg(long, default_value_t = 30)]
        limit: usize,
        /// Cursor from a previous page
        #[arg(long)]
        next: Option<String>,
    },

    /// Index a JSON array of verbose blocks (index = height) into the mirror
    Replay {
        #[arg(long)]
        db: String,
        /// File holding `getblock <hash> 2` style blocks
        #[arg(long)]
        blocks: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Config { file } => cmd_config(file),
        Commands::Status { db } => cmd_status(&db).await,
        Commands::Blocks { db, limit, next } => cmd_blocks(&db, limit, next).await,
        Commands::Replay { db, blocks, config } => cmd_replay(&db, blocks, config).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

fn cmd_info() {
    let defaults = SyncConfig::default();
    println!("ChainMirror v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default poll interval: {}ms", defaults.poll_interval_ms);
    println!("  Default stop timeout: {}ms", defaults.stop_timeout_ms);
    println!("  Readiness lag: {} blocks", defaults.readiness_max_lag);
    println!("  Storage backends: memory, SQLite");
    println!(
        "  Indexed ops: CreateToken, AppointOracle, UpdateOracle, RemoveOracle, \
         SetOracleData, CreateMasternode, ResignMasternode"
    );
}

fn load_config(file: Option<PathBuf>) -> Result<SyncConfig> {
    let config = match file {
        Some(path) => SyncConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    config.validate().context("invalid config")?;
    Ok(config)
}

fn cmd_config(file: Option<PathBuf>) -> Result<()> {
    let config = load_config(file)?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

async fn open(db: &str) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(db)
        .await
        .with_context(|| format!("opening database {db}"))?;
    Ok(Arc::new(store))
}

async fn cmd_status(db: &str) -> Result<()> {
    let store = open(db).await?;
    let ledger = StatusLedger::new(store.clone());
    let blocks = BlockMapper::new(store);

    match ledger.get().await? {
        Some(status) => println!(
            "status: {} at height {} ({}), updated {}",
            status.status, status.height, status.hash, status.updated_at
        ),
        None => println!("status: nothing indexed yet"),
    }
    if let Some(tip) = blocks.get_highest().await? {
        println!("tip:    {} at height {}", tip.hash, tip.height);
    }
    Ok(())
}

async fn cmd_blocks(db: &str, limit: usize, next: Option<String>) -> Result<()> {
    let blocks = BlockMapper::new(open(db).await?);
    let mut query = PageQuery::new(limit);
    if let Some(cursor) = next {
        query = query.after(cursor);
    }
    let page = blocks.query(&query).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

async fn cmd_replay(db: &str, file: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let chain: Vec<SourceBlock> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
    tracing::info!(blocks = chain.len(), file = %file.display(), "replaying");

    let store = open(db).await?;
    let registry = default_registry(store.clone(), &config);
    let driver = SyncDriver::new(Arc::new(MemorySource::new(chain)), store, registry, config);
    driver.start();

    match driver.cycle().await? {
        CycleOutcome::Completed { steps } => println!("replay complete: {steps} steps"),
        CycleOutcome::Skipped => println!("replay skipped"),
    }
    if let Some(tip) = driver.tip().await? {
        println!("tip: {} at height {}", tip.hash, tip.height);
    }
    Ok(())
}
