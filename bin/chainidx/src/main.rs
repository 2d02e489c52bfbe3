//! Chain indexer operator CLI (chainidx)
//!
//! Opens the SQLite store named by the configuration and drives the index
//! maintainer, the query engine and the event bus from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Write ./chainidx.yaml with every default spelled out
//! chainidx init
//!
//! # Index a file of JSON-encoded block bundles, one per line
//! chainidx import --file blocks.jsonl
//!
//! # Repair heights whose index phase never completed
//! chainidx reindex
//!
//! # Drop the tip after a reorg
//! chainidx rollback --height 1200
//!
//! # Inspect
//! chainidx status
//! chainidx blocks --from 100 --to 200 --limit 20
//! chainidx address 0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266
//! ```

mod import;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_primitives::Address;
use chainidx_events::EventBus;
use chainidx_indexer::{EventDecoder, IndexMaintainer, MaintainerConfig, SystemContracts};
use chainidx_operations::config::{
    parse_config, validate_config, write_default_config, DEFAULT_CONFIG_PATH, DEFAULT_CONFIG_YAML,
};
use chainidx_operations::{init_tracing_from_config, IndexerConfig, MetricsRegistry};
use chainidx_query::{BlockRangeFilter, PageRequest, QueryContext, QueryEngine};
use chainidx_store::{ChainStore, IndexWriter, SqliteChainStore};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Pending heights reported by `status`.
const PENDING_SCAN_LIMIT: usize = 100_000;

#[derive(Parser)]
#[command(name = "chainidx")]
#[command(about = "Blockchain indexer: ingest, repair and query indexed chain data")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = "CHAINIDX_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override `storage.path`
    #[arg(long, global = true, env = "CHAINIDX_DATA_DIR")]
    data_dir: Option<String>,

    /// Override `observability.log_level`
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Index block bundles from a JSON-lines file
    Import(import::ImportArgs),
    /// Rebuild secondary indexes from stored primary data
    Reindex {
        /// A single height; without it, every pending height is repaired
        #[arg(long)]
        height: Option<u64>,

        /// Maximum pending heights to repair
        #[arg(long, default_value_t = 1_000)]
        limit: usize,
    },
    /// Remove a height and everything derived from it
    Rollback {
        #[arg(long)]
        height: u64,
    },
    /// Print watermarks and aggregate counters
    Status,
    /// List blocks, newest first unless a range is given
    Blocks {
        #[arg(long)]
        from: Option<u64>,

        #[arg(long)]
        to: Option<u64>,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long)]
        limit: Option<u64>,
    },
    /// List the transactions an address sent or received
    Address {
        address: Address,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    if let Commands::Init { force } = cli.command {
        return init(&cli.global.config, force);
    }

    let config = resolve_config(&cli.global)?;
    init_tracing_from_config(&config.observability);
    tracing::debug!(config = %cli.global.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Import(args) => import::run(config, args).await,
        Commands::Reindex { height, limit } => {
            let maintainer = open_maintainer(&config, None, None)?;
            let summaries = match height {
                Some(height) => vec![maintainer.reindex_height(height)?],
                None => maintainer.reindex_pending(limit)?,
            };
            let records: u64 = summaries.iter().map(|s| s.records).sum();
            tracing::info!(heights = summaries.len(), records, "Reindex finished");
            print_json(&json!({
                "heights": summaries.iter().map(|s| s.height).collect::<Vec<_>>(),
                "records": records,
            }))
        }
        Commands::Rollback { height } => {
            let maintainer = open_maintainer(&config, None, None)?;
            maintainer.rollback_height(height)?;
            print_json(&json!({
                "rolledBack": height,
                "indexedHeight": maintainer.indexed_watermark()?,
            }))
        }
        Commands::Status => {
            let store = open_store(&config)?;
            let pending = store.pending_index_heights(PENDING_SCAN_LIMIT)?;
            let status = QueryEngine::new(store, config.query.clone()).status()?;
            print_json(&json!({
                "status": status,
                "pendingIndexHeights": pending.len(),
            }))
        }
        Commands::Blocks {
            from,
            to,
            offset,
            limit,
        } => {
            let engine = QueryEngine::new(open_store(&config)?, config.query.clone());
            let range = BlockRangeFilter {
                number_from: from,
                number_to: to,
            };
            let page = PageRequest { offset, limit };
            print_json(&engine.blocks(&QueryContext::background(), range, page)?)
        }
        Commands::Address {
            address,
            offset,
            limit,
        } => {
            let engine = QueryEngine::new(open_store(&config)?, config.query.clone());
            let page = PageRequest { offset, limit };
            let activity = engine.address_activity(
                &QueryContext::background(),
                address,
                BlockRangeFilter::unbounded(),
                page,
            )?;
            print_json(&activity)
        }
    }
}

fn init(path: &Path, force: bool) -> CliResult<()> {
    if write_default_config(path, force)? {
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists, pass --force to replace it", path.display());
    }
    Ok(())
}

/// Parse the config file (or the defaults when it is missing), apply the
/// command-line overrides, then validate.
fn resolve_config(args: &GlobalArgs) -> CliResult<IndexerConfig> {
    let source = args.config.display().to_string();
    let mut config = match std::fs::read_to_string(&args.config) {
        Ok(content) => parse_config(&content, &source)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            parse_config(DEFAULT_CONFIG_YAML, "<defaults>")?
        }
        Err(err) => return Err(format!("failed to read config file '{source}': {err}").into()),
    };

    if let Some(data_dir) = &args.data_dir {
        config.storage.path = data_dir.clone();
    }
    if let Some(level) = &args.log_level {
        config.observability.log_level = level.clone();
    }
    validate_config(&config)?;
    Ok(config)
}

fn open_store(config: &IndexerConfig) -> CliResult<Arc<SqliteChainStore>> {
    let path = config.storage.database_path();
    let store = SqliteChainStore::open(&path, config.storage.to_store_options())?;
    tracing::info!(
        path = %path.display(),
        latest = ?store.latest_height().ok(),
        "Opened chain store"
    );
    Ok(Arc::new(store))
}

fn open_maintainer(
    config: &IndexerConfig,
    bus: Option<EventBus>,
    metrics: Option<&MetricsRegistry>,
) -> CliResult<IndexMaintainer<SqliteChainStore>> {
    let decoder = EventDecoder::new(SystemContracts::from(&config.chain.system_contracts));
    Ok(IndexMaintainer::new(
        open_store(config)?,
        Arc::new(decoder),
        MaintainerConfig::from(&config.chain),
        bus,
        metrics.map(|registry| registry.indexer.clone()),
    ))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
