//! es-vector-transfer CLI
//!
//! Moves documents from Elasticsearch into Pinecone, embedding them on the way.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use es_vector_transfer::ui::ConsoleUi;
use es_vector_transfer::{
    Error, ProgressBarReporter, RunOptions, TransferConfig, TransferPipeline,
};

#[derive(Parser)]
#[command(name = "es-vector-transfer")]
#[command(version)]
#[command(about = "Transfer Elasticsearch documents into a Pinecone index with embeddings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Environment file loaded before reading the configuration
    #[arg(long, value_name = "FILE", global = true)]
    env_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer documents (dry run, confirmation, then live run)
    Transfer(TransferArgs),

    /// Embed a text and query the destination index
    Search {
        /// Text to search for
        text: String,

        /// Number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,

        /// Namespace to query (defaults to DEFAULT_NAMESPACE)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show destination index statistics
    Stats,

    /// Count source documents matching a query
    Count {
        /// Elasticsearch query clause as JSON
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Check that the source and the destination are reachable
    Ping,
}

#[derive(Args)]
struct TransferArgs {
    /// Elasticsearch query clause as JSON, e.g. '{"term": {"status": "published"}}'
    #[arg(short, long, conflicts_with = "query_file")]
    query: Option<String>,

    /// File containing the query clause
    #[arg(long, value_name = "FILE")]
    query_file: Option<PathBuf>,

    /// Only run the dry run
    #[arg(long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Destination namespace override
    #[arg(short, long)]
    namespace: Option<String>,

    /// Source index override
    #[arg(long)]
    index: Option<String>,

    /// Batch size override
    #[arg(long)]
    batch_size: Option<usize>,

    /// Worker count override
    #[arg(long)]
    max_threads: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path).with_context(|| format!("cannot read {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ui = ConsoleUi::new();

    match cli.command {
        Commands::Transfer(args) => {
            run_transfer(&ui, cli.config.as_deref(), args).await?;
        }
        Commands::Search {
            text,
            top_k,
            namespace,
        } => {
            let pipeline = build_pipeline(cli.config.as_deref(), &Map::new())?;
            let matches = pipeline.search(&text, top_k, namespace.as_deref()).await?;
            ui.print_matches(&text, &matches);
        }
        Commands::Stats => {
            let pipeline = build_pipeline(cli.config.as_deref(), &Map::new())?;
            let stats = pipeline.index_stats().await?;
            ui.print_index_stats(&stats);
        }
        Commands::Count { query } => {
            let pipeline = build_pipeline(cli.config.as_deref(), &Map::new())?;
            let query = parse_query(query.as_deref(), None)?;
            let count = pipeline.count(query.as_ref()).await?;
            println!("{count}");
        }
        Commands::Ping => {
            let pipeline = build_pipeline(cli.config.as_deref(), &Map::new())?;
            pipeline.ping().await?;
            println!("✅ Source and destination are reachable");
        }
    }

    Ok(())
}

fn build_pipeline(config_path: Option<&Path>, overrides: &Map<String, Value>) -> anyhow::Result<TransferPipeline> {
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
    }
    let config = TransferConfig::load(config_path, overrides)?;
    Ok(TransferPipeline::from_config(config)?)
}

fn parse_query(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Option<Value>> {
    let raw = match (inline, file) {
        (Some(q), _) => q.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read query file {}", path.display()))?,
        (None, None) => return Ok(None),
    };
    let query: Value = serde_json::from_str(&raw).context("query is not valid JSON")?;
    Ok(Some(query))
}

async fn run_transfer(ui: &ConsoleUi, config_path: Option<&Path>, args: TransferArgs) -> anyhow::Result<()> {
    let mut overrides = Map::new();
    if let Some(index) = args.index {
        overrides.insert("es_index".to_string(), Value::from(index));
    }
    if let Some(bs) = args.batch_size {
        overrides.insert("batch_size".to_string(), Value::from(bs));
    }
    if let Some(threads) = args.max_threads {
        overrides.insert("max_threads".to_string(), Value::from(threads));
    }

    let pipeline = build_pipeline(config_path, &overrides)?;
    let query = parse_query(args.query.as_deref(), args.query_file.as_deref())?;
    let namespace = args
        .namespace
        .unwrap_or_else(|| pipeline.config().default_namespace.clone());

    let documents = pipeline.count(query.as_ref()).await?;
    ui.print_plan(pipeline.config(), documents, &namespace);
    let total_batches = usize::try_from(documents.div_ceil(pipeline.config().batch_size as u64))
        .unwrap_or(usize::MAX);

    info!("Starting dry run...");
    let reporter = ProgressBarReporter::new(total_batches);
    pipeline.set_progress_callback(reporter.clone());
    let options = RunOptions {
        query,
        dry_run: true,
        namespace: Some(namespace),
    };
    let preview = pipeline.run_with(options.clone()).await;
    reporter.finish("Dry run complete");
    let preview = preview.inspect_err(|e| ui.print_aborted(e))?;
    ui.print_dry_run(&preview);

    if args.dry_run {
        return Ok(());
    }
    if preview.processed == preview.failed && preview.processed > 0 {
        warn!("No document produced text to embed; check FIELDS_TO_EMBED");
    }

    if !args.yes && !ui.confirm_transfer(preview.processed)? {
        ui.print_cancelled();
        return Ok(());
    }

    let reporter = ProgressBarReporter::new(total_batches);
    pipeline.set_progress_callback(reporter.clone());
    let result = pipeline
        .run_with(RunOptions {
            dry_run: false,
            ..options
        })
        .await;
    reporter.finish("Transfer complete");

    match result {
        Ok(stats) => {
            ui.print_success(&stats);
            Ok(())
        }
        Err(e) => {
            if matches!(e, Error::Aborted { .. }) {
                ui.print_aborted(&e);
            } else {
                ui.print_error(&e.to_string());
            }
            Err(e.into())
        }
    }
}
