//! `clausewatch` binary entry point: loads configuration, opens the
//! SQLite store, starts the pipeline worker pool, and serves the HTTP
//! surface from spec.md §6.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use clausewatch::cache::ResultCache;
use clausewatch::config::Config;
use clausewatch::http::{self, AppState};
use clausewatch::intake::ReviewIntake;
use clausewatch::llm::LlmClient;
use clausewatch::pipeline::PipelineExecutor;
use clausewatch::queue::WorkQueue;
use clausewatch::store::ReviewStore;
use clausewatch::worker;

#[derive(Parser)]
#[command(name = "clausewatch", version)]
#[command(about = "Contract review pipeline service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server and pipeline workers (default)
    Serve,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Arc::new(Config::load()?);
    tracing::info!(bind = %config.bind_addr, sqlite_path = %config.sqlite_path.display(), "starting clausewatch");

    let pool = SqlitePoolOptions::new().max_connections(8).connect(&config.sqlite_url()).await?;
    let store = ReviewStore::new(pool);
    store.initialize().await?;

    let cache = ResultCache::new(config.enable_pipeline_cache, config.cache_ttl_seconds);
    let (queue, receiver) = WorkQueue::new(config.max_concurrent_runs.max(1) as usize * 4);
    let llm = LlmClient::from_config(&config);

    let executor = Arc::new(PipelineExecutor::new(store.clone(), cache.clone(), llm, Arc::clone(&config)));
    let _workers = worker::spawn_workers(executor, receiver, config.worker_concurrency, config.max_attempts);

    let intake = ReviewIntake::new(store.clone(), queue, config.max_concurrent_runs, config.rate_limit_per_minute);
    let state = Arc::new(AppState { store, intake, cache, config: Arc::clone(&config) });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => http::serve(config.bind_addr, state).await?,
    }

    Ok(())
}
