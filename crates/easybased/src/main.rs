//! easybased - easybase daemon
//!
//! Runs the collection registry and the search sync engine against a
//! PostgreSQL database and an Elasticsearch cluster.
//!
//! # Usage
//!
//! ```bash
//! # Run the sync engine until Ctrl-C
//! easybased -c easybase.yaml serve
//!
//! # Development mode with in-process stores
//! easybased serve --memory
//!
//! # One-shot consistency operations
//! easybased -c easybase.yaml verify orders
//! easybased -c easybase.yaml repair orders
//! easybased -c easybase.yaml reindex orders
//!
//! # Validate configuration
//! easybased -c easybase.yaml check-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use easybase_core::config::{EasybaseConfig, LogFormat};
use easybase_core::prelude::*;
use easybase_rdbc::manager::DataSourceManager;
use easybase_rdbc::postgres::PgConnectionFactory;
use easybase_search::client::ElasticsearchClient;
use easybase_search::memory::MemoryIndex;
use easybase_search::SearchIndex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "easybased")]
#[command(version, about = "easybase schema registry and search sync daemon")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "EASYBASE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides logging.level)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync engine until interrupted
    Serve {
        /// Use in-process stores instead of PostgreSQL and Elasticsearch
        #[arg(long)]
        memory: bool,
    },
    /// List registered collections
    Collections,
    /// Compare row and document counts for a collection
    Verify {
        /// Collection name
        collection: String,
    },
    /// Index missing rows and delete orphaned documents
    Repair {
        /// Collection name
        collection: String,
    },
    /// Recreate a collection's index from its rows
    Reindex {
        /// Collection name
        collection: String,
    },
    /// Load, expand and validate the configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EasybaseConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EasybaseConfig::default(),
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.format);

    match cli.command {
        Commands::Serve { memory } => serve(config, memory).await,
        Commands::Collections => list_collections(config).await,
        Commands::Verify { collection } => verify(config, &collection).await,
        Commands::Repair { collection } => repair(config, &collection).await,
        Commands::Reindex { collection } => reindex(config, &collection).await,
        Commands::CheckConfig => check_config(&config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .init(),
    }
}

async fn connect_store(config: &EasybaseConfig) -> Result<Store> {
    let manager =
        DataSourceManager::connect(Arc::new(PgConnectionFactory), config.database.pool_config())
            .await
            .context("Failed to connect to the database")?;
    Ok(Arc::new(SqlRecordStore::new(Arc::new(manager))))
}

fn connect_index(config: &EasybaseConfig) -> Result<Arc<dyn SearchIndex>> {
    let mut builder = ElasticsearchClient::builder()
        .url(&config.search.url)
        .timeout(config.search.timeout());
    if let Some((username, password)) = config.search.credentials() {
        builder = builder.basic_auth_secret(username, password);
    }
    let client = builder.build().context("Failed to build search client")?;
    Ok(Arc::new(client))
}

async fn build_service(config: &EasybaseConfig, memory: bool) -> Result<CollectionService> {
    let (store, index): (Store, Arc<dyn SearchIndex>) = if memory {
        warn!("Using in-process stores, nothing is persisted");
        (
            Arc::new(MemoryRecordStore::new()) as Store,
            Arc::new(MemoryIndex::new()) as Arc<dyn SearchIndex>,
        )
    } else {
        (connect_store(config).await?, connect_index(config)?)
    };

    let service = CollectionService::build(store, index, config.sync.clone());
    service
        .initialize()
        .await
        .context("Failed to initialize collection registry")?;
    Ok(service)
}

async fn serve(config: EasybaseConfig, memory: bool) -> Result<()> {
    info!("Starting easybased");
    let service = build_service(&config, memory).await?;
    info!(
        collections = service.registry().len(),
        batch_size = config.sync.batch_size,
        "Collection registry loaded"
    );

    let handle = service.engine().start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, shutting down");

    handle.shutdown().await;
    let stats = service.engine().stats();
    info!(
        applied = stats.applied,
        retried = stats.retried,
        abandoned = stats.abandoned,
        "Goodbye!"
    );
    Ok(())
}

async fn list_collections(config: EasybaseConfig) -> Result<()> {
    let service = build_service(&config, false).await?;
    let collections = service.list_collections();
    if collections.is_empty() {
        println!("No collections registered");
        return Ok(());
    }

    println!("{:<24} {:<24} {:<24} FIELDS", "NAME", "TABLE", "INDEX");
    for definition in collections {
        println!(
            "{:<24} {:<24} {:<24} {}",
            definition.name,
            definition.table_name,
            definition.index_name,
            definition.fields.len()
        );
    }
    Ok(())
}

async fn verify(config: EasybaseConfig, collection: &str) -> Result<()> {
    let service = build_service(&config, false).await?;
    if service.engine().verify_consistency(collection).await {
        println!("{collection}: consistent");
        Ok(())
    } else {
        anyhow::bail!("{collection}: inconsistent or unavailable")
    }
}

async fn repair(config: EasybaseConfig, collection: &str) -> Result<()> {
    let service = build_service(&config, false).await?;
    let engine = service.engine();
    let repaired = engine.repair_inconsistencies(collection).await;
    flush(engine).await;
    println!("{collection}: {repaired} operations repaired");
    Ok(())
}

async fn reindex(config: EasybaseConfig, collection: &str) -> Result<()> {
    let service = build_service(&config, false).await?;
    let engine = service.engine();
    let count = engine.reindex_collection(collection).await;
    flush(engine).await;
    println!("{collection}: {count} records reindexed");
    Ok(())
}

/// Apply queued operations before a one-shot command exits
async fn flush(engine: &SyncEngine) {
    engine.drain_queue().await;
    for _ in 0..engine.config().max_retries {
        if engine.total_retry_len() == 0 {
            break;
        }
        engine.process_retries().await;
    }
    let stats = engine.stats();
    if stats.abandoned > 0 || engine.total_retry_len() > 0 {
        warn!(
            abandoned = stats.abandoned,
            pending = engine.total_retry_len(),
            "Some operations were not applied"
        );
    }
}

fn check_config(config: &EasybaseConfig) -> Result<()> {
    config.validate()?;
    println!("Configuration is valid");
    println!("  database: {:?}", config.database);
    println!("  search:   {}", config.search.url);
    println!(
        "  sync:     batch_size={} max_retries={} queue_capacity={}",
        config.sync.batch_size, config.sync.max_retries, config.sync.queue_capacity
    );
    Ok(())
}
