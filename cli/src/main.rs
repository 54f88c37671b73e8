//! nameindexd — follows a Bitcoin Cash node and keeps the cash-account name
//! index up to date.
//!
//! Usage:
//! ```bash
//! nameindexd                 # same as `nameindexd run`
//! nameindexd status --json
//! nameindexd lookup satoshi
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use nameindex_core::{BlockSubscriber, IndexStore, NameIndexer, PollingWatcher};
use nameindex_node::{HttpNodeClient, HttpNodeConfig, WsConfig, WsSubscriber};
use nameindex_storage::SqliteStore;

use crate::config::{default_data_dir, Config, NotifyMode, CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "nameindexd", version, about = "Cash-account name index daemon")]
struct Cli {
    /// Config file (default: <data dir>/nameindexd.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the config and the index database.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync with the node and follow new blocks (default).
    Run,
    /// Show the indexed height and record count.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List every registration of NAME.
    Lookup {
        name: String,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config_path = cli.config.clone().unwrap_or_else(|| data_dir.join(CONFIG_FILE));

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(&config_path, &data_dir).await,
        Command::Status { json } => cmd_status(&config_path, &data_dir, json).await,
        Command::Lookup { name, json } => cmd_lookup(&config_path, &data_dir, &name, json).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    let (config, created) = Config::load_or_create(config_path)?;
    if created {
        warn!(path = %config_path.display(), "wrote default config");
    }
    config.validate(config_path)?;
    let settings = config.indexer_config();

    let db_path = config.database_path(data_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::open(&db_path.to_string_lossy(), settings.genesis_height)
            .await
            .with_context(|| format!("failed to open index {}", db_path.display()))?,
    );

    let mut node_config = HttpNodeConfig::new(
        config.node.rpc_url.clone(),
        config.node.rpc_user.clone(),
        config.node.rpc_pass.clone(),
    );
    node_config.request_timeout = config.request_timeout();
    let root_cert = config.rpc_cert_pem(data_dir)?;
    node_config.root_cert = root_cert.clone();
    let node = Arc::new(HttpNodeClient::new(node_config)?);

    let subscriber: Arc<dyn BlockSubscriber> = match config.node.notify {
        NotifyMode::Poll => Arc::new(
            PollingWatcher::new(node.clone(), settings.poll_interval).with_window(config.node.reorg_window),
        ),
        NotifyMode::Websocket => {
            let mut ws_config = WsConfig::new(
                config.ws_url(),
                config.node.rpc_user.clone(),
                config.node.rpc_pass.clone(),
            );
            ws_config.root_cert = root_cert;
            Arc::new(WsSubscriber::new(ws_config))
        }
    };
    info!(
        node = node.url(),
        notify = ?config.node.notify,
        db = %db_path.display(),
        "starting nameindexd"
    );

    let indexer = NameIndexer::new(store.clone(), node, subscriber, settings.retry);
    tokio::select! {
        res = indexer.run() => {
            let processed = res.context("indexer stopped")?;
            info!(processed, "block notifications ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    store.close().await;
    Ok(())
}

/// Open the index read-only; the config only locates the database.
async fn open_reader(config_path: &Path, data_dir: &Path) -> anyhow::Result<SqliteStore> {
    let config = if config_path.exists() {
        Config::load_or_create(config_path)?.0
    } else {
        Config::default()
    };
    let db_path = config.database_path(data_dir);
    SqliteStore::open_read_only(&db_path.to_string_lossy())
        .await
        .with_context(|| format!("failed to open index {}", db_path.display()))
}

async fn cmd_status(config_path: &Path, data_dir: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_reader(config_path, data_dir).await?;
    let status = store.status().await?;
    let records = store.record_count().await?;

    if json {
        let out = serde_json::json!({
            "indexed_height": status.indexed_height,
            "schema_version": status.schema_version,
            "updated_at": status.updated_at,
            "records": records,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("indexed height : {}", status.indexed_height);
    println!("schema version : {}", status.schema_version);
    println!("records        : {records}");
    let updated = status
        .updated_at
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
    println!("last update    : {updated}");
    Ok(())
}

async fn cmd_lookup(config_path: &Path, data_dir: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let store = open_reader(config_path, data_dir).await?;
    let records = store.lookup(name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no registrations of {name:?}");
    }
    for record in &records {
        println!("{:>8}  {}  {}", record.block_height, record.txid, record.name);
    }
    Ok(())
}
