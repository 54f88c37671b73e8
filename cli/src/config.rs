//! `nameindexd.toml`: daemon configuration.
//!
//! ```toml
//! [node]
//! rpc_url  = "http://127.0.0.1:8334"
//! rpc_user = "user"
//! rpc_pass = "secret"
//! notify   = "poll"          # or "websocket"
//! rpc_cert = "rpc.cert"      # trust a self-signed node certificate
//!
//! [index]
//! genesis_height = 563719
//! database       = "nameindex.db"
//!
//! [retry]
//! max_retries = 5
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use nameindex_core::retry::RetryConfig;
use nameindex_core::store::DEFAULT_GENESIS_HEIGHT;
use nameindex_core::watcher::DEFAULT_WINDOW;
use nameindex_core::IndexerConfig;

pub const CONFIG_FILE: &str = "nameindexd.toml";

/// `<local data dir>/nameindex`, or `./nameindex` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nameindex")
}

/// How the daemon learns about new blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    #[default]
    Poll,
    Websocket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_pass: String,
    #[serde(default)]
    pub notify: NotifyMode,
    /// Websocket endpoint; derived from `rpc_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Recent headers the polling watcher compares for reorgs.
    #[serde(default = "default_reorg_window")]
    pub reorg_window: usize,
    /// PEM certificate to trust for https/wss (bchd's `rpc.cert`), relative
    /// to the data dir unless absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSection {
    #[serde(default = "default_genesis_height")]
    pub genesis_height: u64,
    /// Database file, relative to the data dir unless absolute.
    #[serde(default = "default_database")]
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub index: IndexSection,
    #[serde(default)]
    pub retry: RetrySection,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_reorg_window() -> usize {
    DEFAULT_WINDOW
}

fn default_genesis_height() -> u64 {
    DEFAULT_GENESIS_HEIGHT
}

fn default_database() -> String {
    "nameindex.db".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            rpc_user: String::new(),
            rpc_pass: String::new(),
            notify: NotifyMode::default(),
            ws_url: None,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            reorg_window: default_reorg_window(),
            rpc_cert: None,
        }
    }
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            genesis_height: default_genesis_height(),
            database: default_database(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Config {
    /// Load `path`, writing a default file first if there is none.
    ///
    /// Returns the config and whether the file was just created.
    pub fn load_or_create(path: &Path) -> anyhow::Result<(Self, bool)> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            return Ok((config, false));
        }

        let config = Self::default();
        config.save(path)?;
        Ok((config, true))
    }

    /// Write the config, readable by the owner only (it holds credentials).
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("failed to create config file {}", path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// The daemon cannot start without node credentials.
    pub fn validate(&self, path: &Path) -> anyhow::Result<()> {
        let missing: Vec<&str> = [
            ("node.rpc_url", &self.node.rpc_url),
            ("node.rpc_user", &self.node.rpc_user),
            ("node.rpc_pass", &self.node.rpc_pass),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() {
            bail!(
                "set {} in {} before starting the daemon",
                missing.join(", "),
                path.display()
            );
        }
        Ok(())
    }

    /// Websocket endpoint: `ws_url`, or `rpc_url` with a ws scheme and `/ws`.
    pub fn ws_url(&self) -> String {
        if let Some(url) = &self.node.ws_url {
            return url.clone();
        }
        let base = self.node.rpc_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/ws")
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        resolve(data_dir, &self.index.database)
    }

    /// Contents of `node.rpc_cert`, if one is configured.
    pub fn rpc_cert_pem(&self, data_dir: &Path) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(cert) = &self.node.rpc_cert else {
            return Ok(None);
        };
        let path = resolve(data_dir, cert);
        let pem = fs::read(&path)
            .with_context(|| format!("failed to read node.rpc_cert {}", path.display()))?;
        Ok(Some(pem))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.node.request_timeout_ms)
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            genesis_height: self.index.genesis_height,
            poll_interval: Duration::from_millis(self.node.poll_interval_ms),
            retry: RetryConfig {
                max_retries: self.retry.max_retries,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
                ..RetryConfig::default()
            },
        }
    }
}

fn resolve(data_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}
