//! HTTP JSON-RPC node client backed by `reqwest`.
//!
//! Calls are single attempts: transient failures surface as
//! [`IndexerError::Rpc`] (or a retryable node code) and the indexer's
//! consumer loop decides whether to retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use nameindex_core::error::IndexerError;
use nameindex_core::node::NodeClient;
use nameindex_core::types::NodeBlock;

use crate::block::decode_block;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

/// Connection settings for [`HttpNodeClient`].
#[derive(Debug, Clone)]
pub struct HttpNodeConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub request_timeout: Duration,
    /// PEM certificate to trust, for a node with a self-signed cert.
    pub root_cert: Option<Vec<u8>>,
}

impl HttpNodeConfig {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            request_timeout: Duration::from_secs(30),
            root_cert: None,
        }
    }
}

/// JSON-RPC client for a bchd or BCHN node.
pub struct HttpNodeClient {
    url: String,
    user: String,
    password: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    pub fn new(config: HttpNodeConfig) -> Result<Self, IndexerError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(pem) = &config.root_cert {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| IndexerError::Config(format!("invalid node certificate: {e}")))?;
            builder = builder.use_native_tls().add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| IndexerError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            url: config.url,
            user: config.user,
            password: config.password,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and deserialize its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        debug!(method, id, "rpc call");

        let value = self.send_once(&req).await?.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| IndexerError::Decode(format!("{method}: unexpected result: {e}")))
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, IndexerError> {
        let resp = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(req)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IndexerError::Config(format!(
                "node at {} rejected the RPC credentials (HTTP {})",
                self.url,
                status.as_u16()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        // Nodes answer RPC errors with HTTP 500 and a JSON error body.
        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(parsed) if status.is_success() || parsed.error.is_some() => Ok(parsed),
            _ if !status.is_success() => Err(IndexerError::Rpc(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            ))),
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(IndexerError::Rpc(format!("malformed response: {e}"))),
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn best_height(&self) -> Result<u64, IndexerError> {
        self.call("getblockcount", vec![]).await
    }

    async fn block_hash(&self, height: u64) -> Result<String, IndexerError> {
        self.call("getblockhash", vec![Value::from(height)]).await
    }

    async fn block_by_height(&self, height: u64) -> Result<NodeBlock, IndexerError> {
        let hash = self.block_hash(height).await?;
        let raw: String = self
            .call("getblock", vec![Value::from(hash.clone()), Value::Bool(false)])
            .await?;
        let bytes = hex::decode(raw.trim())
            .map_err(|e| IndexerError::Decode(format!("block {hash}: invalid hex: {e}")))?;

        let block = decode_block(height, &bytes)?;
        if block.hash != hash {
            return Err(IndexerError::Decode(format!(
                "block at height {height} hashes to {}, node reported {hash}",
                block.hash
            )));
        }
        debug!(height, txs = block.transactions.len(), "fetched block");
        Ok(block)
    }
}
