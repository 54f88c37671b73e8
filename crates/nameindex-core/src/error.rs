//! Error types for the nameindex pipeline.

use thiserror::Error;

/// Node JSON-RPC error codes worth retrying: the requested block is not
/// (yet) known, the height is past the tip, or the node is still starting.
const TRANSIENT_NODE_CODES: [i64; 3] = [-5, -8, -28];

/// Errors that can occur while indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Transport-level failure talking to the node (connection, timeout, HTTP).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node answered with a JSON-RPC error object.
    #[error("Node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unsupported schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("Corrupt index status: {0}")]
    CorruptStatus(String),

    #[error("Block {height} does not follow indexed height {indexed}")]
    HeightGap { height: u64, indexed: u64 },

    /// A raw block or transaction could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Block event channel closed")]
    ChannelClosed,

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the operation may succeed when retried later.
    ///
    /// Store errors are never transient: a failed commit leaves the index at
    /// its previous height, and the process is expected to restart from it.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rpc(_) => true,
            Self::Node { code, .. } => TRANSIENT_NODE_CODES.contains(code),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        assert!(IndexerError::Rpc("connection refused".into()).is_transient());
    }

    #[test]
    fn node_error_classification() {
        let out_of_range = IndexerError::Node {
            code: -8,
            message: "Block height out of range".into(),
        };
        assert!(out_of_range.is_transient());

        let auth = IndexerError::Node {
            code: -32600,
            message: "invalid request".into(),
        };
        assert!(!auth.is_transient());
    }

    #[test]
    fn storage_and_schema_errors_are_fatal() {
        assert!(!IndexerError::Storage("disk full".into()).is_transient());
        assert!(!IndexerError::UnsupportedSchema { found: 2, supported: 1 }.is_transient());
    }
}
