//! Shared types for the indexing pipeline.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IndexerError;

// ─── TxId ─────────────────────────────────────────────────────────────────────

/// A 32-byte transaction id in RPC display byte order (the order `txid`
/// strings are printed in, i.e. the reverse of the hashed bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    /// Build from the raw double-SHA256 output (internal byte order).
    pub fn from_internal(mut hash: [u8; 32]) -> Self {
        hash.reverse();
        Self(hash)
    }

    /// Parse a 64-character display hex string.
    pub fn from_hex(s: &str) -> Result<Self, IndexerError> {
        let bytes = hex::decode(s).map_err(|e| IndexerError::Decode(format!("txid {s}: {e}")))?;
        Self::try_from(bytes.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl TryFrom<&[u8]> for TxId {
    type Error = IndexerError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IndexerError::Decode(format!("txid must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── NameRecord ───────────────────────────────────────────────────────────────

/// One name registration found in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Height of the block containing the registering transaction.
    pub block_height: u64,
    /// Registered name; only `[0-9A-Za-z_]` characters.
    pub name: String,
    /// Transaction that carried the registration.
    pub txid: TxId,
}

impl NameRecord {
    /// Pair a parsed name with its transaction and block.
    ///
    /// `name` must already have passed the script parser's charset check,
    /// so every byte is ASCII.
    pub fn new(block_height: u64, name: &[u8], txid: TxId) -> Self {
        Self {
            block_height,
            name: name.iter().map(|&b| b as char).collect(),
            txid,
        }
    }
}

// ─── IndexStatus ──────────────────────────────────────────────────────────────

/// The status row set of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Highest block height whose records are fully reflected in the index.
    pub indexed_height: u64,
    /// Layout version the store was created with.
    pub schema_version: i64,
    /// Unix timestamp of the last committed mutation, if any.
    pub updated_at: Option<i64>,
}

// ─── BlockEvent ───────────────────────────────────────────────────────────────

/// A chain notification from the node, consumed once by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEvent {
    /// A block was connected at this height.
    Connected(u64),
    /// The block at this height was removed from the main chain.
    Disconnected(u64),
}

impl BlockEvent {
    pub fn height(&self) -> u64 {
        match self {
            Self::Connected(h) | Self::Disconnected(h) => *h,
        }
    }
}

impl fmt::Display for BlockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(h) => write!(f, "connected({h})"),
            Self::Disconnected(h) => write!(f, "disconnected({h})"),
        }
    }
}

// ─── Node block model ─────────────────────────────────────────────────────────

/// A transaction output; only the script matters to the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in satoshis.
    pub value: u64,
    pub script: Vec<u8>,
}

/// A transaction with its id and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTransaction {
    pub txid: TxId,
    pub outputs: Vec<TxOutput>,
}

/// A full block as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBlock {
    pub height: u64,
    /// Block hash, display hex.
    pub hash: String,
    pub transactions: Vec<NodeTransaction>,
}

/// Height and hash of a block; enough to follow the chain tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txid_display_roundtrip() {
        let hex_id = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        let id = TxId::from_hex(hex_id).unwrap();
        assert_eq!(id.to_string(), hex_id);
    }

    #[test]
    fn txid_from_internal_reverses() {
        let mut internal = [0u8; 32];
        internal[0] = 0xaa;
        internal[31] = 0x01;
        let id = TxId::from_internal(internal);
        assert_eq!(id.0[0], 0x01);
        assert_eq!(id.0[31], 0xaa);
    }

    #[test]
    fn txid_rejects_wrong_length() {
        assert!(TxId::from_hex("abcd").is_err());
        assert!(TxId::from_hex("zz").is_err());
    }

    #[test]
    fn name_record_from_bytes() {
        let rec = NameRecord::new(563_720, b"Jonathan_1", TxId([7; 32]));
        assert_eq!(rec.name, "Jonathan_1");
        assert_eq!(rec.block_height, 563_720);
    }

    #[test]
    fn block_event_height() {
        assert_eq!(BlockEvent::Connected(5).height(), 5);
        assert_eq!(BlockEvent::Disconnected(9).to_string(), "disconnected(9)");
    }
}
