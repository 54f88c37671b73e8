//! Raw block decoding.
//!
//! `getblock <hash> false` returns the consensus serialization as hex. Only
//! what the indexer needs is kept: the block hash, each transaction id and
//! every output's value and locking script.
//!
//! ```text
//! block  = header(80) varint(n_tx) tx*
//! tx     = version(4) varint(n_in) input* varint(n_out) output* locktime(4)
//! input  = prev_hash(32) prev_index(4) varint(len) script sequence(4)
//! output = value(8) varint(len) script
//! ```

use sha2::{Digest, Sha256};

use nameindex_core::error::IndexerError;
use nameindex_core::types::{NodeBlock, NodeTransaction, TxId, TxOutput};

const HEADER_LEN: usize = 80;

/// Double SHA-256 in internal byte order.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// Block hash in display (RPC) order.
pub fn block_hash(header: &[u8]) -> String {
    let mut hash = sha256d(header);
    hash.reverse();
    hex::encode(hash)
}

/// Decode a serialized block found at `height`.
pub fn decode_block(height: u64, raw: &[u8]) -> Result<NodeBlock, IndexerError> {
    let mut r = Reader::new(raw);
    let header = r.take(HEADER_LEN)?;
    let hash = block_hash(header);

    let n_tx = r.varint()?;
    let mut transactions = Vec::with_capacity(r.capped(n_tx));
    for _ in 0..n_tx {
        transactions.push(decode_tx(&mut r)?);
    }

    if r.remaining() != 0 {
        return Err(IndexerError::Decode(format!(
            "block {hash}: {} trailing bytes",
            r.remaining()
        )));
    }

    Ok(NodeBlock {
        height,
        hash,
        transactions,
    })
}

fn decode_tx(r: &mut Reader<'_>) -> Result<NodeTransaction, IndexerError> {
    let start = r.pos;
    r.take(4)?; // version

    let n_in = r.varint()?;
    for _ in 0..n_in {
        r.take(36)?; // outpoint
        let len = r.varint()?;
        r.take_var(len)?;
        r.take(4)?; // sequence
    }

    let n_out = r.varint()?;
    let mut outputs = Vec::with_capacity(r.capped(n_out));
    for _ in 0..n_out {
        let value = r.u64()?;
        let len = r.varint()?;
        outputs.push(TxOutput {
            value,
            script: r.take_var(len)?.to_vec(),
        });
    }

    r.take(4)?; // locktime

    Ok(NodeTransaction {
        txid: TxId::from_internal(sha256d(&r.buf[start..r.pos])),
        outputs,
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bound a declared element count by the bytes left, for preallocation.
    fn capped(&self, count: u64) -> usize {
        usize::try_from(count).unwrap_or(usize::MAX).min(self.remaining())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexerError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                IndexerError::Decode(format!(
                    "unexpected end of block at offset {} (wanted {n} bytes)",
                    self.pos
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_var(&mut self, len: u64) -> Result<&'a [u8], IndexerError> {
        let len = usize::try_from(len)
            .map_err(|_| IndexerError::Decode(format!("length {len} does not fit in memory")))?;
        self.take(len)
    }

    fn u64(&mut self) -> Result<u64, IndexerError> {
        let mut le = [0u8; 8];
        le.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(le))
    }

    fn varint(&mut self) -> Result<u64, IndexerError> {
        let first = self.take(1)?[0];
        let width = match first {
            0xfd => 2,
            0xfe => 4,
            0xff => 8,
            n => return Ok(u64::from(n)),
        };
        let mut le = [0u8; 8];
        le[..width].copy_from_slice(self.take(width)?);
        Ok(u64::from_le_bytes(le))
    }
}
