use alloy_primitives::B256;
use sha3::{Digest, Keccak256};

/// Raw encoded transaction. The sync layer never looks inside.
pub type Transaction = Vec<u8>;

/// Block header. The hash is keccak256 of the RLP encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub state_root: B256,
    pub transactions_root: B256,
    pub extra_data: Vec<u8>,
}

/// Transaction payload of a block, tagged with the height it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBody {
    pub number: u64,
    pub transactions: Vec<Transaction>,
}

/// Header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl BlockHeader {
    /// Genesis header with the given timestamp and an empty transaction list.
    pub fn genesis(timestamp: u64) -> Self {
        Self {
            parent_hash: B256::ZERO,
            number: 0,
            timestamp,
            state_root: B256::ZERO,
            transactions_root: transactions_root(&[]),
            extra_data: Vec::new(),
        }
    }

    pub fn hash(&self) -> B256 {
        B256::from_slice(&Keccak256::digest(self.rlp_encode()))
    }

    /// RLP-encode the header. Field order is part of the wire format.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let fields = vec![
            rlp_encode_bytes(self.parent_hash.as_slice()),
            rlp_encode_u64(self.number),
            rlp_encode_u64(self.timestamp),
            rlp_encode_bytes(self.state_root.as_slice()),
            rlp_encode_bytes(self.transactions_root.as_slice()),
            rlp_encode_bytes(&self.extra_data),
        ];
        rlp_encode_list_from_encoded(&fields)
    }
}

impl BlockBody {
    pub fn new(number: u64, transactions: Vec<Transaction>) -> Self {
        Self {
            number,
            transactions,
        }
    }

    pub fn transactions_root(&self) -> B256 {
        transactions_root(&self.transactions)
    }
}

impl Block {
    /// A block with no transactions attached yet.
    pub fn from_header(header: BlockHeader) -> Self {
        Self {
            header,
            transactions: Vec::new(),
        }
    }

    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn set_transactions(&mut self, transactions: Vec<Transaction>) {
        self.transactions = transactions;
    }

    pub fn body(&self) -> BlockBody {
        BlockBody::new(self.header.number, self.transactions.clone())
    }
}

/// keccak256 over the RLP list of raw transactions.
pub fn transactions_root(transactions: &[Transaction]) -> B256 {
    let encoded: Vec<Vec<u8>> = transactions.iter().map(|tx| rlp_encode_bytes(tx)).collect();
    B256::from_slice(&Keccak256::digest(rlp_encode_list_from_encoded(&encoded)))
}

// ============================================================================
// RLP encoding helpers
// ============================================================================

/// RLP-encode a single byte string.
pub fn rlp_encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return data.to_vec();
    }
    let mut out = rlp_length_prefix(data.len(), 0x80);
    out.extend_from_slice(data);
    out
}

/// RLP-encode a u64 as big-endian bytes with no leading zeros.
pub fn rlp_encode_u64(v: u64) -> Vec<u8> {
    if v == 0 {
        return rlp_encode_bytes(&[]);
    }
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    rlp_encode_bytes(&bytes[start..])
}

/// Build an RLP list from already-encoded items.
pub fn rlp_encode_list_from_encoded(items: &[Vec<u8>]) -> Vec<u8> {
    let total_len: usize = items.iter().map(|i| i.len()).sum();
    let mut out = rlp_length_prefix(total_len, 0xc0);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn rlp_length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let bytes = (len as u64).to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
        let mut out = vec![offset + 55 + (8 - start) as u8];
        out.extend_from_slice(&bytes[start..]);
        out
    }
}
