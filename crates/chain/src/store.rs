use std::collections::HashMap;

use alloy_primitives::B256;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::ChainError;
use crate::types::{Block, BlockBody, BlockHeader, Transaction};

/// In-memory chain store.
///
/// Keeps every header and body it has seen keyed by hash, plus the canonical
/// hash per height (index = block number). Side-chain headers can be added
/// with [`MemoryChain::insert_side_header`] so ancestor lookups have something
/// non-canonical to walk through.
pub struct MemoryChain {
    inner: RwLock<Inner>,
}

struct Inner {
    headers: HashMap<B256, BlockHeader>,
    bodies: HashMap<B256, Vec<Transaction>>,
    canonical: Vec<B256>,
}

impl MemoryChain {
    /// Create a store whose canonical chain is just `genesis`.
    pub fn new(genesis: BlockHeader) -> Self {
        let hash = genesis.hash();
        let mut headers = HashMap::new();
        let mut bodies = HashMap::new();
        headers.insert(hash, genesis);
        bodies.insert(hash, Vec::new());
        info!(hash = %hash, "memory chain initialized");
        Self {
            inner: RwLock::new(Inner {
                headers,
                bodies,
                canonical: vec![hash],
            }),
        }
    }

    /// Current canonical head header.
    pub fn head(&self) -> BlockHeader {
        let inner = self.inner.read();
        let hash = inner.canonical[inner.canonical.len() - 1];
        inner.headers[&hash].clone()
    }

    pub fn head_number(&self) -> u64 {
        (self.inner.read().canonical.len() - 1) as u64
    }

    pub fn header_by_hash(&self, hash: &B256) -> Option<BlockHeader> {
        self.inner.read().headers.get(hash).cloned()
    }

    pub fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
        let inner = self.inner.read();
        let hash = inner.canonical.get(number as usize)?;
        inner.headers.get(hash).cloned()
    }

    /// Header lookup that requires hash and number to agree.
    pub fn header(&self, hash: &B256, number: u64) -> Option<BlockHeader> {
        self.header_by_hash(hash).filter(|h| h.number == number)
    }

    pub fn body(&self, hash: &B256) -> Option<BlockBody> {
        let inner = self.inner.read();
        let header = inner.headers.get(hash)?;
        let transactions = inner.bodies.get(hash)?;
        Some(BlockBody::new(header.number, transactions.clone()))
    }

    /// Hash and number of the header `ancestor` generations behind `(hash, number)`.
    ///
    /// Canonical starting points resolve directly. Otherwise the walk follows
    /// parent hashes and spends one unit of `max_non_canonical` per step,
    /// giving up when the budget runs out.
    pub fn ancestor(
        &self,
        hash: &B256,
        number: u64,
        ancestor: u64,
        max_non_canonical: &mut u64,
    ) -> Option<(B256, u64)> {
        if ancestor > number {
            return None;
        }
        let inner = self.inner.read();
        if inner.canonical.get(number as usize) == Some(hash) {
            let target = number - ancestor;
            return inner
                .canonical
                .get(target as usize)
                .map(|h| (*h, target));
        }

        let mut hash = *hash;
        let mut number = number;
        let mut remaining = ancestor;
        while remaining > 0 {
            if inner.canonical.get(number as usize) == Some(&hash) {
                let target = number - remaining;
                return inner
                    .canonical
                    .get(target as usize)
                    .map(|h| (*h, target));
            }
            if *max_non_canonical == 0 {
                return None;
            }
            *max_non_canonical -= 1;
            let header = inner.headers.get(&hash)?;
            if header.number != number || number == 0 {
                return None;
            }
            hash = header.parent_hash;
            number -= 1;
            remaining -= 1;
        }
        Some((hash, number))
    }

    /// Append a block to the canonical chain.
    ///
    /// The block must extend the current head by exactly one height. With
    /// `validate` set, the parent hash and transactions root are checked too.
    pub fn append(&self, block: Block, validate: bool) -> Result<(), ChainError> {
        let mut inner = self.inner.write();
        let head_number = (inner.canonical.len() - 1) as u64;
        let number = block.header.number;
        if number != head_number + 1 {
            return Err(ChainError::NotContiguous {
                head: head_number,
                number,
            });
        }
        if validate {
            let head_hash = inner.canonical[inner.canonical.len() - 1];
            if block.header.parent_hash != head_hash {
                return Err(ChainError::UnknownParent {
                    number,
                    parent: block.header.parent_hash,
                });
            }
            let root = crate::types::transactions_root(&block.transactions);
            if root != block.header.transactions_root {
                return Err(ChainError::TransactionsRoot {
                    number,
                    expected: block.header.transactions_root,
                    got: root,
                });
            }
        }
        let hash = block.header.hash();
        inner.canonical.push(hash);
        inner.bodies.insert(hash, block.transactions);
        inner.headers.insert(hash, block.header);
        debug!(number, hash = %hash, "block appended");
        Ok(())
    }

    /// Record a header that is not part of the canonical chain.
    pub fn insert_side_header(&self, header: BlockHeader) {
        let hash = header.hash();
        self.inner.write().headers.insert(hash, header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::transactions_root;

    fn child(parent: &BlockHeader, txs: &[Transaction]) -> Block {
        let header = BlockHeader {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp + 12,
            state_root: B256::ZERO,
            transactions_root: transactions_root(txs),
            extra_data: vec![],
        };
        Block::new(header, txs.to_vec())
    }

    fn chain_of(len: u64) -> MemoryChain {
        let chain = MemoryChain::new(BlockHeader::genesis(1_000));
        for i in 0..len {
            let block = child(&chain.head(), &[vec![i as u8]]);
            chain.append(block, true).unwrap();
        }
        chain
    }

    #[test]
    fn append_advances_head() {
        let chain = chain_of(5);
        assert_eq!(chain.head_number(), 5);
        let h3 = chain.header_by_number(3).unwrap();
        assert_eq!(chain.header_by_hash(&h3.hash()), Some(h3.clone()));
        assert_eq!(chain.header(&h3.hash(), 3), Some(h3.clone()));
        assert_eq!(chain.header(&h3.hash(), 4), None);
        assert_eq!(chain.body(&h3.hash()).unwrap().transactions, vec![vec![2u8]]);
    }

    #[test]
    fn append_rejects_gap() {
        let chain = chain_of(2);
        let b3 = child(&chain.head(), &[]);
        let b4 = child(&b3.header, &[]);
        let err = chain.append(b4, false).unwrap_err();
        assert!(matches!(err, ChainError::NotContiguous { head: 2, number: 4 }));
    }

    #[test]
    fn validating_append_checks_transactions_root() {
        let chain = chain_of(1);
        let mut block = child(&chain.head(), &[vec![1]]);
        block.transactions = vec![vec![2]];
        assert!(matches!(
            chain.append(block.clone(), true),
            Err(ChainError::TransactionsRoot { number: 2, .. })
        ));
        chain.append(block, false).unwrap();
        assert_eq!(chain.head_number(), 2);
    }

    #[test]
    fn canonical_ancestor() {
        let chain = chain_of(10);
        let h8 = chain.header_by_number(8).unwrap();
        let mut budget = 100;
        let (hash, number) = chain.ancestor(&h8.hash(), 8, 3, &mut budget).unwrap();
        assert_eq!(number, 5);
        assert_eq!(hash, chain.header_by_number(5).unwrap().hash());
        assert_eq!(budget, 100);
        assert!(chain.ancestor(&h8.hash(), 8, 9, &mut budget).is_none());
    }

    #[test]
    fn side_chain_ancestor_spends_budget() {
        let chain = chain_of(6);
        let h4 = chain.header_by_number(4).unwrap();
        let side5 = BlockHeader {
            extra_data: b"side".to_vec(),
            ..child(&h4, &[]).header
        };
        let side6 = child(&side5, &[]).header;
        chain.insert_side_header(side5.clone());
        chain.insert_side_header(side6.clone());

        let mut budget = 100;
        let (hash, number) = chain.ancestor(&side6.hash(), 6, 1, &mut budget).unwrap();
        assert_eq!((hash, number), (side5.hash(), 5));
        assert_eq!(budget, 99);

        let (hash, number) = chain.ancestor(&side6.hash(), 6, 3, &mut budget).unwrap();
        assert_eq!(number, 3);
        assert_eq!(hash, chain.header_by_number(3).unwrap().hash());

        let mut empty = 0;
        assert!(chain.ancestor(&side6.hash(), 6, 1, &mut empty).is_none());
    }
}
