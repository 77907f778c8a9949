use std::sync::Arc;

use alloy_primitives::B256;
use tracing::{debug, warn};

use chain::{BlockBody, BlockHeader};
use wire::messages::{self, BLOCK_BODIES_MSG, BLOCK_HEADERS_MSG};
use wire::{GetBlockHeadersData, HashOrNumber, P2pMessage, PeerId};

use crate::error::{short_id, SyncError};
use crate::{
    BlockStore, Transport, EST_HEADER_SIZE, MAX_BODY_FETCH, MAX_HEADER_FETCH, MAX_NON_CANONICAL,
    SOFT_RESPONSE_LIMIT,
};

/// Answers header and body queries from local storage.
pub struct Server<T, S> {
    transport: Arc<T>,
    store: Arc<S>,
}

impl<T, S> Clone for Server<T, S> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: Transport, S: BlockStore> Server<T, S> {
    pub fn new(transport: Arc<T>, store: Arc<S>) -> Self {
        Self { transport, store }
    }

    /// Serve a GetBlockHeaders query from `peer`.
    pub async fn send_block_headers(
        &self,
        peer: &PeerId,
        query: &GetBlockHeadersData,
    ) -> Result<(), SyncError> {
        let headers = collect_block_headers(self.store.as_ref(), peer, query);
        debug!(peer = %short_id(peer), count = headers.len(), "serving headers");
        let data = messages::encode_block_headers(&headers)?;
        self.send(peer, BLOCK_HEADERS_MSG, data).await
    }

    /// Serve a GetBlockBodies query from `peer`. An empty query gets no reply.
    pub async fn send_block_bodies(&self, peer: &PeerId, hashes: &[B256]) -> Result<(), SyncError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let bodies = collect_block_bodies(self.store.as_ref(), hashes);
        debug!(peer = %short_id(peer), count = bodies.len(), "serving bodies");
        let data = messages::encode_block_bodies(&bodies)?;
        self.send(peer, BLOCK_BODIES_MSG, data).await
    }

    async fn send(&self, peer: &PeerId, kind: u8, data: Vec<u8>) -> Result<(), SyncError> {
        let msg = P2pMessage {
            kind,
            peer: self.transport.local_id(),
            data,
        };
        self.transport.send(peer, msg).await?;
        Ok(())
    }
}

/// Walk storage from the query origin, one height per step.
///
/// The walk ends when the next origin cannot be resolved, when the requested
/// amount or [`MAX_HEADER_FETCH`] headers are collected, or when the batch
/// estimate reaches [`SOFT_RESPONSE_LIMIT`].
pub fn collect_block_headers<S: BlockStore + ?Sized>(
    store: &S,
    requester: &PeerId,
    query: &GetBlockHeadersData,
) -> Vec<BlockHeader> {
    let mut max_non_canonical = MAX_NON_CANONICAL;
    let limit = query.amount.min(MAX_HEADER_FETCH) as usize;
    let mut headers: Vec<BlockHeader> = Vec::new();
    let mut bytes = 0usize;

    // In hash mode the number is learnt from the first lookup.
    let (hash_mode, mut hash, mut number) = match query.origin {
        HashOrNumber::Hash(hash) => (true, hash, 0u64),
        HashOrNumber::Number(number) => (false, B256::ZERO, number),
    };
    let mut first = true;

    while headers.len() < limit && bytes < SOFT_RESPONSE_LIMIT {
        let origin = if hash_mode {
            if first {
                first = false;
                store.get_header_by_hash(&hash)
            } else {
                store.get_header(&hash, number)
            }
        } else {
            store.get_header_by_number(number)
        };
        let Some(origin) = origin else {
            break;
        };
        number = origin.number;
        headers.push(origin);
        bytes += EST_HEADER_SIZE;

        match (hash_mode, query.reverse) {
            (true, true) => {
                match store.get_ancestor(&hash, number, 1, &mut max_non_canonical) {
                    Some((ancestor_hash, ancestor_number)) => {
                        hash = ancestor_hash;
                        number = ancestor_number;
                    }
                    None => break,
                }
            }
            (true, false) => {
                let current = number;
                let Some(next) = current.checked_add(1) else {
                    warn!(
                        current,
                        attacker = %short_id(requester),
                        "header query overflows the chain"
                    );
                    break;
                };
                let Some(header) = store.get_header_by_number(next) else {
                    break;
                };
                let next_hash = header.hash();
                let parent = store
                    .get_ancestor(&next_hash, next, 1, &mut max_non_canonical)
                    .map(|(h, _)| h);
                if parent != Some(hash) {
                    warn!(
                        current,
                        next,
                        attacker = %short_id(requester),
                        "header query ancestry mismatch"
                    );
                    break;
                }
                hash = next_hash;
                number = next;
            }
            (false, true) => {
                if number == 0 {
                    break;
                }
                number -= 1;
            }
            (false, false) => {
                number += 1;
            }
        }
    }

    headers
}

/// Look up bodies by hash. Missing bodies stay as `None` at their position.
pub fn collect_block_bodies<S: BlockStore + ?Sized>(
    store: &S,
    hashes: &[B256],
) -> Vec<Option<BlockBody>> {
    hashes
        .iter()
        .take(MAX_BODY_FETCH)
        .map(|hash| store.get_body(hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::types::transactions_root;
    use chain::{Block, ChainError, MemoryChain};

    const REQUESTER: PeerId = [0xAB; 64];

    fn chain_of(len: u64) -> MemoryChain {
        let chain = MemoryChain::new(BlockHeader::genesis(1_000));
        for i in 0..len {
            let parent = chain.head();
            let txs = vec![vec![i as u8]];
            let header = BlockHeader {
                parent_hash: parent.hash(),
                number: parent.number + 1,
                timestamp: parent.timestamp + 12,
                state_root: B256::ZERO,
                transactions_root: transactions_root(&txs),
                extra_data: vec![],
            };
            chain.append(Block::new(header, txs), true).unwrap();
        }
        chain
    }

    fn numbers(headers: &[BlockHeader]) -> Vec<u64> {
        headers.iter().map(|h| h.number).collect()
    }

    fn query(origin: HashOrNumber, amount: u64, reverse: bool) -> GetBlockHeadersData {
        GetBlockHeadersData {
            origin,
            amount,
            skip: 0,
            reverse,
        }
    }

    #[test]
    fn number_forward() {
        let chain = chain_of(150);
        let headers = collect_block_headers(
            &chain,
            &REQUESTER,
            &query(HashOrNumber::Number(100), 3, false),
        );
        assert_eq!(numbers(&headers), vec![100, 101, 102]);
    }

    #[test]
    fn number_forward_stops_at_head() {
        let chain = chain_of(10);
        let headers = collect_block_headers(
            &chain,
            &REQUESTER,
            &query(HashOrNumber::Number(8), 10, false),
        );
        assert_eq!(numbers(&headers), vec![8, 9, 10]);
    }

    #[test]
    fn number_reverse_stops_at_genesis() {
        let chain = chain_of(10);
        let headers = collect_block_headers(
            &chain,
            &REQUESTER,
            &query(HashOrNumber::Number(2), 10, true),
        );
        assert_eq!(numbers(&headers), vec![2, 1, 0]);
    }

    #[test]
    fn hash_forward_and_reverse() {
        let chain = chain_of(20);
        let h5 = chain.header_by_number(5).unwrap().hash();

        let forward =
            collect_block_headers(&chain, &REQUESTER, &query(HashOrNumber::Hash(h5), 4, false));
        assert_eq!(numbers(&forward), vec![5, 6, 7, 8]);

        let reverse =
            collect_block_headers(&chain, &REQUESTER, &query(HashOrNumber::Hash(h5), 4, true));
        assert_eq!(numbers(&reverse), vec![5, 4, 3, 2]);
    }

    #[test]
    fn unknown_origin_is_empty() {
        let chain = chain_of(3);
        let headers = collect_block_headers(
            &chain,
            &REQUESTER,
            &query(HashOrNumber::Hash(B256::repeat_byte(9)), 5, false),
        );
        assert!(headers.is_empty());
        let headers = collect_block_headers(
            &chain,
            &REQUESTER,
            &query(HashOrNumber::Number(4), 5, false),
        );
        assert!(headers.is_empty());
    }

    #[test]
    fn amount_is_capped() {
        let chain = chain_of(300);
        let headers = collect_block_headers(
            &chain,
            &REQUESTER,
            &query(HashOrNumber::Number(1), 1_000, false),
        );
        assert_eq!(headers.len(), MAX_HEADER_FETCH as usize);
    }

    /// Store that reports a forged header at one height.
    struct ForgedStore {
        inner: MemoryChain,
        forged: BlockHeader,
    }

    impl BlockStore for ForgedStore {
        fn current_header(&self) -> BlockHeader {
            self.inner.current_header()
        }
        fn get_header(&self, hash: &B256, number: u64) -> Option<BlockHeader> {
            self.inner.get_header(hash, number)
        }
        fn get_header_by_hash(&self, hash: &B256) -> Option<BlockHeader> {
            self.inner.get_header_by_hash(hash)
        }
        fn get_header_by_number(&self, number: u64) -> Option<BlockHeader> {
            if number == self.forged.number {
                return Some(self.forged.clone());
            }
            self.inner.get_header_by_number(number)
        }
        fn get_ancestor(
            &self,
            hash: &B256,
            number: u64,
            ancestor: u64,
            max_non_canonical: &mut u64,
        ) -> Option<(B256, u64)> {
            self.inner.get_ancestor(hash, number, ancestor, max_non_canonical)
        }
        fn get_body(&self, hash: &B256) -> Option<BlockBody> {
            self.inner.get_body(hash)
        }
        fn process_block(&self, block: Block, validate: bool) -> Result<(), ChainError> {
            self.inner.process_block(block, validate)
        }
    }

    #[test]
    fn hash_forward_stops_on_forged_ancestry() {
        let inner = chain_of(10);
        let forged = BlockHeader {
            parent_hash: B256::repeat_byte(0x66),
            number: 6,
            timestamp: 0,
            state_root: B256::ZERO,
            transactions_root: transactions_root(&[]),
            extra_data: b"forged".to_vec(),
        };
        inner.insert_side_header(forged.clone());
        let h5 = inner.header_by_number(5).unwrap().hash();
        let store = ForgedStore { inner, forged };

        let headers =
            collect_block_headers(&store, &REQUESTER, &query(HashOrNumber::Hash(h5), 5, false));
        assert_eq!(numbers(&headers), vec![5]);
    }

    #[test]
    fn bodies_keep_missing_positions() {
        let chain = chain_of(3);
        let h1 = chain.header_by_number(1).unwrap().hash();
        let h3 = chain.header_by_number(3).unwrap().hash();
        let bodies = collect_block_bodies(&chain, &[h1, B256::repeat_byte(7), h3]);
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0].as_ref().unwrap().number, 1);
        assert!(bodies[1].is_none());
        assert_eq!(bodies[2].as_ref().unwrap().transactions, vec![vec![2u8]]);
    }

    #[test]
    fn bodies_are_capped() {
        let chain = chain_of(1);
        let hashes = vec![B256::ZERO; MAX_BODY_FETCH + 10];
        assert_eq!(collect_block_bodies(&chain, &hashes).len(), MAX_BODY_FETCH);
    }
}
