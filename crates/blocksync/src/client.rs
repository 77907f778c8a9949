use std::sync::Arc;

use alloy_primitives::B256;
use tracing::debug;

use wire::messages::{self, GET_BLOCK_BODIES_MSG, GET_BLOCK_HEADERS_MSG};
use wire::{GetBlockHeadersData, HashOrNumber, P2pMessage, PeerId};

use crate::error::{short_id, SyncError};
use crate::Transport;

/// Outbound header and body requests. Sends are fire-and-forget: the
/// response arrives later through the dispatch loop.
pub struct Requester<T> {
    transport: Arc<T>,
}

impl<T> Clone for Requester<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> Requester<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub async fn request_one_header(&self, peer: &PeerId, hash: B256) -> Result<(), SyncError> {
        self.request_headers_by_hash(peer, hash, 1, 0, false).await
    }

    pub async fn request_headers_by_hash(
        &self,
        peer: &PeerId,
        origin: B256,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> Result<(), SyncError> {
        self.request_headers(peer, HashOrNumber::Hash(origin), amount, skip, reverse)
            .await
    }

    pub async fn request_headers_by_number(
        &self,
        peer: &PeerId,
        origin: u64,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> Result<(), SyncError> {
        self.request_headers(peer, HashOrNumber::Number(origin), amount, skip, reverse)
            .await
    }

    async fn request_headers(
        &self,
        peer: &PeerId,
        origin: HashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> Result<(), SyncError> {
        debug!(
            peer = %short_id(peer),
            ?origin,
            amount,
            skip,
            reverse,
            "requesting headers"
        );
        // Servers walk with a stride of one; the skip hint is not sent.
        let query = GetBlockHeadersData {
            origin,
            amount,
            skip: 0,
            reverse,
        };
        self.send(peer, GET_BLOCK_HEADERS_MSG, query.encode()?).await
    }

    pub async fn request_block_bodies(
        &self,
        peer: &PeerId,
        hashes: &[B256],
    ) -> Result<(), SyncError> {
        debug!(peer = %short_id(peer), count = hashes.len(), "requesting bodies");
        let data = messages::encode_hashes(hashes)?;
        self.send(peer, GET_BLOCK_BODIES_MSG, data).await
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
