pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod peer;
pub mod peer_set;
pub mod queue;
pub mod server;
pub mod span;

use std::future::Future;
use std::time::Duration;

use alloy_primitives::B256;
use tokio::sync::broadcast;

use chain::{Block, BlockBody, BlockHeader, ChainError, MemoryChain};
use wire::{P2pMessage, PeerId};

pub use client::Requester;
pub use config::{Checkpoint, SyncConfig};
pub use dispatch::Dispatcher;
pub use engine::{ForkDetected, SyncEvent, SyncHandle, Syncer};
pub use error::{PeerSetError, QueueError, SyncError, TransportError};
pub use peer::Peer;
pub use peer_set::PeerSet;
pub use queue::{AssemblyQueue, HeaderSlot, PendingBlock};
pub use server::Server;
pub use span::{calculate_request_span, RequestSpan};

pub const MAX_HEADER_FETCH: u64 = 192;
pub const MAX_BODY_FETCH: usize = 128;
/// Target upper bound on the size of one served header batch.
pub const SOFT_RESPONSE_LIMIT: usize = 2 * 1024 * 1024;
/// Size assumed per header when accounting against [`SOFT_RESPONSE_LIMIT`].
pub const EST_HEADER_SIZE: usize = 500;
pub const FORCE_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const FORCE_HEADER_INTERVAL: Duration = Duration::from_secs(180);
/// Non-canonical parent steps one header query may spend on ancestor lookups.
pub const MAX_NON_CANONICAL: u64 = 100;

/// A peer's head as announced by the handshake protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMsg {
    pub peer: PeerId,
    pub head_hash: B256,
    pub head_height: u64,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Message transport between nodes.
pub trait Transport: Send + Sync + 'static {
    fn local_id(&self) -> PeerId;

    fn send(
        &self,
        peer: &PeerId,
        msg: P2pMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Inbound messages of one kind.
    fn subscribe_msg(&self, kind: u8) -> broadcast::Receiver<P2pMessage>;

    /// Ids of peers that disconnected.
    fn subscribe_drop_peer(&self) -> broadcast::Receiver<PeerId>;
}

/// Chain storage the syncer reads from and commits to.
pub trait BlockStore: Send + Sync + 'static {
    fn current_header(&self) -> BlockHeader;

    fn get_header(&self, hash: &B256, number: u64) -> Option<BlockHeader>;

    fn get_header_by_hash(&self, hash: &B256) -> Option<BlockHeader>;

    fn get_header_by_number(&self, number: u64) -> Option<BlockHeader>;

    /// Hash and number `ancestor` generations behind `(hash, number)`.
    /// Non-canonical steps are paid from `max_non_canonical`.
    fn get_ancestor(
        &self,
        hash: &B256,
        number: u64,
        ancestor: u64,
        max_non_canonical: &mut u64,
    ) -> Option<(B256, u64)>;

    fn get_body(&self, hash: &B256) -> Option<BlockBody>;

    fn process_block(&self, block: Block, validate: bool) -> Result<(), ChainError>;
}

/// Status exchange with peers.
pub trait Handshake: Send + Sync + 'static {
    fn subscribe_handshake(&self) -> broadcast::Receiver<HandshakeMsg>;

    fn request_handshake(
        &self,
        peer: &PeerId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl BlockStore for MemoryChain {
    fn current_header(&self) -> BlockHeader {
        self.head()
    }

    fn get_header(&self, hash: &B256, number: u64) -> Option<BlockHeader> {
        self.header(hash, number)
    }

    fn get_header_by_hash(&self, hash: &B256) -> Option<BlockHeader> {
        self.header_by_hash(hash)
    }

    fn get_header_by_number(&self, number: u64) -> Option<BlockHeader> {
        self.header_by_number(number)
    }

    fn get_ancestor(
        &self,
        hash: &B256,
        number: u64,
        ancestor: u64,
        max_non_canonical: &mut u64,
    ) -> Option<(B256, u64)> {
        self.ancestor(hash, number, ancestor, max_non_canonical)
    }

    fn get_body(&self, hash: &B256) -> Option<BlockBody> {
        self.body(hash)
    }

    fn process_block(&self, block: Block, validate: bool) -> Result<(), ChainError> {
        self.append(block, validate)
    }
}
