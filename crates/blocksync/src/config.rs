use std::time::Duration;

use alloy_primitives::B256;

use crate::{FORCE_HEADER_INTERVAL, FORCE_SYNC_INTERVAL};

/// A trusted `(number, hash)` pair every new peer is expected to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub number: u64,
    pub hash: B256,
}

/// Tunables of the sync engine and its dispatch loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often to retry syncing against the best peer.
    pub force_sync_interval: Duration,
    /// How often to refresh every peer's advertised head.
    pub force_header_interval: Duration,
    /// Upper bound on concurrently served header/body requests.
    pub serve_concurrency: usize,
    pub checkpoint: Option<Checkpoint>,
    /// Time a new peer gets to answer the checkpoint query before it is dropped.
    pub checkpoint_timeout: Duration,
    /// Capacity of the fork notice broadcast channel.
    pub fork_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            force_sync_interval: FORCE_SYNC_INTERVAL,
            force_header_interval: FORCE_HEADER_INTERVAL,
            serve_concurrency: 32,
            checkpoint: None,
            checkpoint_timeout: Duration::from_secs(10),
            fork_channel_capacity: 64,
        }
    }
}
