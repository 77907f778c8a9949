use std::fmt;
use std::future::Future;

use alloy_primitives::B256;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wire::PeerId;

/// A connected remote node and the chain head it last advertised.
pub struct Peer {
    id: PeerId,
    head: RwLock<(B256, u64)>,
    done: CancellationToken,
}

impl Peer {
    pub fn new(id: PeerId, head_hash: B256, head_height: u64) -> Self {
        Self {
            id,
            head: RwLock::new((head_hash, head_height)),
            done: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Consistent snapshot of the advertised head.
    pub fn head(&self) -> (B256, u64) {
        *self.head.read()
    }

    pub fn height(&self) -> u64 {
        self.head.read().1
    }

    /// Record a newly advertised head. Heights never go backwards: an update
    /// below the current height is ignored and `false` is returned.
    pub fn set_head(&self, hash: B256, height: u64) -> bool {
        let mut head = self.head.write();
        if height < head.1 {
            return false;
        }
        *head = (hash, height);
        true
    }

    /// Fire the done-signal. Tasks started with [`Peer::spawn_task`] stop.
    pub(crate) fn release(&self) {
        self.done.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Run `task` in the background until it finishes or the peer is released.
    pub fn spawn_task<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let done = self.done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = done.cancelled() => {}
                _ = task => {}
            }
        })
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hash, height) = self.head();
        f.debug_struct("Peer")
            .field("id", &hex::encode(&self.id[..8]))
            .field("head_hash", &hash)
            .field("head_height", &height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn head_never_regresses() {
        let peer = Peer::new([1u8; 64], B256::repeat_byte(1), 100);
        assert!(!peer.set_head(B256::repeat_byte(2), 90));
        assert_eq!(peer.head(), (B256::repeat_byte(1), 100));

        assert!(peer.set_head(B256::repeat_byte(3), 100));
        assert_eq!(peer.head(), (B256::repeat_byte(3), 100));

        assert!(peer.set_head(B256::repeat_byte(4), 150));
        assert_eq!(peer.height(), 150);
    }

    #[tokio::test]
    async fn release_stops_spawned_task() {
        let peer = Peer::new([2u8; 64], B256::ZERO, 0);
        let handle = peer.spawn_task(std::future::pending());
        peer.release();
        assert!(peer.is_released());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop on release")
            .unwrap();
    }
}
