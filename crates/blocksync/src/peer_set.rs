use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use wire::PeerId;

use crate::error::{short_id, PeerSetError};
use crate::peer::Peer;

/// Registry of the peers currently taking part in sync.
#[derive(Default)]
pub struct PeerSet {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<PeerId, Arc<Peer>>,
    closed: bool,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Arc<Peer>) -> Result<(), PeerSetError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(PeerSetError::Closed);
        }
        let id = *peer.id();
        if inner.peers.contains_key(&id) {
            return Err(PeerSetError::AlreadyRegistered(id));
        }
        inner.peers.insert(id, peer);
        debug!(peer = %short_id(&id), total = inner.peers.len(), "peer registered");
        Ok(())
    }

    /// Register `peer` and start `task` for it. The task is stopped when the
    /// peer is deregistered or the set is closed.
    pub fn register_with_task<F>(&self, peer: Arc<Peer>, task: F) -> Result<(), PeerSetError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.register(peer.clone())?;
        peer.spawn_task(task);
        Ok(())
    }

    pub fn deregister(&self, id: &PeerId) -> Result<(), PeerSetError> {
        let peer = self
            .inner
            .write()
            .peers
            .remove(id)
            .ok_or(PeerSetError::NotRegistered(*id))?;
        peer.release();
        debug!(peer = %short_id(id), "peer deregistered");
        Ok(())
    }

    pub fn peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.inner.read().peers.get(id).cloned()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.read().peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.read().peers.values().cloned().collect()
    }

    /// The peer with the greatest advertised height. Equal heights resolve to
    /// the lowest peer id so the choice does not depend on map order.
    pub fn best_peer(&self) -> Option<Arc<Peer>> {
        let inner = self.inner.read();
        let mut best: Option<(&Arc<Peer>, u64)> = None;
        for peer in inner.peers.values() {
            let height = peer.height();
            best = match best {
                Some((current, best_height))
                    if height < best_height
                        || (height == best_height && current.id() < peer.id()) =>
                {
                    Some((current, best_height))
                }
                _ => Some((peer, height)),
            };
        }
        best.map(|(peer, _)| peer.clone())
    }

    /// Release every peer and refuse further registrations.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        for peer in inner.peers.values() {
            peer.release();
        }
        inner.peers.clear();
        inner.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}
