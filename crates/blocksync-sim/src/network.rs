use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use blocksync::{Handshake, HandshakeMsg, Transport, TransportError};
use chain::MemoryChain;
use wire::{P2pMessage, PeerId};

const CHANNEL_CAPACITY: usize = 1024;

/// One node's side of the hub: its chain and its inbound channels.
struct Endpoint {
    store: Arc<MemoryChain>,
    msgs: Mutex<HashMap<u8, broadcast::Sender<P2pMessage>>>,
    drops: broadcast::Sender<PeerId>,
    handshakes: broadcast::Sender<HandshakeMsg>,
}

impl Endpoint {
    fn channel(&self, kind: u8) -> broadcast::Sender<P2pMessage> {
        self.msgs
            .lock()
            .entry(kind)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn status(&self, id: PeerId) -> HandshakeMsg {
        let head = self.store.head();
        HandshakeMsg {
            peer: id,
            head_hash: head.hash(),
            head_height: head.number,
        }
    }
}

/// In-memory network. Every delivery is delayed by a random latency up to
/// `max_latency`, so messages between two nodes can overtake each other.
pub struct Hub {
    max_latency: Duration,
    endpoints: RwLock<HashMap<PeerId, Arc<Endpoint>>>,
    links: RwLock<HashSet<(PeerId, PeerId)>>,
}

impl Hub {
    pub fn new(max_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            max_latency,
            endpoints: RwLock::new(HashMap::new()),
            links: RwLock::new(HashSet::new()),
        })
    }

    /// Attach a node and hand back its transport.
    pub fn join(self: &Arc<Self>, id: PeerId, store: Arc<MemoryChain>) -> Arc<HubTransport> {
        let endpoint = Arc::new(Endpoint {
            store,
            msgs: Mutex::new(HashMap::new()),
            drops: broadcast::channel(CHANNEL_CAPACITY).0,
            handshakes: broadcast::channel(CHANNEL_CAPACITY).0,
        });
        self.endpoints.write().insert(id, Arc::clone(&endpoint));
        Arc::new(HubTransport {
            id,
            hub: Arc::clone(self),
            endpoint,
        })
    }

    pub fn is_connected(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.read().contains(&link(a, b))
    }

    /// Link two nodes. Each side then receives the other's status.
    pub fn connect(&self, a: PeerId, b: PeerId) {
        if !self.links.write().insert(link(&a, &b)) {
            return;
        }
        debug!(a = %short(&a), b = %short(&b), "link up");
        self.send_status(&a, &b);
        self.send_status(&b, &a);
    }

    /// Unlink two nodes. Both sides are told the other dropped.
    pub fn disconnect(&self, a: PeerId, b: PeerId) {
        if !self.links.write().remove(&link(&a, &b)) {
            return;
        }
        debug!(a = %short(&a), b = %short(&b), "link down");
        let endpoints = self.endpoints.read();
        if let Some(ep) = endpoints.get(&a) {
            let _ = ep.drops.send(b);
        }
        if let Some(ep) = endpoints.get(&b) {
            let _ = ep.drops.send(a);
        }
    }

    /// Deliver `from`'s current status to `to` after a latency.
    fn send_status(&self, from: &PeerId, to: &PeerId) {
        let endpoints = self.endpoints.read();
        let (Some(src), Some(dst)) = (endpoints.get(from), endpoints.get(to)) else {
            return;
        };
        let status = src.status(*from);
        let handshakes = dst.handshakes.clone();
        let delay = self.latency();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handshakes.send(status);
        });
    }

    fn latency(&self) -> Duration {
        let max = self.max_latency.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// A node's handle on the hub. Serves as both transport and handshake
/// protocol for the syncer.
pub struct HubTransport {
    id: PeerId,
    hub: Arc<Hub>,
    endpoint: Arc<Endpoint>,
}

impl HubTransport {
    pub fn id(&self) -> PeerId {
        self.id
    }
}

impl Transport for HubTransport {
    fn local_id(&self) -> PeerId {
        self.id
    }

    async fn send(&self, peer: &PeerId, msg: P2pMessage) -> Result<(), TransportError> {
        if !self.hub.is_connected(&self.id, peer) {
            return Err(TransportError::NotConnected(*peer));
        }
        let target = self
            .hub
            .endpoints
            .read()
            .get(peer)
            .map(|ep| ep.channel(msg.kind))
            .ok_or(TransportError::NotConnected(*peer))?;
        let delay = self.hub.latency();
        trace!(to = %short(peer), kind = msg.kind, bytes = msg.data.len(), "queued message");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = target.send(msg);
        });
        Ok(())
    }

    fn subscribe_msg(&self, kind: u8) -> broadcast::Receiver<P2pMessage> {
        self.endpoint.channel(kind).subscribe()
    }

    fn subscribe_drop_peer(&self) -> broadcast::Receiver<PeerId> {
        self.endpoint.drops.subscribe()
    }
}

impl Handshake for HubTransport {
    fn subscribe_handshake(&self) -> broadcast::Receiver<HandshakeMsg> {
        self.endpoint.handshakes.subscribe()
    }

    /// Ask `peer` for its status; the answer arrives on our handshake channel.
    async fn request_handshake(&self, peer: &PeerId) -> Result<(), TransportError> {
        if !self.hub.is_connected(&self.id, peer) {
            return Err(TransportError::NotConnected(*peer));
        }
        self.hub.send_status(peer, &self.id);
        Ok(())
    }
}

fn link(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (*a, *b)
    } else {
        (*b, *a)
    }
}

pub(crate) fn short(id: &PeerId) -> String {
    hex::encode(&id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::BlockHeader;

    fn id(n: u8) -> PeerId {
        [n; 64]
    }

    fn store() -> Arc<MemoryChain> {
        Arc::new(MemoryChain::new(BlockHeader::genesis(0)))
    }

    #[tokio::test]
    async fn connect_exchanges_status_and_delivers() {
        let hub = Hub::new(Duration::from_millis(5));
        let a = hub.join(id(1), store());
        let b = hub.join(id(2), store());
        let mut a_hs = a.subscribe_handshake();
        let mut b_msgs = b.subscribe_msg(0x03);

        hub.connect(id(1), id(2));
        let status = a_hs.recv().await.unwrap();
        assert_eq!(status.peer, id(2));
        assert_eq!(status.head_height, 0);

        a.send(
            &id(2),
            P2pMessage {
                kind: 0x03,
                peer: id(1),
                data: vec![1, 2, 3],
            },
        )
        .await
        .unwrap();
        let msg = b_msgs.recv().await.unwrap();
        assert_eq!(msg.peer, id(1));
        assert_eq!(msg.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn disconnect_notifies_and_blocks_sends() {
        let hub = Hub::new(Duration::ZERO);
        let a = hub.join(id(1), store());
        let _b = hub.join(id(2), store());
        let mut drops = a.subscribe_drop_peer();

        hub.connect(id(1), id(2));
        hub.disconnect(id(2), id(1));
        assert_eq!(drops.recv().await.unwrap(), id(2));

        let msg = P2pMessage {
            kind: 0x05,
            peer: id(1),
            data: vec![],
        };
        assert!(matches!(
            a.send(&id(2), msg).await,
            Err(TransportError::NotConnected(_))
        ));
        assert!(a.request_handshake(&id(2)).await.is_err());
    }
}
