use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wire::messages::{
    self, BLOCK_BODIES_MSG, BLOCK_HEADERS_MSG, GET_BLOCK_BODIES_MSG, GET_BLOCK_HEADERS_MSG,
};
use wire::{GetBlockHeadersData, P2pMessage};

use crate::engine::SyncEvent;
use crate::error::short_id;
use crate::server::Server;
use crate::{BlockStore, Transport};

/// Routes the four block-sync message kinds.
///
/// Queries are answered on short-lived tasks, bounded by a semaphore.
/// Responses are decoded here and forwarded to the engine as [`SyncEvent`]s.
pub struct Dispatcher<T, S> {
    server: Server<T, S>,
    events: mpsc::Sender<SyncEvent>,
    serve_semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    get_headers: broadcast::Receiver<P2pMessage>,
    get_bodies: broadcast::Receiver<P2pMessage>,
    headers: broadcast::Receiver<P2pMessage>,
    bodies: broadcast::Receiver<P2pMessage>,
}

impl<T: Transport, S: BlockStore> Dispatcher<T, S> {
    /// Subscribes right away so nothing sent after this call is missed.
    pub fn new(
        transport: Arc<T>,
        store: Arc<S>,
        events: mpsc::Sender<SyncEvent>,
        serve_concurrency: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let get_headers = transport.subscribe_msg(GET_BLOCK_HEADERS_MSG);
        let get_bodies = transport.subscribe_msg(GET_BLOCK_BODIES_MSG);
        let headers = transport.subscribe_msg(BLOCK_HEADERS_MSG);
        let bodies = transport.subscribe_msg(BLOCK_BODIES_MSG);
        Self {
            server: Server::new(transport, store),
            events,
            serve_semaphore: Arc::new(Semaphore::new(serve_concurrency.max(1))),
            shutdown,
            get_headers,
            get_bodies,
            headers,
            bodies,
        }
    }

    pub async fn run(mut self) {
        let mut get_headers_open = true;
        let mut get_bodies_open = true;
        let mut headers_open = true;
        let mut bodies_open = true;

        info!("block sync dispatch started");
        loop {
            if !(get_headers_open || get_bodies_open || headers_open || bodies_open) {
                warn!("all message subscriptions closed");
                break;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                msg = self.get_headers.recv(), if get_headers_open => match msg {
                    Ok(msg) => self.on_get_block_headers(msg),
                    Err(e) => get_headers_open = subscription_alive("GetBlockHeaders", e),
                },
                msg = self.get_bodies.recv(), if get_bodies_open => match msg {
                    Ok(msg) => self.on_get_block_bodies(msg),
                    Err(e) => get_bodies_open = subscription_alive("GetBlockBodies", e),
                },
                msg = self.headers.recv(), if headers_open => match msg {
                    Ok(msg) => {
                        if !self.on_block_headers(msg).await {
                            break;
                        }
                    }
                    Err(e) => headers_open = subscription_alive("BlockHeaders", e),
                },
                msg = self.bodies.recv(), if bodies_open => match msg {
                    Ok(msg) => {
                        if !self.on_block_bodies(msg).await {
                            break;
                        }
                    }
                    Err(e) => bodies_open = subscription_alive("BlockBodies", e),
                },
            }
        }
        info!("block sync dispatch stopped");
    }

    fn on_get_block_headers(&self, msg: P2pMessage) {
        let query = match GetBlockHeadersData::decode(&msg.data) {
            Ok(query) => query,
            Err(e) => {
                error!(peer = %short_id(&msg.peer), err = %e, "GetBlockHeaders decode failed");
                return;
            }
        };
        let server = self.server.clone();
        let sem = Arc::clone(&self.serve_semaphore);
        tokio::spawn(async move {
            let _permit = match sem.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if let Err(e) = server.send_block_headers(&msg.peer, &query).await {
                debug!(peer = %short_id(&msg.peer), err = %e, "failed to serve headers");
            }
        });
    }

    fn on_get_block_bodies(&self, msg: P2pMessage) {
        let hashes = match messages::decode_hashes(&msg.data) {
            Ok(hashes) => hashes,
            Err(e) => {
                error!(peer = %short_id(&msg.peer), err = %e, "GetBlockBodies decode failed");
                return;
            }
        };
        let server = self.server.clone();
        let sem = Arc::clone(&self.serve_semaphore);
        tokio::spawn(async move {
            let _permit = match sem.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if let Err(e) = server.send_block_bodies(&msg.peer, &hashes).await {
                debug!(peer = %short_id(&msg.peer), err = %e, "failed to serve bodies");
            }
        });
    }

    /// Returns `false` once the engine is gone.
    async fn on_block_headers(&self, msg: P2pMessage) -> bool {
        let headers = match messages::decode_block_headers(&msg.data) {
            Ok(headers) => headers,
            Err(e) => {
                error!(peer = %short_id(&msg.peer), err = %e, "BlockHeaders decode failed");
                return true;
            }
        };
        debug!(peer = %short_id(&msg.peer), count = headers.len(), "received block headers");
        self.forward(SyncEvent::Headers {
            peer: msg.peer,
            headers,
        })
        .await
    }

    async fn on_block_bodies(&self, msg: P2pMessage) -> bool {
        let bodies = match messages::decode_block_bodies(&msg.data) {
            Ok(bodies) => bodies,
            Err(e) => {
                error!(peer = %short_id(&msg.peer), err = %e, "BlockBodies decode failed");
                return true;
            }
        };
        debug!(peer = %short_id(&msg.peer), count = bodies.len(), "received block bodies");
        self.forward(SyncEvent::Bodies {
            peer: msg.peer,
            bodies,
        })
        .await
    }

    async fn forward(&self, event: SyncEvent) -> bool {
        if self.events.send(event).await.is_err() {
            warn!("sync engine channel closed");
            return false;
        }
        true
    }
}

/// Log a subscription error and report whether the source is still usable.
fn subscription_alive(kind: &'static str, err: RecvError) -> bool {
    match err {
        RecvError::Lagged(skipped) => {
            error!(kind, skipped, "subscription lagged, messages dropped");
            true
        }
        RecvError::Closed => {
            warn!(kind, "subscription closed");
            false
        }
    }
}
