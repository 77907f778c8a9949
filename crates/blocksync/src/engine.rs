use std::collections::VecDeque;
use std::sync::Arc;

use alloy_primitives::B256;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chain::{BlockBody, BlockHeader};
use wire::PeerId;

use crate::client::Requester;
use crate::config::SyncConfig;
use crate::dispatch::Dispatcher;
use crate::error::{short_id, PeerSetError, QueueError};
use crate::peer::Peer;
use crate::peer_set::PeerSet;
use crate::queue::{AssemblyQueue, HeaderSlot};
use crate::span::calculate_request_span;
use crate::{BlockStore, Handshake, HandshakeMsg, Transport, MAX_BODY_FETCH};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Input to the engine loop besides handshakes, drops and timers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Headers {
        peer: PeerId,
        headers: Vec<BlockHeader>,
    },
    Bodies {
        peer: PeerId,
        bodies: Vec<Option<BlockBody>>,
    },
    /// Something outside the engine finished a block; try draining.
    BlockCompleted,
}

/// A received header disagrees with the one already held for its height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkDetected {
    pub peer: PeerId,
    pub number: u64,
    pub local: B256,
    pub remote: B256,
}

struct CheckpointWait {
    peer: PeerId,
    deadline: Instant,
}

/// The block sync state machine.
///
/// Handlers are synchronous and never wait on the network: every outbound
/// request runs on its own task, tied to the target peer where possible.
pub struct Syncer<T, S, H> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<S>,
    handshake: Arc<H>,
    requester: Requester<T>,
    peers: Arc<PeerSet>,
    queue: AssemblyQueue,
    forks: broadcast::Sender<ForkDetected>,
    checkpoint_wait: Option<CheckpointWait>,
    /// Peers that joined while another peer's checkpoint check was pending.
    checkpoint_backlog: VecDeque<PeerId>,
}

impl<T: Transport, S: BlockStore, H: Handshake> Syncer<T, S, H> {
    pub fn new(config: SyncConfig, transport: Arc<T>, store: Arc<S>, handshake: Arc<H>) -> Self {
        let (forks, _) = broadcast::channel(config.fork_channel_capacity.max(1));
        Self {
            requester: Requester::new(Arc::clone(&transport)),
            config,
            transport,
            store,
            handshake,
            peers: Arc::new(PeerSet::new()),
            queue: AssemblyQueue::new(),
            forks,
            checkpoint_wait: None,
            checkpoint_backlog: VecDeque::new(),
        }
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn queue(&self) -> &AssemblyQueue {
        &self.queue
    }

    pub fn subscribe_forks(&self) -> broadcast::Receiver<ForkDetected> {
        self.forks.subscribe()
    }

    /// Whether a checkpoint answer is still outstanding.
    pub fn awaiting_checkpoint(&self) -> bool {
        self.checkpoint_wait.is_some()
    }

    /// The peer whose checkpoint answer is outstanding, if any.
    pub fn checkpoint_peer(&self) -> Option<PeerId> {
        self.checkpoint_wait.as_ref().map(|w| w.peer)
    }

    /// Subscribe to every event source, then run the engine and the dispatch
    /// loop on their own tasks.
    pub fn start(self) -> SyncHandle {
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            events_tx.clone(),
            self.config.serve_concurrency,
            shutdown.clone(),
        );
        let handshakes = self.handshake.subscribe_handshake();
        let drops = self.transport.subscribe_drop_peer();

        let forks = self.forks.clone();
        let peers = Arc::clone(&self.peers);
        let dispatch = tokio::spawn(dispatcher.run());
        let engine = tokio::spawn(self.run(handshakes, drops, events_rx, shutdown.clone()));

        SyncHandle {
            shutdown,
            events: events_tx,
            forks,
            peers,
            engine,
            dispatch,
        }
    }

    async fn run(
        mut self,
        mut handshakes: broadcast::Receiver<HandshakeMsg>,
        mut drops: broadcast::Receiver<PeerId>,
        mut events: mpsc::Receiver<SyncEvent>,
        shutdown: CancellationToken,
    ) {
        let mut force_sync = interval(self.config.force_sync_interval);
        force_sync.tick().await; // skip first immediate tick
        let mut force_header = interval(self.config.force_header_interval);
        force_header.tick().await; // skip first immediate tick

        let mut handshakes_open = true;
        let mut drops_open = true;
        let mut events_open = true;

        info!(
            head = self.store.current_header().number,
            checkpoint = ?self.config.checkpoint.map(|c| c.number),
            "sync engine started"
        );

        loop {
            let checkpoint_deadline = self.checkpoint_wait.as_ref().map(|w| w.deadline);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = handshakes.recv(), if handshakes_open => match msg {
                    Ok(msg) => self.on_handshake(msg),
                    Err(RecvError::Lagged(skipped)) => {
                        error!(skipped, "handshake subscription lagged");
                    }
                    Err(RecvError::Closed) => {
                        warn!("handshake subscription closed");
                        handshakes_open = false;
                    }
                },
                id = drops.recv(), if drops_open => match id {
                    Ok(id) => self.on_peer_dropped(&id),
                    Err(RecvError::Lagged(skipped)) => {
                        error!(skipped, "peer drop subscription lagged");
                    }
                    Err(RecvError::Closed) => {
                        warn!("peer drop subscription closed");
                        drops_open = false;
                    }
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => events_open = false,
                },
                _ = force_sync.tick() => self.force_sync(),
                _ = force_header.tick() => self.force_header(),
                _ = tokio::time::sleep_until(checkpoint_deadline.unwrap_or_else(Instant::now)),
                    if checkpoint_deadline.is_some() => self.on_checkpoint_timeout(),
            }
        }

        self.peers.close();
        info!(
            head = self.store.current_header().number,
            queued = self.queue.len(),
            "sync engine stopped"
        );
    }

    // -----------------------------------------------------------------------
    // Peer lifecycle
    // -----------------------------------------------------------------------

    pub fn on_handshake(&mut self, msg: HandshakeMsg) {
        if let Some(peer) = self.peers.peer(&msg.peer) {
            if peer.set_head(msg.head_hash, msg.head_height) {
                debug!(peer = %short_id(&msg.peer), height = msg.head_height, "peer head updated");
            }
            return;
        }

        let peer = Arc::new(Peer::new(msg.peer, msg.head_hash, msg.head_height));
        let task = sync_with_peer(
            Arc::clone(&peer),
            Arc::clone(&self.store),
            self.requester.clone(),
        );
        match self.peers.register_with_task(Arc::clone(&peer), task) {
            Ok(()) => {
                info!(
                    peer = %short_id(&msg.peer),
                    height = msg.head_height,
                    peers = self.peers.len(),
                    "peer joined sync"
                );
                self.arm_checkpoint(&peer);
            }
            Err(e) => warn!(peer = %short_id(&msg.peer), err = %e, "failed to register peer"),
        }
    }

    pub fn on_peer_dropped(&mut self, id: &PeerId) {
        match self.peers.deregister(id) {
            Ok(()) => info!(peer = %short_id(id), peers = self.peers.len(), "peer left sync"),
            Err(PeerSetError::NotRegistered(_)) => {
                debug!(peer = %short_id(id), "dropped peer was not registered");
            }
            Err(e) => warn!(peer = %short_id(id), err = %e, "failed to deregister peer"),
        }
        self.checkpoint_backlog.retain(|queued| queued != id);
        if self.checkpoint_wait.as_ref().is_some_and(|w| w.peer == *id) {
            self.checkpoint_wait = None;
            self.next_checkpoint();
        }
    }

    fn force_sync(&self) {
        let Some(best) = self.peers.best_peer() else {
            return;
        };
        debug!(peer = %short_id(best.id()), height = best.height(), "force sync");
        best.spawn_task(sync_with_peer(
            Arc::clone(&best),
            Arc::clone(&self.store),
            self.requester.clone(),
        ));
    }

    fn force_header(&self) {
        let peers = self.peers.peers();
        debug!(peers = peers.len(), "refreshing peer heads");
        for peer in peers {
            let handshake = Arc::clone(&self.handshake);
            let id = *peer.id();
            peer.spawn_task(async move {
                if let Err(e) = handshake.request_handshake(&id).await {
                    debug!(peer = %short_id(&id), err = %e, "handshake request failed");
                }
            });
        }
    }

    // -----------------------------------------------------------------------
    // Checkpoint validation
    // -----------------------------------------------------------------------

    fn arm_checkpoint(&mut self, peer: &Arc<Peer>) {
        let Some(checkpoint) = self.config.checkpoint else {
            return;
        };
        if peer.height() < checkpoint.number {
            return;
        }
        let id = *peer.id();
        if self.checkpoint_wait.is_some() {
            if !self.checkpoint_backlog.contains(&id) {
                debug!(peer = %short_id(&id), "checkpoint check queued");
                self.checkpoint_backlog.push_back(id);
            }
            return;
        }
        self.checkpoint_wait = Some(CheckpointWait {
            peer: id,
            deadline: Instant::now() + self.config.checkpoint_timeout,
        });
        debug!(peer = %short_id(&id), number = checkpoint.number, "requesting checkpoint header");

        let requester = self.requester.clone();
        peer.spawn_task(async move {
            if let Err(e) = requester
                .request_headers_by_number(&id, checkpoint.number, 1, 0, false)
                .await
            {
                warn!(peer = %short_id(&id), err = %e, "checkpoint request failed");
            }
        });
    }

    /// Start the check for the next queued peer that is still registered.
    fn next_checkpoint(&mut self) {
        while self.checkpoint_wait.is_none() {
            let Some(id) = self.checkpoint_backlog.pop_front() else {
                return;
            };
            if let Some(peer) = self.peers.peer(&id) {
                self.arm_checkpoint(&peer);
            }
        }
    }

    /// Consume `headers` if they answer the pending checkpoint query.
    fn check_checkpoint(&mut self, peer: &PeerId, headers: &[BlockHeader]) -> bool {
        let (Some(wait), Some(checkpoint)) = (&self.checkpoint_wait, self.config.checkpoint) else {
            return false;
        };
        if wait.peer != *peer || headers.len() != 1 || headers[0].number != checkpoint.number {
            return false;
        }
        self.checkpoint_wait = None;

        let hash = headers[0].hash();
        if hash == checkpoint.hash {
            info!(peer = %short_id(peer), number = checkpoint.number, "checkpoint validated");
        } else {
            warn!(
                peer = %short_id(peer),
                number = checkpoint.number,
                expected = %checkpoint.hash,
                got = %hash,
                "checkpoint mismatch, dropping peer"
            );
            self.on_peer_dropped(peer);
        }
        self.next_checkpoint();
        true
    }

    fn on_checkpoint_timeout(&mut self) {
        let Some(wait) = self.checkpoint_wait.take() else {
            return;
        };
        warn!(peer = %short_id(&wait.peer), "checkpoint not served in time, dropping peer");
        self.on_peer_dropped(&wait.peer);
        self.next_checkpoint();
    }

    // -----------------------------------------------------------------------
    // Responses
    // -----------------------------------------------------------------------

    pub fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Headers { peer, headers } => self.on_block_headers(peer, headers),
            SyncEvent::Bodies { peer, bodies } => self.on_block_bodies(peer, bodies),
            SyncEvent::BlockCompleted => {
                self.block_completed();
            }
        }
    }

    fn on_block_headers(&mut self, peer: PeerId, headers: Vec<BlockHeader>) {
        if headers.is_empty() {
            if self.checkpoint_wait.take().is_some() {
                debug!(peer = %short_id(&peer), "empty header response, checkpoint wait cancelled");
                self.next_checkpoint();
            }
            return;
        }
        if self.check_checkpoint(&peer, &headers) {
            return;
        }

        let local = self.store.current_header().number;
        let received = headers.len();
        let mut wanted: Vec<B256> = Vec::new();

        for header in headers {
            let number = header.number;
            let hash = header.hash();

            if number <= local {
                match self.store.get_header_by_number(number) {
                    Some(committed) if committed.hash() == hash => {}
                    Some(committed) => self.report_fork(peer, number, committed.hash(), hash),
                    None => error!(number, local, "no committed header below local head"),
                }
                continue;
            }

            match self.queue.insert_header(header) {
                Ok(HeaderSlot::Inserted) | Ok(HeaderSlot::Existing { syncing: true }) => {
                    wanted.push(hash)
                }
                Ok(HeaderSlot::Existing { syncing: false }) => {}
                Ok(HeaderSlot::Replaced { previous }) => {
                    self.report_fork(peer, number, previous, hash);
                    wanted.push(hash);
                }
                Err(QueueError::ForkDetected {
                    number,
                    existing,
                    incoming,
                }) => self.report_fork(peer, number, existing, incoming),
                Err(e) => error!(peer = %short_id(&peer), err = %e, "header not queued"),
            }
        }

        debug!(
            peer = %short_id(&peer),
            received,
            bodies = wanted.len(),
            queued = self.queue.len(),
            "headers handled"
        );

        for chunk in wanted.chunks(MAX_BODY_FETCH) {
            let requester = self.requester.clone();
            let hashes = chunk.to_vec();
            self.spawn_for_peer(&peer, async move {
                if let Err(e) = requester.request_block_bodies(&peer, &hashes).await {
                    warn!(peer = %short_id(&peer), err = %e, "body request failed");
                }
            });
        }
    }

    fn on_block_bodies(&mut self, peer: PeerId, bodies: Vec<Option<BlockBody>>) {
        let local = self.store.current_header().number;
        let mut attached = 0usize;

        for body in bodies.into_iter().flatten() {
            let number = body.number;
            match self.queue.attach_body(body) {
                Ok(()) => attached += 1,
                Err(QueueError::UnknownHeight(_)) if number <= local => {
                    debug!(peer = %short_id(&peer), number, "body for committed block");
                }
                Err(QueueError::UnknownHeight(_)) => {
                    error!(peer = %short_id(&peer), number, "body without queued header");
                }
                Err(e) => warn!(peer = %short_id(&peer), err = %e, "body rejected"),
            }
        }

        if attached > 0 {
            self.block_completed();
        }
    }

    /// Commit contiguous completed blocks above the local head.
    /// Returns how many were committed.
    pub fn block_completed(&mut self) -> usize {
        let next = self.store.current_header().number + 1;
        let store = &self.store;
        let (committed, err) = self
            .queue
            .drain(next, |block| store.process_block(block, false));
        if let Some(e) = err {
            error!(next = next + committed as u64, err = %e, "block commit failed");
        }
        if committed > 0 {
            info!(
                committed,
                head = next + committed as u64 - 1,
                queued = self.queue.len(),
                "blocks committed"
            );
        }
        committed
    }

    fn report_fork(&self, peer: PeerId, number: u64, local: B256, remote: B256) {
        warn!(
            peer = %short_id(&peer),
            number,
            local = %local,
            remote = %remote,
            "fork detected"
        );
        // No receivers is fine.
        let _ = self.forks.send(ForkDetected {
            peer,
            number,
            local,
            remote,
        });
    }

    fn spawn_for_peer<F>(&self, id: &PeerId, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.peers.peer(id) {
            Some(peer) => {
                peer.spawn_task(task);
            }
            None => {
                tokio::spawn(task);
            }
        }
    }
}

/// One sync attempt against `peer`: request the headers above the local head.
async fn sync_with_peer<T: Transport, S: BlockStore>(
    peer: Arc<Peer>,
    store: Arc<S>,
    requester: Requester<T>,
) {
    let height = peer.height();
    let local = store.current_header().number;
    if height <= local {
        return;
    }
    let span = calculate_request_span(height, local);
    let Some(amount) = span.amount() else {
        return;
    };
    debug!(
        peer = %short_id(peer.id()),
        from = span.from,
        count = amount,
        skip = span.skip,
        max = span.max,
        "syncing from peer"
    );
    if let Err(e) = requester
        .request_headers_by_number(peer.id(), span.from, amount, span.skip, false)
        .await
    {
        warn!(peer = %short_id(peer.id()), err = %e, "header request failed");
    }
}

/// Control surface of a running engine.
pub struct SyncHandle {
    shutdown: CancellationToken,
    events: mpsc::Sender<SyncEvent>,
    forks: broadcast::Sender<ForkDetected>,
    peers: Arc<PeerSet>,
    engine: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal both loops to stop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait for both loops to finish.
    pub async fn join(self) {
        if let Err(e) = self.engine.await {
            error!(err = %e, "sync engine task failed");
        }
        if let Err(e) = self.dispatch.await {
            error!(err = %e, "dispatch task failed");
        }
    }

    pub async fn notify_block_completed(&self) {
        if self.events.send(SyncEvent::BlockCompleted).await.is_err() {
            debug!("sync engine already stopped");
        }
    }

    pub fn subscribe_forks(&self) -> broadcast::Receiver<ForkDetected> {
        self.forks.subscribe()
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }
}
