//! Registry of connection workers and the peers they are connected to.
//!
//! The [`PeerRegistry`] owns every worker and is the single source of truth
//! for "who are we talking to?". Workers publish and retract their sessions
//! through the shared registry state; consensus broadcasts and targeted replies go
//! out over those sessions.
//!
//! Lock order: connected map, then a worker's session slot.

use {
    crate::{
        config::NetConfig,
        error::{ConsensusNetError, Result},
        message::{ConsensusMessage, ConsensusNetMessage, NodeId, ProposalPayload},
        queue::{ConnectionRequestQueue, QueueHandle},
        request::{Backoff, ConnectionRequest},
        resolver::AddressResolver,
        session::{Connector, Session},
        worker::{self, ConnectionWorker, WorkerSlot},
    },
    log::{debug, info, warn},
    std::{
        collections::{HashMap, HashSet},
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex, PoisonError,
        },
        thread::JoinHandle,
    },
};

/// State shared between the registry and its worker threads.
pub(crate) struct RegistryShared {
    slots: Vec<Arc<WorkerSlot>>,
    /// Connected peers and the worker holding each session.
    connected: Mutex<HashMap<NodeId, usize>>,
    /// Addresses with a live request chain: queued, in flight or connected.
    tracked: Mutex<HashSet<SocketAddr>>,
}

impl RegistryShared {
    fn new(slots: Vec<Arc<WorkerSlot>>) -> Self {
        Self {
            slots,
            connected: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    /// Publish `session` for `worker`. Refused when another worker already
    /// holds a session to the same node or the worker is stopping.
    pub(crate) fn install_session(&self, worker: usize, session: Arc<dyn Session>) -> bool {
        let Some(slot) = self.slots.get(worker) else {
            return false;
        };
        let node_id = session.node_id();
        let mut connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = connected.get(&node_id) {
            if *holder != worker {
                info!(
                    "worker {worker}: {node_id} already connected through worker {holder}, \
                     dropping duplicate session"
                );
                return false;
            }
        }
        if !slot.install(session) {
            return false;
        }
        connected.insert(node_id, worker);
        true
    }

    /// Retract the session held by `worker`.
    pub(crate) fn remove_session(&self, worker: usize) {
        let Some(slot) = self.slots.get(worker) else {
            return;
        };
        let mut connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = slot.take_session() {
            let node_id = session.node_id();
            if connected.get(&node_id) == Some(&worker) {
                connected.remove(&node_id);
            }
        }
    }

    fn track(&self, addr: SocketAddr) -> bool {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr)
    }

    pub(crate) fn untrack(&self, addr: &SocketAddr) {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr);
    }

    fn session_for(&self, node_id: &NodeId) -> Option<Arc<dyn Session>> {
        let connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        let worker = *connected.get(node_id)?;
        self.slots.get(worker)?.session()
    }

    fn live_sessions(&self) -> Vec<Arc<dyn Session>> {
        let _connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        self.slots.iter().filter_map(|slot| slot.session()).collect()
    }
}

/// Owns the connection worker pool.
pub struct PeerRegistry {
    config: NetConfig,
    shared: Arc<RegistryShared>,
    queues: Arc<[QueueHandle]>,
    next_worker: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerRegistry {
    /// Spawn `config.worker_count` workers and schedule one connection
    /// request per peer address, round-robin across workers.
    pub fn initialize(
        config: NetConfig,
        connector: Arc<dyn Connector>,
        peers: &[SocketAddr],
    ) -> Result<Self> {
        config.validate()?;

        let slots: Vec<_> = (0..config.worker_count)
            .map(|id| Arc::new(WorkerSlot::new(id)))
            .collect();
        let (queues, handles): (Vec<_>, Vec<_>) = (0..config.worker_count)
            .map(|id| {
                ConnectionRequestQueue::new(
                    id,
                    config.initial_queue_capacity,
                    config.queue_inbox_capacity,
                )
            })
            .unzip();
        let queue_handles: Arc<[QueueHandle]> = handles.into();
        let shared = Arc::new(RegistryShared::new(slots.clone()));
        let backoff = Backoff::new(config.backoff_base(), config.backoff_max());

        let registry = Self {
            config,
            shared: Arc::clone(&shared),
            queues: Arc::clone(&queue_handles),
            next_worker: AtomicUsize::new(0),
            handles: Mutex::new(Vec::with_capacity(slots.len())),
        };

        for (slot, queue) in slots.into_iter().zip(queues) {
            let worker = ConnectionWorker::new(
                slot,
                queue,
                Arc::clone(&queue_handles),
                Arc::clone(&connector),
                backoff,
                Arc::clone(&shared),
            );
            // On failure the registry drops here, which stops the workers
            // already running.
            let handle = worker.spawn()?;
            registry
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        info!(
            "peer registry started {} connection workers",
            registry.config.worker_count
        );

        for addr in peers {
            registry.connect_to(*addr)?;
        }
        Ok(registry)
    }

    /// Resolve `peers` first, then [`PeerRegistry::initialize`].
    pub fn initialize_resolved(
        config: NetConfig,
        connector: Arc<dyn Connector>,
        resolver: &dyn AddressResolver,
        peers: &[String],
    ) -> Result<Self> {
        let addrs = resolver.resolve(peers);
        if addrs.len() < peers.len() {
            warn!(
                "{} of {} configured peers could not be resolved",
                peers.len().saturating_sub(addrs.len()),
                peers.len()
            );
        }
        Self::initialize(config, connector, &addrs)
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.shared.slots.len()
    }

    /// Schedule a connection to `addr`. `Ok(false)` when the address is
    /// already connected or has a pending request.
    pub fn connect_to(&self, addr: SocketAddr) -> Result<bool> {
        if self.is_connected_to_addr(addr) || !self.shared.track(addr) {
            debug!("connect_to {addr}: already connected or pending");
            return Ok(false);
        }
        let request = ConnectionRequest::new(addr, self.config.max_connect_attempts);
        match self.schedule(request) {
            Ok(worker) => {
                debug!("scheduled connection to {addr} on worker {worker}");
                Ok(true)
            }
            Err(err) => {
                self.shared.untrack(&addr);
                Err(err)
            }
        }
    }

    fn schedule(&self, request: ConnectionRequest) -> Result<usize> {
        let count = self.queues.len();
        if count == 0 {
            return Err(ConsensusNetError::ShuttingDown);
        }
        let index = self
            .next_worker
            .fetch_add(1, Ordering::Relaxed)
            .checked_rem(count)
            .unwrap_or(0);
        let queue = self
            .queues
            .get(index)
            .ok_or(ConsensusNetError::ShuttingDown)?;
        queue.schedule(request)?;
        Ok(queue.worker_id())
    }

    pub fn is_connected_to(&self, node_id: &NodeId) -> bool {
        self.shared
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(node_id)
    }

    pub fn is_connected_to_addr(&self, addr: SocketAddr) -> bool {
        self.shared
            .live_sessions()
            .iter()
            .any(|session| session.peer_addr() == addr)
    }

    pub fn connected_peer_count(&self) -> usize {
        let _connected = self
            .shared
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared
            .slots
            .iter()
            .filter(|slot| slot.is_connected())
            .count()
    }

    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.shared
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Requests queued across all workers, not counting in-flight ones.
    pub fn pending_requests(&self) -> usize {
        self.queues.iter().map(QueueHandle::pending).sum()
    }

    /// Send `message` on every live session. Returns the number of sessions
    /// written; failures are logged.
    pub fn broadcast(&self, message: &ConsensusMessage) -> usize {
        let envelope = ConsensusNetMessage::Consensus(*message);
        let mut sent = 0usize;
        for session in self.shared.live_sessions() {
            match session.send(&envelope) {
                Ok(()) => sent = sent.saturating_add(1),
                Err(err) => warn!(
                    "failed to send {} to {} at {}: {err}",
                    message.kind(),
                    session.node_id(),
                    session.peer_addr()
                ),
            }
        }
        debug!(
            "broadcast {} for proposal {} to {sent} peers",
            message.kind(),
            message.proposal_id()
        );
        sent
    }

    pub fn broadcast_prepare(&self, payload: ProposalPayload) -> usize {
        self.broadcast(&ConsensusMessage::Prepare(payload))
    }

    pub fn broadcast_commit(&self, payload: ProposalPayload) -> usize {
        self.broadcast(&ConsensusMessage::Commit(payload))
    }

    /// Send `message` to one connected peer.
    pub fn send_to(&self, node_id: &NodeId, message: &ConsensusNetMessage) -> Result<()> {
        let session = self
            .shared
            .session_for(node_id)
            .ok_or(ConsensusNetError::UnknownPeer(*node_id))?;
        session.send(message)
    }

    /// Stop every worker, ending live sessions. Does not wait.
    pub fn shutdown(&self) {
        info!("peer registry shutting down");
        for slot in &self.shared.slots {
            slot.stop();
        }
    }

    /// Join every worker thread. Call after [`PeerRegistry::shutdown`].
    pub fn wait_for_shutdown(&self) {
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        worker::join_all(handles);
    }
}

impl Drop for PeerRegistry {
    fn drop(&mut self) {
        self.shutdown();
        self.wait_for_shutdown();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
