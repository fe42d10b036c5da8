//! Shared test utilities for proposal round end-to-end tests.
//!
//! Provides:
//! - a counting [`Miner`] and an in-memory [`BlockStore`]
//! - [`ScriptedNetwork`]: peers whose replies to a round are fixed up front
//! - [`Mesh`]: several full nodes wired through in-process channels
//! - [`TcpNode`]: a node on the real TCP stack bound to loopback

use {
    crossbeam_channel::{unbounded, Sender},
    ledger_consensus_net::{
        transport::{inbound_channel, TcpConnector, TransportHandle, TransportListener},
        BlockData, ConsensusMessage, ConsensusNetError, ConsensusNetMessage, InboundMessage,
        NetConfig, NodeId, PeerRegistry, ProposalId, Result as NetResult,
    },
    ledger_consensus_proposal::{
        BlockStore, InboundDispatcher, Miner, PeerNetwork, Phase, Proposal, ProposalConfig,
        ProposalCoordinator, ProposalHandler, ProposalSlot,
    },
    solana_hash::Hash,
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex, OnceLock, RwLock,
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

// ─────────────────────────────────────────────────────────────────────────────
// Basics
// ─────────────────────────────────────────────────────────────────────────────

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Deterministic node id; index 0 is conventionally the proposer.
pub fn node_id(index: u8) -> NodeId {
    NodeId::new_from_array([index.wrapping_add(1); 32])
}

pub fn candidate_block(proposer: NodeId, height: u64) -> BlockData {
    BlockData::new(
        Hash::default(),
        height,
        proposer,
        format!("block {height} by {proposer}").into_bytes(),
    )
}

/// Proposal timers used by every scenario. Long enough for loopback TCP,
/// short enough that timeout scenarios stay quick.
pub fn test_proposal_config() -> ProposalConfig {
    ProposalConfig {
        prepare_timeout_ms: 1_000,
        commit_timeout_ms: 1_000,
        remote_proposal_ttl_ms: 10_000,
        ..ProposalConfig::dev_default()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now().checked_add(timeout).unwrap();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ─────────────────────────────────────────────────────────────────────────────
// Miner and block store
// ─────────────────────────────────────────────────────────────────────────────

/// Miner that only counts pause/resume calls and remembers every
/// proposal it accepted into its slot.
#[derive(Default)]
pub struct TestMiner {
    paused: AtomicBool,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    slot: ProposalSlot,
    registered: Mutex<Vec<Arc<Proposal>>>,
}

impl TestMiner {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// The most recent proposal registered, still readable after the
    /// slot was cleared.
    pub fn last_registered(&self) -> Option<Arc<Proposal>> {
        self.registered.lock().unwrap().last().cloned()
    }
}

impl Miner for TestMiner {
    fn pause(&self) -> bool {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        true
    }

    fn resume(&self) -> bool {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        true
    }

    fn has_active_proposal(&self) -> bool {
        self.slot.is_occupied()
    }

    fn register_new_proposal(&self, proposal: Arc<Proposal>) -> bool {
        if !self.slot.register(Arc::clone(&proposal)) {
            return false;
        }
        self.registered.lock().unwrap().push(proposal);
        true
    }

    fn active_proposal(&self) -> Option<Arc<Proposal>> {
        self.slot.get()
    }

    fn clear_active_proposal(&self, id: ProposalId) -> bool {
        self.slot.clear(id)
    }
}

#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: Mutex<HashMap<Hash, BlockData>>,
}

impl InMemoryBlockStore {
    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockStore for InMemoryBlockStore {
    fn has_block(&self, hash: &Hash) -> bool {
        self.blocks.lock().unwrap().contains_key(hash)
    }

    fn get_block(&self, hash: &Hash) -> Option<BlockData> {
        self.blocks.lock().unwrap().get(hash).cloned()
    }

    fn insert_block(&self, block: BlockData) -> bool {
        self.blocks.lock().unwrap().insert(block.hash, block);
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted peers
// ─────────────────────────────────────────────────────────────────────────────

/// How a scripted peer answers a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerScript {
    /// Promise on Prepare, Accepted on Commit.
    Cooperative,
    /// Rejected on Prepare.
    Rejecting,
    /// Never answers.
    Silent,
    /// Promises only after the Voting timer has already fired.
    LatePromise,
}

/// The proposer side of a scripted network: its handler and a log of
/// every reply handed to it.
#[derive(Default)]
struct ProposerInbox {
    handler: OnceLock<Arc<ProposalHandler>>,
    delivered: Mutex<Vec<(NodeId, &'static str)>>,
}

impl ProposerInbox {
    fn deliver(&self, from: NodeId, message: ConsensusMessage) {
        self.delivered.lock().unwrap().push((from, message.kind()));
        if let Some(handler) = self.handler.get() {
            handler.on_message(from, message.into());
        }
    }
}

/// Peer network whose peers answer the proposer's broadcasts by script.
/// Replies go straight into the proposer's [`ProposalHandler`]; late ones
/// from a background thread.
pub struct ScriptedNetwork {
    peers: Vec<(NodeId, PeerScript)>,
    inbox: Arc<ProposerInbox>,
    late_delay: Duration,
    late_replies: Mutex<Vec<JoinHandle<()>>>,
}

impl ScriptedNetwork {
    /// `late_delay` is measured from the Prepare broadcast.
    pub fn new(scripts: &[PeerScript], late_delay: Duration) -> Self {
        let peers = scripts
            .iter()
            .enumerate()
            .map(|(i, script)| (node_id(u8::try_from(i).unwrap().wrapping_add(1)), *script))
            .collect();
        Self {
            peers,
            inbox: Arc::default(),
            late_delay,
            late_replies: Mutex::default(),
        }
    }

    pub fn attach(&self, handler: Arc<ProposalHandler>) {
        assert!(self.inbox.handler.set(handler).is_ok(), "handler attached twice");
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|(id, _)| *id).collect()
    }

    /// Replies delivered to the proposer, in order.
    pub fn delivered(&self) -> Vec<(NodeId, &'static str)> {
        self.inbox.delivered.lock().unwrap().clone()
    }

    /// Block until every late reply scheduled so far has been handled.
    pub fn join_late_replies(&self) {
        let handles = std::mem::take(&mut *self.late_replies.lock().unwrap());
        for handle in handles {
            handle.join().unwrap();
        }
    }

    fn deliver_late(&self, from: NodeId, message: ConsensusMessage) {
        let inbox = Arc::clone(&self.inbox);
        let delay = self.late_delay;
        let handle = thread::Builder::new()
            .name("scriptedLate".to_string())
            .spawn(move || {
                thread::sleep(delay);
                inbox.deliver(from, message);
            })
            .unwrap();
        self.late_replies.lock().unwrap().push(handle);
    }
}

impl PeerNetwork for ScriptedNetwork {
    fn connected_peer_count(&self) -> usize {
        self.peers.len()
    }

    fn broadcast(&self, message: &ConsensusMessage) -> usize {
        match *message {
            ConsensusMessage::Prepare(payload) => {
                for (peer, script) in &self.peers {
                    match script {
                        PeerScript::Cooperative => {
                            self.inbox.deliver(*peer, ConsensusMessage::Promise(payload))
                        }
                        PeerScript::Rejecting => {
                            self.inbox.deliver(*peer, ConsensusMessage::Rejected(payload))
                        }
                        PeerScript::LatePromise => {
                            self.deliver_late(*peer, ConsensusMessage::Promise(payload))
                        }
                        PeerScript::Silent => {}
                    }
                }
            }
            ConsensusMessage::Commit(payload) => {
                for (peer, script) in &self.peers {
                    if *script == PeerScript::Cooperative {
                        self.inbox.deliver(*peer, ConsensusMessage::Accepted(payload));
                    }
                }
            }
            _ => {}
        }
        self.peers.len()
    }

    fn send_to(&self, node_id: &NodeId, _message: &ConsensusNetMessage) -> NetResult<()> {
        if self.peers.iter().any(|(id, _)| id == node_id) {
            Ok(())
        } else {
            Err(ConsensusNetError::UnknownPeer(*node_id))
        }
    }
}

/// A proposer wired to a [`ScriptedNetwork`].
pub struct ScriptedRound {
    pub miner: Arc<TestMiner>,
    pub store: Arc<InMemoryBlockStore>,
    pub network: Arc<ScriptedNetwork>,
    pub coordinator: ProposalCoordinator,
}

impl ScriptedRound {
    pub fn new(scripts: &[PeerScript]) -> Self {
        let local = node_id(0);
        let miner = Arc::new(TestMiner::default());
        let store = Arc::new(InMemoryBlockStore::default());
        // Late replies land well after the Voting timer fired.
        let late_delay = test_proposal_config()
            .phase_timeout(Phase::Voting)
            .saturating_add(Duration::from_millis(250));
        let network = Arc::new(ScriptedNetwork::new(scripts, late_delay));
        let handler = ProposalHandler::new(
            local,
            test_proposal_config(),
            miner.clone(),
            network.clone(),
            store.clone(),
        )
        .unwrap();
        network.attach(Arc::new(handler));
        let coordinator = ProposalCoordinator::new(
            local,
            test_proposal_config(),
            miner.clone(),
            network.clone(),
            store.clone(),
        )
        .unwrap();
        Self {
            miner,
            store,
            network,
            coordinator,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory mesh
// ─────────────────────────────────────────────────────────────────────────────

fn mesh_addr(index: usize) -> SocketAddr {
    let port = 9_000u16.saturating_add(u16::try_from(index).unwrap());
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Routes messages to the other mesh nodes' inbound channels.
pub struct MeshNetwork {
    local: NodeId,
    local_addr: SocketAddr,
    routes: RwLock<HashMap<NodeId, Sender<InboundMessage>>>,
}

impl MeshNetwork {
    fn send(&self, to: &Sender<InboundMessage>, message: ConsensusNetMessage) -> bool {
        to.send(InboundMessage {
            from: self.local,
            addr: self.local_addr,
            message,
        })
        .is_ok()
    }
}

impl PeerNetwork for MeshNetwork {
    fn connected_peer_count(&self) -> usize {
        self.routes.read().unwrap().len()
    }

    fn broadcast(&self, message: &ConsensusMessage) -> usize {
        self.routes
            .read()
            .unwrap()
            .values()
            .filter(|route| self.send(route, (*message).into()))
            .count()
    }

    fn send_to(&self, node_id: &NodeId, message: &ConsensusNetMessage) -> NetResult<()> {
        let routes = self.routes.read().unwrap();
        let route = routes
            .get(node_id)
            .ok_or(ConsensusNetError::UnknownPeer(*node_id))?;
        if self.send(route, message.clone()) {
            Ok(())
        } else {
            Err(ConsensusNetError::ChannelClosed)
        }
    }
}

pub struct MeshNode {
    pub id: NodeId,
    pub miner: Arc<TestMiner>,
    pub store: Arc<InMemoryBlockStore>,
    pub coordinator: ProposalCoordinator,
    dispatcher: Option<InboundDispatcher>,
}

/// Fully connected nodes exchanging messages through channels. Nodes
/// listed as offline never process anything sent to them.
pub struct Mesh {
    pub nodes: Vec<MeshNode>,
    exit: Arc<AtomicBool>,
}

impl Mesh {
    pub fn new(size: usize, offline: &[usize]) -> Self {
        let config = test_proposal_config();
        let exit = Arc::new(AtomicBool::new(false));
        let ids: Vec<_> = (0..size)
            .map(|i| node_id(u8::try_from(i).unwrap()))
            .collect();
        let channels: Vec<_> = (0..size).map(|_| unbounded()).collect();

        let nodes = channels
            .iter()
            .enumerate()
            .map(|(i, (_, receiver))| {
                let routes = ids
                    .iter()
                    .zip(&channels)
                    .filter(|(id, _)| **id != ids[i])
                    .map(|(id, (sender, _))| (*id, sender.clone()))
                    .collect();
                let network = Arc::new(MeshNetwork {
                    local: ids[i],
                    local_addr: mesh_addr(i),
                    routes: RwLock::new(routes),
                });
                let miner = Arc::new(TestMiner::default());
                let store = Arc::new(InMemoryBlockStore::default());
                let handler = ProposalHandler::new(
                    ids[i],
                    config.clone(),
                    miner.clone(),
                    network.clone(),
                    store.clone(),
                )
                .unwrap();
                let dispatcher = (!offline.contains(&i)).then(|| {
                    InboundDispatcher::new(
                        Arc::new(handler),
                        receiver.clone(),
                        config.dispatcher_poll(),
                        exit.clone(),
                    )
                    .unwrap()
                });
                let coordinator = ProposalCoordinator::new(
                    ids[i],
                    config.clone(),
                    miner.clone(),
                    network,
                    store.clone(),
                )
                .unwrap();
                MeshNode {
                    id: ids[i],
                    miner,
                    store,
                    coordinator,
                    dispatcher,
                }
            })
            .collect();

        Self { nodes, exit }
    }

    pub fn node(&self, index: usize) -> &MeshNode {
        &self.nodes[index]
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
        for node in &mut self.nodes {
            if let Some(dispatcher) = node.dispatcher.take() {
                let _ = dispatcher.join();
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TCP loopback nodes
// ─────────────────────────────────────────────────────────────────────────────

/// A node on the real connection stack. Created in two steps so every
/// listener is bound before anyone dials.
pub struct TcpNode {
    pub id: NodeId,
    pub miner: Arc<TestMiner>,
    pub store: Arc<InMemoryBlockStore>,
    pub registry: Arc<PeerRegistry>,
    pub coordinator: ProposalCoordinator,
    exit: Arc<AtomicBool>,
    dispatcher: Option<InboundDispatcher>,
    transport: TransportHandle,
}

pub struct BoundNode {
    id: NodeId,
    config: NetConfig,
    listener: TransportListener,
    inbound: (Sender<InboundMessage>, crossbeam_channel::Receiver<InboundMessage>),
}

impl BoundNode {
    pub fn bind(index: u8) -> Self {
        let id = node_id(index);
        let config = NetConfig::dev_default();
        let inbound = inbound_channel(&config);
        let listener = TransportListener::bind(id, config.clone(), inbound.0.clone()).unwrap();
        Self {
            id,
            config,
            listener,
            inbound,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// Start accepting and dial `peers`.
    pub fn start(self, peers: &[SocketAddr]) -> TcpNode {
        let Self {
            id,
            config,
            listener,
            inbound: (sender, receiver),
        } = self;
        let transport = listener.start().unwrap();
        let connector = Arc::new(TcpConnector::new(id, config.clone(), sender));
        let registry = Arc::new(PeerRegistry::initialize(config, connector, peers).unwrap());

        let proposal_config = test_proposal_config();
        let miner = Arc::new(TestMiner::default());
        let store = Arc::new(InMemoryBlockStore::default());
        let exit = Arc::new(AtomicBool::new(false));
        let handler = ProposalHandler::new(
            id,
            proposal_config.clone(),
            miner.clone(),
            registry.clone(),
            store.clone(),
        )
        .unwrap();
        let dispatcher = InboundDispatcher::new(
            Arc::new(handler),
            receiver,
            proposal_config.dispatcher_poll(),
            exit.clone(),
        )
        .unwrap();
        let coordinator = ProposalCoordinator::new(
            id,
            proposal_config,
            miner.clone(),
            registry.clone(),
            store.clone(),
        )
        .unwrap();

        TcpNode {
            id,
            miner,
            store,
            registry,
            coordinator,
            exit,
            dispatcher: Some(dispatcher),
            transport,
        }
    }
}

impl TcpNode {
    pub fn addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn shutdown(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        self.exit.store(true, Ordering::Relaxed);
        self.registry.shutdown();
        self.registry.wait_for_shutdown();
        self.transport.shutdown();
        let _ = dispatcher.join();
    }
}

impl Drop for TcpNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind `size` nodes on loopback and connect every pair.
pub fn tcp_cluster(size: u8) -> Vec<TcpNode> {
    let bound: Vec<_> = (0..size).map(BoundNode::bind).collect();
    let addrs: Vec<_> = bound.iter().map(BoundNode::addr).collect();
    bound
        .into_iter()
        .enumerate()
        .map(|(i, node)| {
            let peers: Vec<_> = addrs
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, addr)| *addr)
                .collect();
            node.start(&peers)
        })
        .collect()
}
