//! In-memory collaborators for unit tests.

use {
    crate::{
        proposal::Proposal,
        traits::{BlockStore, Miner, PeerNetwork, ProposalSlot},
    },
    ledger_consensus_net::{
        BlockData, ConsensusMessage, ConsensusNetError, ConsensusNetMessage, NodeId, ProposalId,
        Result as NetResult,
    },
    solana_hash::Hash,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex,
        },
    },
};

pub(crate) fn node(byte: u8) -> NodeId {
    NodeId::new_from_array([byte; 32])
}

#[derive(Default)]
pub(crate) struct MockMiner {
    pub paused: AtomicBool,
    pub refuse_pause: AtomicBool,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    /// Whether the last resume happened while a proposal was registered.
    pub resumed_holding_slot: AtomicBool,
    slot: ProposalSlot,
}

impl MockMiner {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl Miner for MockMiner {
    fn pause(&self) -> bool {
        if self.refuse_pause.load(Ordering::SeqCst) {
            return false;
        }
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        true
    }

    fn resume(&self) -> bool {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.resumed_holding_slot
            .store(self.slot.is_occupied(), Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        true
    }

    fn has_active_proposal(&self) -> bool {
        self.slot.is_occupied()
    }

    fn register_new_proposal(&self, proposal: Arc<Proposal>) -> bool {
        self.slot.register(proposal)
    }

    fn active_proposal(&self) -> Option<Arc<Proposal>> {
        self.slot.get()
    }

    fn clear_active_proposal(&self, id: ProposalId) -> bool {
        self.slot.clear(id)
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    blocks: Mutex<HashMap<Hash, BlockData>>,
}

impl MemoryStore {
    pub fn contains(&self, hash: &Hash) -> bool {
        self.has_block(hash)
    }
}

impl BlockStore for MemoryStore {
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

type BroadcastHook = Box<dyn Fn(&ConsensusMessage) + Send + Sync>;

/// Records everything sent; `on_broadcast` lets a test answer broadcasts
/// synchronously.
pub(crate) struct RecordingNetwork {
    connected: AtomicUsize,
    broadcasts: Mutex<Vec<ConsensusMessage>>,
    sent: Mutex<Vec<(NodeId, ConsensusNetMessage)>>,
    hook: Mutex<Option<BroadcastHook>>,
}

impl RecordingNetwork {
    pub fn new(connected: usize) -> Self {
        Self {
            connected: AtomicUsize::new(connected),
            broadcasts: Mutex::default(),
            sent: Mutex::default(),
            hook: Mutex::default(),
        }
    }

    pub fn on_broadcast(&self, hook: impl Fn(&ConsensusMessage) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn broadcast_kinds(&self) -> Vec<&'static str> {
        self.broadcasts
            .lock()
            .unwrap()
            .iter()
            .map(ConsensusMessage::kind)
            .collect()
    }

    pub fn sent(&self) -> Vec<(NodeId, ConsensusNetMessage)> {
        self.sent.lock().unwrap().clone()
    }

    /// Kinds of messages sent to `to`, in order.
    pub fn sent_kinds(&self, to: &NodeId) -> Vec<&'static str> {
        self.sent()
            .iter()
            .filter(|(node, _)| node == to)
            .map(|(_, message)| message.kind())
            .collect()
    }
}

impl PeerNetwork for RecordingNetwork {
    fn connected_peer_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    fn broadcast(&self, message: &ConsensusMessage) -> usize {
        self.broadcasts.lock().unwrap().push(*message);
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(message);
        }
        self.connected_peer_count()
    }

    fn send_to(&self, node_id: &NodeId, message: &ConsensusNetMessage) -> NetResult<()> {
        if self.connected_peer_count() == 0 {
            return Err(ConsensusNetError::UnknownPeer(*node_id));
        }
        self.sent.lock().unwrap().push((*node_id, message.clone()));
        Ok(())
    }
}
