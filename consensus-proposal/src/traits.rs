//! Collaborators consumed by proposal rounds.
//!
//! Block production, block storage and peer fan-out live outside this
//! crate; rounds reach them only through these traits.

use {
    crate::proposal::Proposal,
    ledger_consensus_net::{
        BlockData, ConsensusMessage, ConsensusNetMessage, NodeId, PeerRegistry, ProposalId,
        ProposalPayload, Result as NetResult,
    },
    solana_hash::Hash,
    std::sync::{Arc, Mutex, PoisonError},
};

/// The local block producer, which also tracks the node's single active
/// proposal.
pub trait Miner: Send + Sync {
    /// Stop producing blocks. Returns `false` if production cannot pause.
    fn pause(&self) -> bool;

    /// Resume producing blocks.
    fn resume(&self) -> bool;

    fn has_active_proposal(&self) -> bool;

    /// Make `proposal` the active one. Returns `false` if another proposal
    /// is already active.
    fn register_new_proposal(&self, proposal: Arc<Proposal>) -> bool;

    fn active_proposal(&self) -> Option<Arc<Proposal>>;

    /// Drop the active proposal if it is `id`.
    fn clear_active_proposal(&self, id: ProposalId) -> bool;
}

/// Block and transaction storage.
pub trait BlockStore: Send + Sync {
    fn has_block(&self, hash: &Hash) -> bool;

    fn get_block(&self, hash: &Hash) -> Option<BlockData>;

    /// Persist an agreed or fetched block. Returns `false` if the store
    /// refused it.
    fn insert_block(&self, block: BlockData) -> bool;
}

/// Fan-out to connected peers.
pub trait PeerNetwork: Send + Sync {
    fn connected_peer_count(&self) -> usize;

    /// Best-effort send on every live session. Returns the number of
    /// sessions written.
    fn broadcast(&self, message: &ConsensusMessage) -> usize;

    fn send_to(&self, node_id: &NodeId, message: &ConsensusNetMessage) -> NetResult<()>;

    fn broadcast_prepare(&self, payload: ProposalPayload) -> usize {
        self.broadcast(&ConsensusMessage::Prepare(payload))
    }

    fn broadcast_commit(&self, payload: ProposalPayload) -> usize {
        self.broadcast(&ConsensusMessage::Commit(payload))
    }
}

impl PeerNetwork for PeerRegistry {
    fn connected_peer_count(&self) -> usize {
        PeerRegistry::connected_peer_count(self)
    }

    fn broadcast(&self, message: &ConsensusMessage) -> usize {
        PeerRegistry::broadcast(self, message)
    }

    fn send_to(&self, node_id: &NodeId, message: &ConsensusNetMessage) -> NetResult<()> {
        PeerRegistry::send_to(self, node_id, message)
    }
}

/// Single-slot holder for the active proposal, for [`Miner`] implementers.
#[derive(Debug, Default)]
pub struct ProposalSlot {
    active: Mutex<Option<Arc<Proposal>>>,
}

impl ProposalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn register(&self, proposal: Arc<Proposal>) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return false;
        }
        *active = Some(proposal);
        true
    }

    pub fn get(&self) -> Option<Arc<Proposal>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self, id: ProposalId) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|p| p.id() == id) {
            *active = None;
            return true;
        }
        false
    }
}
