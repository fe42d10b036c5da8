//! Reactions to proposal traffic from peers.
//!
//! A node plays two roles at once: acceptor for proposals other nodes
//! drive, and vote sink for the proposal it drives itself. Both go
//! through [`ProposalHandler::on_message`].

use {
    crate::{
        config::ProposalConfig,
        error::Result,
        proposal::Proposal,
        traits::{BlockStore, Miner, PeerNetwork},
        types::{Phase, Vote},
    },
    ledger_consensus_net::{
        BlockData, ConsensusMessage, ConsensusNetMessage, NodeId, ProposalPayload,
    },
    log::*,
    solana_hash::Hash,
    std::{fmt, sync::Arc, time::Instant},
};

pub struct ProposalHandler {
    local_id: NodeId,
    config: ProposalConfig,
    miner: Arc<dyn Miner>,
    network: Arc<dyn PeerNetwork>,
    store: Arc<dyn BlockStore>,
}

impl fmt::Debug for ProposalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProposalHandler")
            .field("local_id", &self.local_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProposalHandler {
    pub fn new(
        local_id: NodeId,
        config: ProposalConfig,
        miner: Arc<dyn Miner>,
        network: Arc<dyn PeerNetwork>,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            local_id,
            config,
            miner,
            network,
            store,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn config(&self) -> &ProposalConfig {
        &self.config
    }

    /// Handle one message received on the session bound to `from`.
    pub fn on_message(&self, from: NodeId, message: ConsensusNetMessage) {
        trace!("{} from {from}", message.kind());
        match message {
            ConsensusNetMessage::Consensus(msg) => self.on_consensus(from, msg),
            ConsensusNetMessage::BlockRequest { block_hash } => {
                self.on_block_request(from, block_hash)
            }
            ConsensusNetMessage::BlockResponse(block) => self.on_block_response(from, block),
            ConsensusNetMessage::Hello { .. } => {}
        }
    }

    fn on_consensus(&self, from: NodeId, message: ConsensusMessage) {
        match message {
            ConsensusMessage::Prepare(payload) => self.on_prepare(from, payload),
            ConsensusMessage::Commit(payload) => self.on_commit(from, payload),
            ConsensusMessage::Promise(payload) => {
                self.on_vote(from, &payload, Some(Phase::Voting), Vote::Accept)
            }
            ConsensusMessage::Accepted(payload) => {
                self.on_vote(from, &payload, Some(Phase::Committing), Vote::Accept)
            }
            ConsensusMessage::Rejected(payload) => self.on_vote(from, &payload, None, Vote::Reject),
        }
    }

    // ── Acceptor side ───────────────────────────────────────────────────

    fn on_prepare(&self, from: NodeId, payload: ProposalPayload) {
        let id = payload.proposal_id;
        if payload.proposer_id != from {
            debug!(
                "prepare {id} from {from} names proposer {}",
                payload.proposer_id
            );
        }
        self.expire_stale(Instant::now());

        if let Some(active) = self.miner.active_proposal() {
            if active.id() == id && active.proposer() != self.local_id {
                // Retransmitted prepare for the proposal we already promised.
                self.reply(from, ConsensusMessage::Promise(payload));
            } else {
                debug!("rejecting prepare {id} from {from}: proposal {} active", active.id());
                self.reply(from, ConsensusMessage::Rejected(payload));
            }
            return;
        }

        let proposal = Arc::new(Proposal::from_payload(&payload));
        if proposal.start_voting().is_err() || !self.miner.register_new_proposal(proposal) {
            debug!("rejecting prepare {id} from {from}: could not register");
            self.reply(from, ConsensusMessage::Rejected(payload));
            return;
        }
        if !self.miner.pause() {
            warn!("rejecting prepare {id} from {from}: cannot pause block production");
            self.miner.clear_active_proposal(id);
            self.reply(from, ConsensusMessage::Rejected(payload));
            return;
        }

        if !self.store.has_block(&payload.block_hash) {
            let request = ConsensusNetMessage::BlockRequest {
                block_hash: payload.block_hash,
            };
            if let Err(err) = self.network.send_to(&from, &request) {
                debug!("block request to {from} failed: {err}");
            }
        }
        info!("promised proposal {id} from {}", payload.proposer_id);
        self.reply(from, ConsensusMessage::Promise(payload));
    }

    fn on_commit(&self, from: NodeId, payload: ProposalPayload) {
        let id = payload.proposal_id;
        let Some(active) = self.miner.active_proposal() else {
            debug!("ignoring commit {id} from {from}: no active proposal");
            return;
        };
        if active.id() != id || active.proposer() == self.local_id {
            debug!(
                "ignoring commit {id} from {from}: active proposal is {}",
                active.id()
            );
            return;
        }

        if let Err(err) = active.start_committing() {
            debug!("commit {id} from {from} out of order: {err}");
        }
        self.reply(from, ConsensusMessage::Accepted(payload));
        info!("accepted proposal {id} from {}", payload.proposer_id);
        self.release_remote(&active);
    }

    /// Finish and clear a remote proposal and resume production.
    fn release_remote(&self, proposal: &Proposal) {
        if proposal.phase() != Phase::Finished {
            let _ = proposal.finish();
        }
        let held = self
            .miner
            .active_proposal()
            .is_some_and(|active| active.id() == proposal.id());
        if !held {
            return;
        }
        // Resume while the slot is still held: a local round can only
        // pause after it claims the slot.
        if !self.miner.resume() {
            warn!("failed to resume block production after proposal {}", proposal.id());
        }
        self.miner.clear_active_proposal(proposal.id());
    }

    /// Drop the active remote proposal if it outlived
    /// `remote_proposal_ttl`. Returns `true` if one was dropped.
    pub fn expire_stale(&self, now: Instant) -> bool {
        let Some(active) = self.miner.active_proposal() else {
            return false;
        };
        if active.proposer() == self.local_id
            || active.age(now) < self.config.remote_proposal_ttl()
        {
            return false;
        }
        warn!(
            "proposal {} from {} expired in {} phase",
            active.id(),
            active.proposer(),
            active.phase()
        );
        self.release_remote(&active);
        true
    }

    // ── Proposer side ───────────────────────────────────────────────────

    /// `phase` is the phase the reply answers; `None` counts it in
    /// whichever phase is current.
    fn on_vote(&self, from: NodeId, payload: &ProposalPayload, phase: Option<Phase>, vote: Vote) {
        let Some(active) = self.miner.active_proposal() else {
            trace!("dropping {vote:?} from {from}: no active proposal");
            return;
        };
        if active.id() != payload.proposal_id || active.proposer() != self.local_id {
            trace!(
                "dropping {vote:?} for {} from {from}: not our active proposal",
                payload.proposal_id
            );
            return;
        }
        let phase = phase.unwrap_or_else(|| active.phase());
        active.record_vote(phase, from, vote);
    }

    // ── Block transfer ──────────────────────────────────────────────────

    fn on_block_request(&self, from: NodeId, hash: Hash) {
        let block = self.store.get_block(&hash).or_else(|| {
            self.miner
                .active_proposal()
                .and_then(|p| p.candidate().filter(|b| b.hash == hash).cloned())
        });
        match block {
            Some(block) => {
                let response = ConsensusNetMessage::BlockResponse(block);
                if let Err(err) = self.network.send_to(&from, &response) {
                    debug!("block response to {from} failed: {err}");
                }
            }
            None => debug!("block {hash} requested by {from} not found"),
        }
    }

    fn on_block_response(&self, from: NodeId, block: BlockData) {
        if !block.verify_hash() {
            warn!("block {} from {from} fails hash check", block.hash);
            return;
        }
        let hash = block.hash;
        if self.store.insert_block(block) {
            debug!("stored block {hash} from {from}");
        } else {
            debug!("store refused block {hash} from {from}");
        }
    }

    fn reply(&self, to: NodeId, message: ConsensusMessage) {
        let kind = message.kind();
        if let Err(err) = self.network.send_to(&to, &message.into()) {
            debug!("{kind} to {to} failed: {err}");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
