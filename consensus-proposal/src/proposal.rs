//! The proposal state machine.
//!
//! A [`Proposal`] is one attempt to get peers to agree on a candidate block.
//! It moves through `Proposed → Voting → Committing → Finished`, keeps one
//! accepted and one rejected vote set per phase, and lets a coordinator
//! block until enough peers have answered.
//!
//! Phase and votes sit behind a single mutex; every change wakes the
//! condition variable all waits go through ([`Proposal::wait_until`]).

use {
    crate::{
        error::{ProposalError, Result},
        types::{Phase, Vote, VoteTally, WaitOutcome},
    },
    ledger_consensus_net::{BlockData, NodeId, ProposalId, ProposalPayload},
    log::{debug, trace, warn},
    solana_hash::Hash,
    std::{
        collections::HashSet,
        sync::{Condvar, Mutex, MutexGuard, PoisonError},
        time::{Duration, Instant},
    },
};

#[derive(Debug)]
struct ProposalState {
    phase: Phase,
    accepted: HashSet<NodeId>,
    rejected: HashSet<NodeId>,
    cancelled: bool,
}

impl ProposalState {
    fn tally(&self) -> VoteTally {
        VoteTally {
            phase: self.phase,
            accepted: self.accepted.len(),
            rejected: self.rejected.len(),
        }
    }
}

#[derive(Debug)]
pub struct Proposal {
    id: ProposalId,
    proposer: NodeId,
    block_hash: Hash,
    /// The block itself, for proposals this node drives.
    candidate: Option<BlockData>,
    created_at: Instant,
    state: Mutex<ProposalState>,
    cvar: Condvar,
}

impl Proposal {
    pub fn new(id: ProposalId, proposer: NodeId, block_hash: Hash) -> Self {
        let now = Instant::now();
        Self {
            id,
            proposer,
            block_hash,
            candidate: None,
            created_at: now,
            state: Mutex::new(ProposalState {
                phase: Phase::Proposed,
                accepted: HashSet::new(),
                rejected: HashSet::new(),
                cancelled: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// A proposal for a block this node mined, with a fresh random id.
    pub fn new_local(proposer: NodeId, candidate: BlockData) -> Self {
        let mut proposal = Self::new(ProposalId::new_random(), proposer, candidate.hash);
        proposal.candidate = Some(candidate);
        proposal
    }

    /// Mirror of a proposal announced by a peer.
    pub fn from_payload(payload: &ProposalPayload) -> Self {
        Self::new(payload.proposal_id, payload.proposer_id, payload.block_hash)
    }

    pub fn payload(&self) -> ProposalPayload {
        ProposalPayload {
            proposal_id: self.id,
            proposer_id: self.proposer,
            block_hash: self.block_hash,
        }
    }

    pub fn id(&self) -> ProposalId {
        self.id
    }

    pub fn proposer(&self) -> NodeId {
        self.proposer
    }

    pub fn block_hash(&self) -> Hash {
        self.block_hash
    }

    pub fn candidate(&self) -> Option<&BlockData> {
        self.candidate.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since creation, measured at `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    fn lock(&self) -> MutexGuard<'_, ProposalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn tally(&self) -> VoteTally {
        self.lock().tally()
    }

    pub fn has_accepted(&self, node: &NodeId) -> bool {
        self.lock().accepted.contains(node)
    }

    pub fn has_rejected(&self, node: &NodeId) -> bool {
        self.lock().rejected.contains(node)
    }

    // ── Phase transitions ───────────────────────────────────────────────

    /// Move to `to`. Legal moves are Proposed → Voting, Voting → Committing
    /// and anything but Finished → Finished. A legal move clears both vote
    /// sets and wakes waiters; an illegal one leaves the phase unchanged.
    pub fn transition(&self, to: Phase) -> Result<()> {
        let mut state = self.lock();
        let from = state.phase;
        let legal = match to {
            Phase::Voting => from == Phase::Proposed,
            Phase::Committing => from == Phase::Voting,
            Phase::Finished => from != Phase::Finished,
            Phase::Proposed => false,
        };
        if !legal {
            warn!("proposal {}: illegal transition {from} -> {to}", self.id);
            return Err(ProposalError::IllegalTransition { from, to });
        }
        state.phase = to;
        state.accepted.clear();
        state.rejected.clear();
        drop(state);
        debug!("proposal {}: {from} -> {to}", self.id);
        self.cvar.notify_all();
        Ok(())
    }

    pub fn start_voting(&self) -> Result<()> {
        self.transition(Phase::Voting)
    }

    pub fn start_committing(&self) -> Result<()> {
        self.transition(Phase::Committing)
    }

    pub fn finish(&self) -> Result<()> {
        self.transition(Phase::Finished)
    }

    // ── Votes ───────────────────────────────────────────────────────────

    /// Record an accept for the current phase. Returns `false` when `node`
    /// already voted in this phase.
    pub fn accept(&self, node: NodeId) -> bool {
        let mut state = self.lock();
        self.insert_vote(&mut state, node, Vote::Accept)
    }

    /// Record a reject for the current phase. Returns `false` when `node`
    /// already voted in this phase.
    pub fn reject(&self, node: NodeId) -> bool {
        let mut state = self.lock();
        self.insert_vote(&mut state, node, Vote::Reject)
    }

    /// Record a vote only if the proposal is still in `expected`. Replies
    /// that arrive after the round moved on are dropped.
    pub fn record_vote(&self, expected: Phase, node: NodeId, vote: Vote) -> bool {
        let mut state = self.lock();
        if state.phase != expected {
            debug!(
                "proposal {}: dropping late {vote:?} from {node} for {expected} phase (now {})",
                self.id, state.phase
            );
            return false;
        }
        self.insert_vote(&mut state, node, vote)
    }

    fn insert_vote(&self, state: &mut ProposalState, node: NodeId, vote: Vote) -> bool {
        if state.accepted.contains(&node) || state.rejected.contains(&node) {
            debug!(
                "proposal {}: duplicate {vote:?} from {node} in {} phase",
                self.id, state.phase
            );
            return false;
        }
        match vote {
            Vote::Accept => state.accepted.insert(node),
            Vote::Reject => state.rejected.insert(node),
        };
        trace!(
            "proposal {}: {vote:?} from {node} ({} accepted, {} rejected)",
            self.id,
            state.accepted.len(),
            state.rejected.len()
        );
        self.cvar.notify_all();
        true
    }

    // ── Waiting ─────────────────────────────────────────────────────────

    /// Block until `predicate` holds for the current tally, `deadline`
    /// passes or the proposal is cancelled.
    pub fn wait_until<F>(&self, deadline: Instant, mut predicate: F) -> WaitOutcome
    where
        F: FnMut(&VoteTally) -> bool,
    {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return WaitOutcome::Cancelled;
            }
            if predicate(&state.tally()) {
                return WaitOutcome::Reached;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = self
                .cvar
                .wait_timeout(state, deadline.saturating_duration_since(now))
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Block until at least `required` peers answered in the current phase.
    pub fn wait_for_required_responses(&self, required: usize, deadline: Instant) -> WaitOutcome {
        self.wait_until(deadline, |tally| tally.responses() >= required)
    }

    pub fn wait_for_phase(&self, phase: Phase, deadline: Instant) -> WaitOutcome {
        self.wait_until(deadline, |tally| tally.phase == phase)
    }

    /// Wake every waiter with [`WaitOutcome::Cancelled`].
    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.cvar.notify_all();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
