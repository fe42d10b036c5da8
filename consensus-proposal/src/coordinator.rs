//! Drives one locally proposed block through both phases.
//!
//! A round registers the proposal as the node's active one, pauses block
//! production, then runs Voting (Prepare → Promise) and Committing
//! (Commit → Accepted). Each phase needs `required_votes` accepts from the
//! peers connected when it starts. Production resumes and the active
//! proposal is cleared on every exit path.

use {
    crate::{
        config::ProposalConfig,
        error::{ProposalError, Result},
        proposal::Proposal,
        quorum::{phase_decided, phase_passed, required_votes},
        timeout::PhaseTimer,
        traits::{BlockStore, Miner, PeerNetwork},
        types::{Phase, RoundOutcome, VoteTally, WaitOutcome},
    },
    ledger_consensus_net::{BlockData, NodeId, ProposalId},
    log::*,
    std::{fmt, sync::Arc, time::Instant},
};

/// Keeps block production paused while alive.
struct PausedMining<'a> {
    miner: &'a dyn Miner,
}

impl<'a> PausedMining<'a> {
    fn pause(miner: &'a dyn Miner) -> Result<Self> {
        if !miner.pause() {
            return Err(ProposalError::CannotPause);
        }
        Ok(Self { miner })
    }
}

impl Drop for PausedMining<'_> {
    fn drop(&mut self) {
        if !self.miner.resume() {
            warn!("failed to resume block production");
        }
    }
}

/// Keeps a proposal registered as the active one while alive.
struct ActiveProposal<'a> {
    miner: &'a dyn Miner,
    id: ProposalId,
}

impl<'a> ActiveProposal<'a> {
    fn register(miner: &'a dyn Miner, proposal: &Arc<Proposal>) -> Result<Self> {
        if !miner.register_new_proposal(Arc::clone(proposal)) {
            return Err(ProposalError::ProposalAlreadyActive);
        }
        Ok(Self {
            miner,
            id: proposal.id(),
        })
    }
}

impl Drop for ActiveProposal<'_> {
    fn drop(&mut self) {
        if !self.miner.clear_active_proposal(self.id) {
            debug!("proposal {} was no longer active", self.id);
        }
    }
}

enum PhaseVerdict {
    Passed(VoteTally),
    Failed(RoundOutcome),
}

/// Runs consensus rounds for blocks this node proposes.
pub struct ProposalCoordinator {
    local_id: NodeId,
    config: ProposalConfig,
    miner: Arc<dyn Miner>,
    network: Arc<dyn PeerNetwork>,
    store: Arc<dyn BlockStore>,
}

impl fmt::Debug for ProposalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProposalCoordinator")
            .field("local_id", &self.local_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProposalCoordinator {
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

    /// Run one round for `candidate`. Blocks until the round resolves.
    ///
    /// Local precondition failures are returned as errors; every network
    /// outcome, timeouts included, is a [`RoundOutcome`].
    pub fn run(&self, candidate: BlockData) -> Result<RoundOutcome> {
        let proposal = Arc::new(Proposal::new_local(self.local_id, candidate));
        let id = proposal.id();
        info!(
            "proposal {id}: starting round for block {} (connected peers: {})",
            proposal.block_hash(),
            self.network.connected_peer_count()
        );

        let result = self.run_round(&proposal);
        if proposal.phase() != Phase::Finished {
            // Abandoned; the error is already in `result`.
            let _ = proposal.finish();
        }

        match &result {
            Ok(outcome) => info!("{outcome}"),
            Err(err) => warn!("proposal {id} failed: {err}"),
        }
        result
    }

    fn run_round(&self, proposal: &Arc<Proposal>) -> Result<RoundOutcome> {
        // Claim the slot before pausing, as acceptors do, so a round that
        // loses the slot never touches production. Guards drop in reverse:
        // production resumes before the slot frees up.
        let _active = ActiveProposal::register(self.miner.as_ref(), proposal)?;
        let _paused = PausedMining::pause(self.miner.as_ref())?;
        let mut timer = PhaseTimer::new(self.config.clone());

        let mut last_tally = proposal.tally();
        for phase in [Phase::Voting, Phase::Committing] {
            match self.run_phase(proposal, phase, &mut timer)? {
                PhaseVerdict::Passed(tally) => last_tally = tally,
                PhaseVerdict::Failed(outcome) => return Ok(outcome),
            }
        }

        proposal.finish()?;
        if let Some(block) = proposal.candidate() {
            if !self.store.insert_block(block.clone()) {
                warn!(
                    "proposal {}: store refused accepted block {}",
                    proposal.id(),
                    block.hash
                );
            }
        }
        Ok(RoundOutcome::Accepted {
            proposal_id: proposal.id(),
            block_hash: proposal.block_hash(),
            accepted: last_tally.accepted,
            rejected: last_tally.rejected,
        })
    }

    fn run_phase(
        &self,
        proposal: &Proposal,
        phase: Phase,
        timer: &mut PhaseTimer,
    ) -> Result<PhaseVerdict> {
        proposal.transition(phase)?;
        let eligible = self.network.connected_peer_count();
        let required = required_votes(eligible);

        timer.start(phase);
        let sent = match phase {
            Phase::Committing => self.network.broadcast_commit(proposal.payload()),
            _ => self.network.broadcast_prepare(proposal.payload()),
        };
        debug!(
            "proposal {}: {phase} phase sent to {sent} peers, waiting for {required} accepts",
            proposal.id()
        );

        let deadline = timer.deadline().unwrap_or_else(Instant::now);
        let waited =
            proposal.wait_until(deadline, |tally| phase_decided(tally, required, eligible));
        timer.cancel();

        let tally = proposal.tally();
        match waited {
            WaitOutcome::Cancelled => Err(ProposalError::Cancelled(proposal.id())),
            WaitOutcome::TimedOut => Ok(PhaseVerdict::Failed(RoundOutcome::TimedOut {
                proposal_id: proposal.id(),
                phase,
                responses: tally.responses(),
                required,
            })),
            WaitOutcome::Reached if phase_passed(&tally, required) => {
                Ok(PhaseVerdict::Passed(tally))
            }
            WaitOutcome::Reached => Ok(PhaseVerdict::Failed(RoundOutcome::Rejected {
                proposal_id: proposal.id(),
                phase,
                accepted: tally.accepted,
                rejected: tally.rejected,
            })),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
