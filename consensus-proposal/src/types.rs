//! Core types for proposal rounds.

use {
    ledger_consensus_net::ProposalId,
    solana_hash::Hash,
    std::fmt,
};

/// Stage of a proposal. Each phase has its own vote sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Created, nothing broadcast yet.
    Proposed,
    /// Prepare sent; collecting Promise/Rejected.
    Voting,
    /// Commit sent; collecting Accepted/Rejected.
    Committing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Proposed => "proposed",
            Phase::Voting => "voting",
            Phase::Committing => "committing",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Accept,
    Reject,
}

/// Vote counts of the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub phase: Phase,
    pub accepted: usize,
    pub rejected: usize,
}

impl VoteTally {
    pub fn responses(&self) -> usize {
        self.accepted.saturating_add(self.rejected)
    }
}

/// How a blocking wait on a proposal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    TimedOut,
    Cancelled,
}

/// Result of one locally driven round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Both phases passed and the block was handed to the store.
    Accepted {
        proposal_id: ProposalId,
        block_hash: Hash,
        accepted: usize,
        rejected: usize,
    },
    /// Too few peers could still accept for the phase to reach quorum.
    Rejected {
        proposal_id: ProposalId,
        phase: Phase,
        accepted: usize,
        rejected: usize,
    },
    /// The phase timer fired before the phase was decided either way.
    TimedOut {
        proposal_id: ProposalId,
        phase: Phase,
        responses: usize,
        required: usize,
    },
}

impl RoundOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RoundOutcome::Accepted { .. })
    }

    pub fn proposal_id(&self) -> ProposalId {
        match self {
            RoundOutcome::Accepted { proposal_id, .. }
            | RoundOutcome::Rejected { proposal_id, .. }
            | RoundOutcome::TimedOut { proposal_id, .. } => *proposal_id,
        }
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Accepted {
                proposal_id,
                block_hash,
                accepted,
                rejected,
            } => write!(
                f,
                "proposal {proposal_id} accepted block {block_hash} ({accepted} accepted, \
                 {rejected} rejected)"
            ),
            RoundOutcome::Rejected {
                proposal_id,
                phase,
                accepted,
                rejected,
            } => write!(
                f,
                "proposal {proposal_id} rejected in {phase} phase ({accepted} accepted, \
                 {rejected} rejected)"
            ),
            RoundOutcome::TimedOut {
                proposal_id,
                phase,
                responses,
                required,
            } => write!(
                f,
                "proposal {proposal_id} timed out in {phase} phase ({responses} of {required} \
                 required responses)"
            ),
        }
    }
}
