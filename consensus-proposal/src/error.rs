//! Error types for proposal rounds.

use {
    crate::{config::ConfigError, types::Phase},
    ledger_consensus_net::ProposalId,
    thiserror::Error,
};

/// Local precondition failures of a proposal round.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposalError {
    /// The miner refused to pause block production.
    #[error("cannot pause block production")]
    CannotPause,

    /// This node already tracks a proposal.
    #[error("another proposal is already active")]
    ProposalAlreadyActive,

    #[error("illegal phase transition from {from} to {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("proposal {0} was cancelled")]
    Cancelled(ProposalId),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience result type for proposal operations.
pub type Result<T> = std::result::Result<T, ProposalError>;
