//! Paxos-style block proposal rounds
//!
//! A node that mines a block asks its peers to agree on it before the
//! block is kept. The round has two phases:
//!
//! 1. **Voting**: the proposer broadcasts `Prepare`; peers with no other
//!    proposal in flight pause their own mining and answer `Promise`,
//!    everyone else answers `Rejected`.
//! 2. **Committing**: the proposer broadcasts `Commit`; peers answer
//!    `Accepted`, drop the proposal and resume mining.
//!
//! Each phase passes once `required_votes(connected)` distinct peers
//! accepted it before its timer fires. It fails early once the peers still
//! silent could no longer make up the difference.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`proposal`]    | Proposal state machine, vote sets, blocking waits |
//! | [`coordinator`] | Drives a locally mined block through both phases |
//! | [`handler`]     | Reactions to peer messages (acceptor and vote sink) |
//! | [`service`]     | Inbound dispatch thread |
//! | [`quorum`]      | Required-vote and verdict arithmetic |
//! | [`timeout`]     | Phase timers |
//! | [`traits`]      | Miner, block store and peer network seams |
//! | [`config`]      | `ProposalConfig` defaults and validation |

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod proposal;
pub mod quorum;
pub mod service;
pub mod timeout;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use {
    config::ProposalConfig,
    coordinator::ProposalCoordinator,
    error::{ProposalError, Result},
    handler::ProposalHandler,
    proposal::Proposal,
    quorum::required_votes,
    service::InboundDispatcher,
    traits::{BlockStore, Miner, PeerNetwork, ProposalSlot},
    types::{Phase, RoundOutcome, Vote, VoteTally, WaitOutcome},
};
