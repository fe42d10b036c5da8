//! Proposal round configuration.
//!
//! Defines the phase timers of a locally driven round and how long a
//! remote proposal may hold this node before it is abandoned.

use {
    crate::types::Phase,
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// Configuration for proposal rounds.
///
/// All timeouts are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    /// How long the proposer waits for Promise/Rejected replies after
    /// broadcasting Prepare.
    /// Default: 5000.
    pub prepare_timeout_ms: u64,

    /// How long the proposer waits for Accepted/Rejected replies after
    /// broadcasting Commit.
    /// Default: 5000.
    pub commit_timeout_ms: u64,

    /// Age after which a remote proposal that never committed is dropped
    /// and local mining resumes. Must exceed both phase timeouts.
    /// Default: 30000.
    pub remote_proposal_ttl_ms: u64,

    /// Poll interval of the inbound dispatcher when no messages arrive.
    /// Default: 50.
    pub dispatcher_poll_ms: u64,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 5_000,
            commit_timeout_ms: 5_000,
            remote_proposal_ttl_ms: 30_000,
            dispatcher_poll_ms: 50,
        }
    }
}

impl ProposalConfig {
    /// Short timers for tests and local clusters.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            prepare_timeout_ms: 500,
            commit_timeout_ms: 500,
            remote_proposal_ttl_ms: 2_000,
            dispatcher_poll_ms: 10,
        }
    }

    /// Timer length for `phase`. Phases without replies to wait for have
    /// no timer.
    pub fn phase_timeout(&self, phase: Phase) -> Duration {
        let ms = match phase {
            Phase::Voting => self.prepare_timeout_ms,
            Phase::Committing => self.commit_timeout_ms,
            Phase::Proposed | Phase::Finished => 0,
        };
        Duration::from_millis(ms)
    }

    pub fn remote_proposal_ttl(&self) -> Duration {
        Duration::from_millis(self.remote_proposal_ttl_ms)
    }

    pub fn dispatcher_poll(&self) -> Duration {
        Duration::from_millis(self.dispatcher_poll_ms)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prepare_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("prepare_timeout_ms"));
        }
        if self.commit_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("commit_timeout_ms"));
        }
        if self.dispatcher_poll_ms == 0 {
            return Err(ConfigError::ZeroTimeout("dispatcher_poll_ms"));
        }
        let round = self.prepare_timeout_ms.saturating_add(self.commit_timeout_ms);
        if self.remote_proposal_ttl_ms <= round {
            return Err(ConfigError::TtlTooShort {
                ttl_ms: self.remote_proposal_ttl_ms,
                round_ms: round,
            });
        }
        Ok(())
    }
}

/// Errors in proposal configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be > 0")]
    ZeroTimeout(&'static str),
    #[error("remote_proposal_ttl_ms ({ttl_ms}) must exceed both phase timeouts ({round_ms})")]
    TtlTooShort { ttl_ms: u64, round_ms: u64 },
}
