//! Phase timers for locally driven rounds.
//!
//! Voting and Committing each get a configurable timer. The coordinator
//! starts it right before broadcasting and waits on the proposal until
//! the timer's deadline.

use {
    crate::{config::ProposalConfig, types::Phase},
    std::time::{Duration, Instant},
};

/// Tracks the active timer of a round.
#[derive(Debug)]
pub struct PhaseTimer {
    config: ProposalConfig,
    /// When the current timer started (if any).
    started_at: Option<Instant>,
    /// Which phase the timer is for.
    active_phase: Option<Phase>,
}

impl PhaseTimer {
    pub fn new(config: ProposalConfig) -> Self {
        Self {
            config,
            started_at: None,
            active_phase: None,
        }
    }

    /// Start the timer for `phase`, replacing any running one.
    pub fn start(&mut self, phase: Phase) {
        self.started_at = Some(Instant::now());
        self.active_phase = Some(phase);
    }

    pub fn cancel(&mut self) {
        self.started_at = None;
        self.active_phase = None;
    }

    pub fn timeout_duration(&self, phase: Phase) -> Duration {
        self.config.phase_timeout(phase)
    }

    /// Instant at which the running timer fires.
    pub fn deadline(&self) -> Option<Instant> {
        let started_at = self.started_at?;
        let phase = self.active_phase?;
        started_at.checked_add(self.timeout_duration(phase))
    }
}
