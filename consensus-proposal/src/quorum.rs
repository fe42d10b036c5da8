//! Quorum arithmetic.

use crate::types::VoteTally;

/// Distinct peer accepts needed to pass a phase with `connected` peers
/// (the proposer itself is not counted).
pub fn required_votes(connected: usize) -> usize {
    match connected {
        0 => 0,
        1 => 1,
        n => n / 2,
    }
}

/// A phase passes once `required` peers accepted it. Rejects never offset
/// accepts.
pub fn phase_passed(tally: &VoteTally, required: usize) -> bool {
    tally.accepted >= required
}

/// Whether waiting longer can still change the verdict: `true` once the
/// phase passed, or once the `eligible` peers that have not answered yet
/// could no longer lift the accepts to `required`.
pub fn phase_decided(tally: &VoteTally, required: usize, eligible: usize) -> bool {
    let outstanding = eligible.saturating_sub(tally.responses());
    phase_passed(tally, required) || tally.accepted.saturating_add(outstanding) < required
}
