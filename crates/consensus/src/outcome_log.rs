//! Append-only round outcome log.

use crate::engine::ConsensusError;
use vraft_types::{RoundId, RoundOutcome};

/// The per-run record of every finalized round.
///
/// Append-only: a round is recorded exactly once, so a `committed = true`
/// verdict can never be retracted by a later write. Guarded by its own
/// lock at the runtime layer (last in the lock order, after the peer
/// table and the consensus state).
#[derive(Debug, Default)]
pub struct OutcomeLog {
    outcomes: Vec<RoundOutcome>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finalized round. Rejects a second write for the same
    /// round id.
    pub fn record(&mut self, outcome: RoundOutcome) -> Result<(), ConsensusError> {
        if self.outcomes.iter().any(|o| o.round_id == outcome.round_id) {
            return Err(ConsensusError::DuplicateRound(outcome.round_id));
        }
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn get(&self, round_id: RoundId) -> Option<&RoundOutcome> {
        self.outcomes.iter().find(|o| o.round_id == round_id)
    }

    pub fn all(&self) -> &[RoundOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
