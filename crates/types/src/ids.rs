//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier.
///
/// A small positive integer, unique per node and stable for the run.
/// Node ids double as the experiment's size mask: a round with
/// `n_target = n` only counts voters with `id <= n`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u8);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Raft term number.
///
/// Monotonically non-decreasing at every node and at every message
/// send/receive edge. Observing a higher term resets the vote granted
/// in the current term.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Term(pub u64);

impl Term {
    pub const ZERO: Term = Term(0);

    /// The successor term (used when starting an election).
    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term-{}", self.0)
    }
}

/// Voting-round identifier.
///
/// Rounds are strictly serial per leader; the log index of a round's
/// entry equals its round id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn next(self) -> RoundId {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round-{}", self.0)
    }
}
