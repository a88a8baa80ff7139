//! Consensus log and vote records.

use crate::{NodeId, RoundId, Term};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A replicated log entry.
///
/// `ground_truth` is the oracle bit against which vote correctness is
/// scored. It is populated only at the proposing leader and is never
/// serialized; followers vote blind. The `#[serde(skip)]` is what
/// keeps the oracle from ever crossing the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log index; equals the round id of the round that proposed it.
    pub index: u64,
    /// Term in which the entry was proposed.
    pub term: Term,
    /// Opaque command payload.
    pub payload: Vec<u8>,
    /// Leader-local oracle bit. `None` everywhere except the proposer.
    #[serde(skip)]
    pub ground_truth: Option<bool>,
}

impl LogEntry {
    pub fn new(index: u64, term: Term, payload: Vec<u8>) -> Self {
        Self {
            index,
            term,
            payload,
            ground_truth: None,
        }
    }
}

/// A single follower's vote on a round, as observed at the leader.
///
/// `granted = false` is an explicit "no", distinct from a vote that
/// never arrived, which is simply absent from the round's vote set.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteRecord {
    pub round_id: RoundId,
    pub voter: NodeId,
    pub granted: bool,
    /// Peer-table EWMA SNR for the voter at collection time.
    pub observed_snr_db: f32,
    /// Monotonic time (since process start) the ack was received.
    pub received_at: Duration,
}
