//! Peer liveness state.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A peer is Stale after 2 s of silence.
pub const STALE_AFTER: Duration = Duration::from_secs(2);
/// A peer is Dead after 5 s of silence.
pub const DEAD_AFTER: Duration = Duration::from_secs(5);

/// Liveness classification, derived purely from time since last reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liveness {
    Alive,
    Stale,
    Dead,
}

impl Liveness {
    /// Classify from the age of the last parseable inbound frame.
    pub fn classify(age: Duration) -> Liveness {
        if age >= DEAD_AFTER {
            Liveness::Dead
        } else if age >= STALE_AFTER {
            Liveness::Stale
        } else {
            Liveness::Alive
        }
    }
}

/// Per-peer link state snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerState {
    pub id: NodeId,
    /// Monotonic time (since process start) of the last parseable frame.
    pub last_seen: Duration,
    /// Exponentially smoothed SNR: `0.3 * sample + 0.7 * prev`.
    pub ewma_snr_db: f32,
    pub liveness: Liveness,
}
