//! Experiment outcome records.
//!
//! [`RoundOutcome`] is the single append-only artifact per voting round.
//! Cell aggregates ([`CellSummary`]) are derived and recomputed on demand
//! from the outcome list, never stored as primary state.

use crate::RoundId;
use serde::{Deserialize, Serialize};

/// The recorded result of one voting round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round_id: RoundId,
    /// Number of followers inside the size mask whose vote arrived
    /// before the round deadline.
    pub n_eff: u32,
    /// Weighted sum of granted votes.
    pub weighted_yes: f64,
    /// Weighted sum over all on-time voters (leader included).
    pub weighted_total: f64,
    pub committed: bool,
    /// Whether the commit bit matched the round's oracle bit.
    pub correct: bool,
    /// Time from propose to the last counted ack; the deadline if none.
    pub latency_ms: f32,
}

/// One point in the (SNR, p_node, n) experiment grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellParams {
    pub snr_tier_db: f32,
    pub p_node: f64,
    pub n_target: u8,
}

/// Aggregated result for one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSummary {
    pub snr: f32,
    pub p_node: f64,
    pub n: u8,
    pub rounds: u32,
    pub committed: u32,
    pub correct: u32,
    /// Fraction of rounds that were both committed and correct.
    pub p_sys: f64,
    pub mean_n_eff: f64,
}
