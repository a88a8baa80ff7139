//! Cell aggregation and latency statistics.

use hdrhistogram::Histogram;
use vraft_types::{CellParams, CellSummary, RoundOutcome};

/// Aggregate one cell's outcomes into its summary row.
///
/// Pure and idempotent: re-running over the same recorded outcomes with
/// the same mask produces the same `P_sys` and `mean_n_eff`.
pub fn summarize_cell(params: CellParams, outcomes: &[RoundOutcome]) -> CellSummary {
    let rounds = outcomes.len() as u32;
    let committed = outcomes.iter().filter(|o| o.committed).count() as u32;
    let committed_and_correct = outcomes
        .iter()
        .filter(|o| o.committed && o.correct)
        .count() as u32;
    let correct = outcomes.iter().filter(|o| o.correct).count() as u32;

    let p_sys = if rounds == 0 {
        0.0
    } else {
        committed_and_correct as f64 / rounds as f64
    };
    let mean_n_eff = if rounds == 0 {
        0.0
    } else {
        outcomes.iter().map(|o| o.n_eff as f64).sum::<f64>() / rounds as f64
    };

    CellSummary {
        snr: params.snr_tier_db,
        p_node: params.p_node,
        n: params.n_target,
        rounds,
        committed,
        correct,
        p_sys,
        mean_n_eff,
    }
}

/// Round-latency histogram for one cell.
///
/// Millisecond resolution up to a minute at three significant figures,
/// plenty for sub-second vote deadlines.
pub struct CellLatency {
    hist: Histogram<u64>,
}

impl CellLatency {
    pub fn new() -> Self {
        Self {
            hist: Histogram::new_with_bounds(1, 60_000, 3).expect("static bounds"),
        }
    }

    pub fn record(&mut self, latency_ms: f32) {
        let v = (latency_ms.max(0.0) as u64).max(1);
        self.hist.saturating_record(v);
    }

    pub fn p50(&self) -> u64 {
        self.hist.value_at_quantile(0.5)
    }

    pub fn p99(&self) -> u64 {
        self.hist.value_at_quantile(0.99)
    }
}

impl Default for CellLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vraft_types::RoundId;

    fn outcome(round: u64, committed: bool, correct: bool, n_eff: u32) -> RoundOutcome {
        RoundOutcome {
            round_id: RoundId(round),
            n_eff,
            weighted_yes: 0.0,
            weighted_total: 0.0,
            committed,
            correct,
            latency_ms: 50.0,
        }
    }

    fn params() -> CellParams {
        CellParams {
            snr_tier_db: 16.0,
            p_node: 0.7,
            n_target: 3,
        }
    }

    #[test]
    fn test_p_sys_counts_committed_and_correct() {
        let outcomes = vec![
            outcome(1, true, true, 2),
            outcome(2, true, false, 2),
            outcome(3, false, false, 1),
            outcome(4, true, true, 2),
        ];
        let summary = summarize_cell(params(), &outcomes);
        assert_eq!(summary.rounds, 4);
        assert_eq!(summary.committed, 3);
        assert_eq!(summary.p_sys, 0.5);
        assert!((summary.mean_n_eff - 1.75).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let outcomes: Vec<RoundOutcome> = (1..=20)
            .map(|r| outcome(r, r % 3 != 0, r % 2 == 0, (r % 4) as u32))
            .collect();
        let a = summarize_cell(params(), &outcomes);
        let b = summarize_cell(params(), &outcomes);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_cell() {
        let summary = summarize_cell(params(), &[]);
        assert_eq!(summary.rounds, 0);
        assert_eq!(summary.p_sys, 0.0);
    }

    #[test]
    fn test_latency_quantiles() {
        let mut lat = CellLatency::new();
        for ms in 1..=100 {
            lat.record(ms as f32);
        }
        assert!((45..=55).contains(&lat.p50()));
        assert!(lat.p99() >= 95);
    }
}
