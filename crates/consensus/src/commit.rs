//! SNR-weighted commit rule.
//!
//! Plain Raft commits on `acks > n/2`. This testbed replaces the commit
//! decision with a weighted sum so that even-sized vote splits resolve
//! deterministically: each voter's unit weight is perturbed by a term
//! proportional to its link SNR, small enough that the weights stay
//! ordinally equivalent to unit weights whenever the unweighted vote is
//! not an exact tie.

/// Scale of the SNR perturbation on top of the unit weight.
pub const WEIGHT_SPREAD: f64 = 0.001;

/// Floor for the SNR span in the weight rescale.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Result of the weighted vote count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedDecision {
    pub w_yes: f64,
    pub w_total: f64,
    pub committed: bool,
}

/// Apply the weighted commit rule to the on-time voters of a round.
///
/// Each voter is `(granted, snr_db)`; the caller has already filtered to
/// the experiment mask and appended the leader's own vote. Voters that
/// never replied are simply absent; they neither help nor hurt.
///
/// Weights: `w_i = 1 + 0.001 * (snr_i - snr_min) / max(snr_max - snr_min, 1e-6)`.
/// Commit iff `W_yes > W_total / 2`.
///
/// This is a pure function: the same votes and SNR values reproduce the
/// same decision bit-for-bit.
pub fn weighted_commit(voters: &[(bool, f32)]) -> WeightedDecision {
    if voters.is_empty() {
        return WeightedDecision {
            w_yes: 0.0,
            w_total: 0.0,
            committed: false,
        };
    }

    let mut snr_min = f64::INFINITY;
    let mut snr_max = f64::NEG_INFINITY;
    for &(_, snr) in voters {
        let snr = snr as f64;
        snr_min = snr_min.min(snr);
        snr_max = snr_max.max(snr);
    }
    let span = (snr_max - snr_min).max(WEIGHT_EPSILON);

    let mut w_yes = 0.0;
    let mut w_total = 0.0;
    for &(granted, snr) in voters {
        let w = 1.0 + WEIGHT_SPREAD * (snr as f64 - snr_min) / span;
        w_total += w;
        if granted {
            w_yes += w;
        }
    }

    WeightedDecision {
        w_yes,
        w_total,
        committed: w_yes > w_total / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_vote_set_is_uncommitted() {
        let d = weighted_commit(&[]);
        assert!(!d.committed);
        assert_eq!(d.w_total, 0.0);
    }

    #[test]
    fn test_unanimous_yes_commits() {
        let d = weighted_commit(&[(true, 20.0), (true, 19.0), (true, 19.0)]);
        assert!(d.committed);
        assert!(d.w_yes == d.w_total);
    }

    #[test]
    fn test_unweighted_majority_unchanged_by_perturbation() {
        // 2 yes vs 1 no: the perturbation cannot flip a real majority.
        let d = weighted_commit(&[(true, 0.0), (true, 1.0), (false, 40.0)]);
        assert!(d.committed);
        // 1 yes vs 2 no, yes holds the best link: still rejected.
        let d = weighted_commit(&[(true, 40.0), (false, 0.0), (false, 1.0)]);
        assert!(!d.committed);
    }

    #[test]
    fn test_even_split_broken_by_snr() {
        // 1-1 split, the yes voter hears better: weight tips toward yes.
        let d = weighted_commit(&[(true, 20.0), (false, 10.0)]);
        assert!(d.committed);

        // Mirror image tips the other way.
        let d = weighted_commit(&[(true, 10.0), (false, 20.0)]);
        assert!(!d.committed);
    }

    #[test]
    fn test_identical_snrs_do_not_commit_a_tie() {
        // Zero span hits the epsilon floor; all weights equal, so an even
        // split fails the strict W_yes > W_total/2 test.
        let d = weighted_commit(&[(true, 15.0), (false, 15.0)]);
        assert!(!d.committed);
    }

    #[test]
    fn test_decision_is_reproducible() {
        let votes = [(true, 10.0), (false, 20.0), (true, 12.5), (true, 3.25)];
        let a = weighted_commit(&votes);
        let b = weighted_commit(&votes);
        assert_eq!(a, b);
        assert_eq!(a.w_yes.to_bits(), b.w_yes.to_bits());
        assert_eq!(a.w_total.to_bits(), b.w_total.to_bits());
    }
}
