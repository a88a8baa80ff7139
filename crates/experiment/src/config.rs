//! Experiment configuration.

use std::time::Duration;

/// Parameters of one experiment run, leader side.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Channel quality tiers to sweep, in dB.
    pub snr_levels: Vec<f32>,
    /// Trust probabilities to sweep.
    pub p_node_levels: Vec<f64>,
    /// Effective cluster sizes to sweep. The size is a software mask over
    /// the vote set; peers with higher ids keep voting and are ignored.
    pub n_levels: Vec<u8>,
    /// Voting rounds per grid cell.
    pub rounds_per_cell: u32,
    /// How long the leader collects acks per round.
    pub vote_deadline: Duration,
    /// Minimum dwell after a target-SNR change before rounds start.
    pub stabilize_time: Duration,
    /// Hard cap on the stabilization wait.
    pub stabilize_cap: Duration,
    /// SNR tolerance for the stabilization check.
    pub snr_tolerance: f32,
    /// Interval between stabilization samples.
    pub sample_interval: Duration,
    /// Consecutive in-tolerance samples required.
    pub stable_samples: u32,
    /// Peers that must be in tolerance per sample.
    pub min_peers: usize,
    /// Idle gap between rounds, letting the channel drain.
    pub round_cooldown: Duration,
    /// Seed for the ground-truth oracle.
    pub seed: u64,
    /// Where the result artifact is written.
    pub output_dir: std::path::PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            snr_levels: vec![16.0, 6.0],
            p_node_levels: vec![0.6, 0.7, 0.8, 0.9],
            n_levels: vec![1, 2, 3, 4, 5, 6],
            rounds_per_cell: 30,
            vote_deadline: Duration::from_millis(500),
            stabilize_time: Duration::from_secs(2),
            stabilize_cap: Duration::from_secs(60),
            snr_tolerance: 3.0,
            sample_interval: Duration::from_millis(500),
            stable_samples: 3,
            min_peers: 1,
            round_cooldown: Duration::from_millis(20),
            seed: 42,
            output_dir: std::path::PathBuf::from("."),
        }
    }
}

impl ExperimentConfig {
    /// Total number of grid cells.
    pub fn cell_count(&self) -> usize {
        self.snr_levels.len() * self.p_node_levels.len() * self.n_levels.len()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_rounds_per_cell(mut self, rounds: u32) -> Self {
        self.rounds_per_cell = rounds;
        self
    }

    pub fn with_vote_deadline(mut self, deadline: Duration) -> Self {
        self.vote_deadline = deadline;
        self
    }
}
