//! The reliability experiment: grid controller and follower role.
//!
//! The experiment walks a three-dimensional parameter grid of channel
//! quality tier (target SNR), per-node trust probability `p_node`, and
//! effective cluster size `n`, running a fixed number of voting rounds
//! per cell. Per cell it records the system reliability `P_sys` (fraction
//! of rounds committed *and* matching the leader's private oracle bit)
//! and the mean effective cluster size.
//!
//! The leader side lives in [`Controller`]. The follower side lives in
//! [`FollowerRole`]; Bernoulli voting is handled by the consensus engine,
//! so what remains there is the transmit-gain servo and status reporting.

mod artifact;
mod config;
mod controller;
mod follower;
mod oracle;
mod stats;

pub use artifact::{artifact_filename, write_artifact, Artifact, ArtifactConfig};
pub use config::ExperimentConfig;
pub use controller::{Controller, ControllerDeps, RoundWaiter};
pub use follower::{FollowerRole, GainTuner};
pub use oracle::GroundTruthOracle;
pub use stats::{summarize_cell, CellLatency};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("consensus error: {0}")]
    Consensus(#[from] vraft_consensus::ConsensusError),

    #[error("artifact i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("experiment interrupted")]
    Interrupted,
}
