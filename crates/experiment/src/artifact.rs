//! Result artifact.

use crate::ExperimentError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use vraft_types::{CellSummary, RoundOutcome};

/// Run configuration as recorded in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub started_at: String,
    pub total_nodes: u8,
    pub leader_id: u8,
    pub snr_levels: Vec<f32>,
    pub p_node_levels: Vec<f64>,
    pub n_levels: Vec<u8>,
    pub rounds_per_cell: u32,
    pub vote_deadline_s: f32,
    pub stabilize_time_s: f32,
    pub seed: u64,
}

/// The complete result of one experiment run: configuration, per-cell
/// aggregates, and the raw per-round outcome list the aggregates were
/// computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub config: ArtifactConfig,
    pub cells: Vec<CellSummary>,
    pub rounds: Vec<RoundOutcome>,
}

/// Timestamped result filename.
pub fn artifact_filename(at: DateTime<Local>) -> String {
    format!(
        "reliability_experiment_results_{}.json",
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Write the artifact to `dir`, creating it if needed.
pub fn write_artifact(
    dir: &Path,
    artifact: &Artifact,
    at: DateTime<Local>,
) -> Result<PathBuf, ExperimentError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(artifact_filename(at));
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), artifact)?;
    Ok(path)
}
