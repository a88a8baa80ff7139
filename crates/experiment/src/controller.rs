//! Leader-side experiment controller.

use crate::artifact::{write_artifact, Artifact, ArtifactConfig};
use crate::oracle::GroundTruthOracle;
use crate::stats::{summarize_cell, CellLatency};
use crate::{ExperimentConfig, ExperimentError};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vraft_consensus::{OutcomeLog, RaftEngine};
use vraft_link::{Clock, PeerTable, UdpLink};
use vraft_types::{CellParams, CellSummary, Liveness, NodeId, RoundId, RoundOutcome};
use vraft_wire::{ExpBeginBody, Message};

/// Wakes the round driver when the engine driver lands an ack.
///
/// A generation counter under a condvar: the driver bumps it after every
/// processed frame during an open round; the round loop re-checks its
/// completion predicate on each bump and otherwise sleeps to the round
/// deadline.
pub struct RoundWaiter {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl RoundWaiter {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        *self.generation.lock() += 1;
        self.cond.notify_all();
    }

    /// Wait for the next notification; `false` means the deadline passed
    /// without one.
    pub fn wait_until(&self, deadline: std::time::Instant) -> bool {
        let mut generation = self.generation.lock();
        let seen = *generation;
        while *generation == seen {
            if self.cond.wait_until(&mut generation, deadline).timed_out() {
                return *generation != seen;
            }
        }
        true
    }
}

impl Default for RoundWaiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared runtime handles the controller drives.
pub struct ControllerDeps {
    pub engine: Arc<Mutex<RaftEngine>>,
    pub peers: Arc<PeerTable>,
    pub outcomes: Arc<Mutex<OutcomeLog>>,
    pub link: Arc<UdpLink>,
    pub waiter: Arc<RoundWaiter>,
    pub clock: Clock,
    pub shutdown: Arc<AtomicBool>,
}

/// Walks the (SNR × p_node × n) grid, runs the rounds, aggregates the
/// cells, and writes the result artifact.
pub struct Controller {
    config: ExperimentConfig,
    deps: ControllerDeps,
    oracle: GroundTruthOracle,
    leader: NodeId,
    total_nodes: u8,
}

impl Controller {
    pub fn new(config: ExperimentConfig, deps: ControllerDeps) -> Self {
        let (leader, total_nodes) = {
            let engine = deps.engine.lock();
            (engine.id(), engine.total_nodes())
        };
        let oracle = GroundTruthOracle::new(config.seed);
        Self {
            config,
            deps,
            oracle,
            leader,
            total_nodes,
        }
    }

    /// Run the whole experiment. Always writes the artifact, including on
    /// interruption; partial sweeps are still data.
    pub fn run(&self) -> Result<PathBuf, ExperimentError> {
        let started_at = chrono::Local::now();
        let mut cells: Vec<CellSummary> = Vec::with_capacity(self.config.cell_count());

        info!(
            snr_levels = ?self.config.snr_levels,
            p_node_levels = ?self.config.p_node_levels,
            n_levels = ?self.config.n_levels,
            rounds_per_cell = self.config.rounds_per_cell,
            cells = self.config.cell_count(),
            "experiment starting"
        );

        'grid: for &snr_tier in &self.config.snr_levels {
            self.broadcast_exp_begin(Some(snr_tier), None);
            self.wait_snr_stable(snr_tier);

            for &p_node in &self.config.p_node_levels {
                self.broadcast_exp_begin(None, Some(p_node));
                self.pause(Duration::from_millis(200));

                for &n_target in &self.config.n_levels {
                    if self.interrupted() {
                        break 'grid;
                    }
                    let params = CellParams {
                        snr_tier_db: snr_tier,
                        p_node,
                        n_target,
                    };
                    cells.push(self.run_cell(params)?);
                }
            }
        }

        self.broadcast(Message::ExpEnd);

        let rounds = self.deps.outcomes.lock().all().to_vec();
        let artifact = Artifact {
            config: ArtifactConfig {
                started_at: started_at.to_rfc3339(),
                total_nodes: self.total_nodes,
                leader_id: self.leader.0,
                snr_levels: self.config.snr_levels.clone(),
                p_node_levels: self.config.p_node_levels.clone(),
                n_levels: self.config.n_levels.clone(),
                rounds_per_cell: self.config.rounds_per_cell,
                vote_deadline_s: self.config.vote_deadline.as_secs_f32(),
                stabilize_time_s: self.config.stabilize_time.as_secs_f32(),
                seed: self.config.seed,
            },
            cells,
            rounds,
        };
        let path = write_artifact(&self.config.output_dir, &artifact, started_at)?;
        info!(path = %path.display(), "results written");
        Ok(path)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Cell and round execution
    // ═══════════════════════════════════════════════════════════════════

    fn run_cell(&self, params: CellParams) -> Result<CellSummary, ExperimentError> {
        let mut outcomes: Vec<RoundOutcome> = Vec::with_capacity(self.config.rounds_per_cell as usize);
        let mut latency = CellLatency::new();

        for _ in 0..self.config.rounds_per_cell {
            if self.interrupted() {
                break;
            }
            let outcome = self.run_round(params.n_target)?;
            latency.record(outcome.latency_ms);
            self.deps.outcomes.lock().record(outcome.clone())?;
            outcomes.push(outcome);
            self.pause(self.config.round_cooldown);
        }

        let summary = summarize_cell(params, &outcomes);
        info!(
            "[cell snr={} p={} n={}] committed={}/{} correct={}/{} P_sys={:.2}",
            params.snr_tier_db,
            params.p_node,
            params.n_target,
            summary.committed,
            summary.rounds,
            summary.correct,
            summary.rounds,
            summary.p_sys,
        );
        debug!(
            p50_ms = latency.p50(),
            p99_ms = latency.p99(),
            mean_n_eff = summary.mean_n_eff,
            "cell latency"
        );
        Ok(summary)
    }

    fn run_round(&self, n_target: u8) -> Result<RoundOutcome, ExperimentError> {
        let deps = &self.deps;
        let proposed_at = deps.clock.now();

        let frames = {
            let mut engine = deps.engine.lock();
            let next_round = RoundId(engine.log_len() as u64 + 1);
            let (payload, ground_truth) = self.oracle.draw(next_round);
            let (_, frames) = engine.propose(payload, ground_truth, proposed_at)?;
            frames
        };
        for frame in &frames {
            deps.link.send(frame);
        }

        // Collect acks until the deadline, waking early once every
        // follower inside the mask has voted.
        let deadline = deps.clock.instant_at(proposed_at + self.config.vote_deadline);
        loop {
            if self.interrupted() {
                let aborted = deps.engine.lock().abort_round(deps.clock.now());
                if let Some(outcome) = aborted {
                    return Ok(outcome);
                }
                return Err(ExperimentError::Interrupted);
            }
            if deps.engine.lock().acks_complete(n_target) {
                break;
            }
            if !deps.waiter.wait_until(deadline) {
                break;
            }
        }

        // Lock order: peer table, then consensus state, then (at the call
        // site above) the outcome log.
        let peers = deps.peers.snapshot();
        let outcome = deps
            .engine
            .lock()
            .finalize_round(&peers, n_target, deps.clock.now())?;
        debug!(
            round = %outcome.round_id,
            n_eff = outcome.n_eff,
            committed = outcome.committed,
            latency_ms = outcome.latency_ms,
            "round complete"
        );
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Channel stabilization
    // ═══════════════════════════════════════════════════════════════════

    /// Block until the observed per-peer SNR settles near `target`.
    ///
    /// Requires both the minimum dwell and `stable_samples` consecutive
    /// in-tolerance samples on at least `min_peers` peers; gives up at the
    /// hard cap and lets the sweep continue.
    fn wait_snr_stable(&self, target: f32) -> bool {
        let start = self.deps.clock.now();
        let mut stable = 0u32;
        info!(target, "waiting for SNR stabilization");

        while !self.interrupted() {
            if self.deps.clock.now().saturating_sub(start) >= self.config.stabilize_cap {
                warn!(target, "SNR stabilization cap hit, continuing anyway");
                return false;
            }
            self.pause(self.config.sample_interval);

            let snapshot = self.deps.peers.snapshot();
            let in_tolerance = snapshot
                .iter()
                .filter(|p| {
                    p.liveness == Liveness::Alive
                        && (p.ewma_snr_db - target).abs() <= self.config.snr_tolerance
                })
                .count();

            if in_tolerance >= self.config.min_peers {
                stable += 1;
            } else {
                stable = 0;
            }
            debug!(target, in_tolerance, stable, "stabilization sample");

            if stable >= self.config.stable_samples
                && self.deps.clock.now().saturating_sub(start) >= self.config.stabilize_time
            {
                info!(target, "SNR stable");
                return true;
            }
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════
    // Broadcast helpers
    // ═══════════════════════════════════════════════════════════════════

    /// Reconfigure the local engine and announce the change. Sent a few
    /// times against loss; heartbeats echo the values from then on.
    fn broadcast_exp_begin(&self, target_snr: Option<f32>, p_node: Option<f64>) {
        {
            let mut engine = self.deps.engine.lock();
            engine.set_experiment_params(target_snr, p_node);
        }
        info!(?target_snr, ?p_node, "EXP_BEGIN");
        for _ in 0..3 {
            self.broadcast(Message::ExpBegin(ExpBeginBody {
                target_snr,
                p_node,
            }));
            self.pause(Duration::from_millis(50));
        }
    }

    fn broadcast(&self, msg: Message) {
        let term = self.deps.engine.lock().term();
        let frame = msg.into_frame(self.leader, None, term, None);
        self.deps.link.send(&frame);
    }

    fn pause(&self, duration: Duration) {
        if !self.interrupted() {
            std::thread::sleep(duration);
        }
    }

    fn interrupted(&self) -> bool {
        self.deps.shutdown.load(Ordering::Relaxed)
    }
}
