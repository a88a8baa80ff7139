//! Follower experiment role: gain servo and status reporting.
//!
//! The Bernoulli vote itself is a consensus-engine concern; what remains
//! on the follower is closing the loop on link quality. The leader
//! reports, in heartbeats and SNR reports, how it hears each follower;
//! the follower compares that to the current target and nudges its PHY
//! transmit gain through the local control endpoint.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use vraft_link::PhyControl;
use vraft_types::NodeId;
use vraft_wire::{FrameMeta, Message};

/// Proportional gain per dB of SNR error.
pub const GAIN_SLOPE: f32 = 0.02;
/// No adjustment inside this error band.
pub const DEAD_BAND_DB: f32 = 1.0;
/// Hold the gain if the leader has been silent this long.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(3);
/// How long to wait for the PHY to answer pings at startup.
pub const PHY_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// The proportional-with-clamp gain rule.
///
/// `new_gain = clamp(gain + 0.02 * (target - observed), 0.0, 1.0)`, with a
/// ±1 dB dead-band and a hold when the leader's report is stale.
#[derive(Debug, Clone, Copy)]
pub struct GainTuner {
    gain: f32,
    target_snr: f32,
    last_report: Option<(f32, Duration)>,
}

impl GainTuner {
    pub fn new(init_gain: f32, target_snr: f32) -> Self {
        Self {
            gain: init_gain.clamp(0.0, 1.0),
            target_snr,
            last_report: None,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn target_snr(&self) -> f32 {
        self.target_snr
    }

    pub fn set_target(&mut self, target_snr: f32) {
        self.target_snr = target_snr;
    }

    /// Record the leader-observed SNR of this follower.
    pub fn observe(&mut self, snr_db: f32, now: Duration) {
        self.last_report = Some((snr_db, now));
    }

    /// Compute the next gain, if an adjustment is due.
    ///
    /// Returns `None` to hold: no report yet, report stale, error inside
    /// the dead-band, or already pinned at a clamp boundary.
    pub fn propose(&self, now: Duration) -> Option<f32> {
        let (observed, at) = self.last_report?;
        if now.saturating_sub(at) > REPORT_TIMEOUT {
            return None;
        }
        let err = self.target_snr - observed;
        if err.abs() <= DEAD_BAND_DB {
            return None;
        }
        let new_gain = (self.gain + GAIN_SLOPE * err).clamp(0.0, 1.0);
        if (new_gain - self.gain).abs() < 1e-6 {
            return None;
        }
        Some(new_gain)
    }

    /// Accept a proposed (or commanded) gain as applied.
    pub fn commit(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }
}

/// Follower-side experiment duties.
pub struct FollowerRole {
    id: NodeId,
    /// `None` when running without a PHY (bench tests); adjustments are
    /// then tracked but not transmitted.
    ctrl: Option<PhyControl>,
    tuner: Mutex<GainTuner>,
}

impl FollowerRole {
    pub fn new(id: NodeId, ctrl: Option<PhyControl>, init_gain: f32, target_snr: f32) -> Self {
        Self {
            id,
            ctrl,
            tuner: Mutex::new(GainTuner::new(init_gain, target_snr)),
        }
    }

    /// PHY bring-up: ping until the control endpoint answers, then apply
    /// the initial gain. Failure is a warning: the node still joins the
    /// cluster, it just cannot steer its link.
    pub fn bring_up(&self, shutdown: &AtomicBool) {
        let Some(ctrl) = &self.ctrl else {
            return;
        };
        let started = std::time::Instant::now();
        while started.elapsed() < PHY_READY_TIMEOUT && !shutdown.load(Ordering::Relaxed) {
            match ctrl.ping() {
                Ok(()) => {
                    let gain = self.tuner.lock().gain();
                    info!(id = %self.id, gain, "PHY ready, applying initial gain");
                    if let Err(e) = ctrl.set_tx_gain(gain) {
                        warn!(error = %e, "initial gain set failed");
                    }
                    return;
                }
                Err(_) => std::thread::sleep(Duration::from_millis(500)),
            }
        }
        warn!(id = %self.id, "PHY control endpoint never answered, gain control disabled");
    }

    /// Consume experiment-relevant inbound traffic.
    pub fn handle(&self, _meta: &FrameMeta, msg: &Message, now: Duration) {
        match msg {
            Message::Heartbeat(body) => {
                let mut tuner = self.tuner.lock();
                tuner.set_target(body.target_snr);
                if let Some(&snr) = body.snr_report.get(&self.id) {
                    tuner.observe(snr, now);
                }
            }
            Message::SnrReport(body) => {
                let mut tuner = self.tuner.lock();
                tuner.set_target(body.target_snr);
                if let Some(&snr) = body.snr_report.get(&self.id) {
                    tuner.observe(snr, now);
                }
            }
            Message::ExpBegin(body) => {
                if let Some(target) = body.target_snr {
                    info!(id = %self.id, target, "experiment tier change");
                    self.tuner.lock().set_target(target);
                }
                if let Some(p) = body.p_node {
                    info!(id = %self.id, p_node = p, "trust probability change");
                }
            }
            Message::GainCmd { tx_gain } => {
                info!(id = %self.id, tx_gain, "gain override from leader");
                self.apply_gain(*tx_gain);
            }
            Message::ExpEnd => {
                info!(id = %self.id, "experiment ended");
            }
            _ => {}
        }
    }

    /// One pass of the 500 ms gain loop.
    pub fn gain_tick(&self, now: Duration) {
        let proposed = self.tuner.lock().propose(now);
        if let Some(gain) = proposed {
            self.apply_gain(gain);
        }
    }

    /// Periodic status line, mirroring the leader's cell progress.
    pub fn log_status(&self, votes_cast: u64, votes_granted: u64) {
        let tuner = self.tuner.lock();
        let observed = tuner.last_report.map(|(snr, _)| snr);
        info!(
            id = %self.id,
            gain = tuner.gain(),
            target_snr = tuner.target_snr(),
            observed_snr = ?observed,
            votes_cast,
            votes_granted,
            "follower status"
        );
    }

    pub fn current_gain(&self) -> f32 {
        self.tuner.lock().gain()
    }

    fn apply_gain(&self, gain: f32) {
        match &self.ctrl {
            Some(ctrl) => match ctrl.set_tx_gain(gain) {
                Ok(()) => {
                    self.tuner.lock().commit(gain);
                    debug!(id = %self.id, gain, "tx gain adjusted");
                }
                Err(e) => {
                    // Hold: the tracked gain only advances on success.
                    warn!(id = %self.id, error = %e, "gain set failed, holding");
                }
            },
            None => {
                self.tuner.lock().commit(gain);
                debug!(id = %self.id, gain, "tx gain adjusted (no PHY)");
            }
        }
    }
}
