//! Worker wiring and the node main loop.

use crate::cli::{NodeOptions, RoleOptions};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, trace};
use vraft_consensus::{AckPolicy, OutcomeLog, RaftConfig, RaftEngine, Role};
use vraft_experiment::{
    Controller, ControllerDeps, ExperimentError, FollowerRole, RoundWaiter,
};
use vraft_link::{
    Clock, ControlError, InboundQueue, LinkConfig, LinkError, PeerTable, PhyControl, UdpLink,
    INBOUND_QUEUE_CAPACITY,
};
use vraft_types::{Liveness, NodeId};
use vraft_wire::Message;

/// How long the engine driver blocks on the inbound queue per pass; also
/// the timer resolution for heartbeats and retries.
const ENGINE_WAIT: Duration = Duration::from_millis(50);

/// Peer-table liveness and SNR-report refresh cadence.
const TABLE_TICK: Duration = Duration::from_millis(250);

/// Gain servo cadence (follower).
const GAIN_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Run a node to completion.
///
/// The leader returns once the experiment finishes (or is interrupted),
/// with the artifact path. Followers run until the shutdown flag is set.
pub fn run_node(
    options: NodeOptions,
    shutdown: Arc<AtomicBool>,
) -> Result<Option<PathBuf>, NodeError> {
    let clock = Clock::new();
    let queue = Arc::new(InboundQueue::new(INBOUND_QUEUE_CAPACITY));
    let peers = Arc::new(PeerTable::new());
    let link = Arc::new(UdpLink::bind(
        LinkConfig {
            id: options.id,
            tx_port: options.tx_port,
            rx_port: options.rx_port,
        },
        queue.clone(),
        peers.clone(),
        clock,
        shutdown.clone(),
    )?);

    let mut raft = RaftConfig::new(options.id, options.total, options.leader_id)
        .with_vote_seed(options.vote_seed);

    let follower_role = match &options.role {
        RoleOptions::Follower(follower) => {
            raft = raft.with_ack_policy(AckPolicy::Bernoulli {
                p_node: follower.p_node,
            });
            let ctrl = match follower.ctrl_port {
                Some(port) => Some(PhyControl::connect(port)?),
                None => None,
            };
            Some(Arc::new(FollowerRole::new(
                options.id,
                ctrl,
                follower.init_gain,
                follower.target_snr,
            )))
        }
        RoleOptions::Leader(_) => None,
    };

    let engine = Arc::new(Mutex::new(RaftEngine::new(raft)));
    let waiter = Arc::new(RoundWaiter::new());
    let outcomes = Arc::new(Mutex::new(OutcomeLog::new()));

    let driver = {
        let queue = queue.clone();
        let engine = engine.clone();
        let peers = peers.clone();
        let link = link.clone();
        let waiter = waiter.clone();
        let role = follower_role.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name(format!("driver-{}", options.id))
            .spawn(move || driver_loop(queue, engine, peers, link, waiter, role, clock, shutdown))
            .map_err(LinkError::Setup)?
    };

    let result = match &options.role {
        RoleOptions::Leader(experiment) => {
            info!(id = %options.id, "running as experiment leader");
            let controller = Controller::new(
                experiment.clone(),
                ControllerDeps {
                    engine: engine.clone(),
                    peers: peers.clone(),
                    outcomes: outcomes.clone(),
                    link: link.clone(),
                    waiter: waiter.clone(),
                    clock,
                    shutdown: shutdown.clone(),
                },
            );
            let path = controller.run()?;
            // The sweep is done; wind the workers down.
            shutdown.store(true, Ordering::Relaxed);
            Ok(Some(path))
        }
        RoleOptions::Follower(follower) => {
            info!(id = %options.id, leader = %options.leader_id, "running as follower");
            let role = follower_role.clone().expect("follower role exists");
            role.bring_up(&shutdown);

            let gain_worker = {
                let role = role.clone();
                let shutdown = shutdown.clone();
                std::thread::Builder::new()
                    .name(format!("gain-{}", options.id))
                    .spawn(move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            std::thread::sleep(GAIN_TICK);
                            role.gain_tick(clock.now());
                        }
                    })
                    .map_err(LinkError::Setup)?
            };

            let mut last_status = clock.now();
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
                if clock.now().saturating_sub(last_status) >= follower.status_interval {
                    let (cast, granted) = {
                        let engine = engine.lock();
                        engine.vote_stats()
                    };
                    role.log_status(cast, granted);
                    last_status = clock.now();
                }
            }
            let _ = gain_worker.join();
            Ok(None)
        }
    };

    let _ = driver.join();
    if let Ok(link) = Arc::try_unwrap(link) {
        link.join();
    }
    result
}

/// The engine driver: drains the inbound queue into the engine, transmits
/// its output, and advances its timers. The round driver is woken after
/// every processed frame so ack arrival is observed promptly.
#[allow(clippy::too_many_arguments)]
fn driver_loop(
    queue: Arc<InboundQueue>,
    engine: Arc<Mutex<RaftEngine>>,
    peers: Arc<PeerTable>,
    link: Arc<UdpLink>,
    waiter: Arc<RoundWaiter>,
    role: Option<Arc<FollowerRole>>,
    clock: Clock,
    shutdown: Arc<AtomicBool>,
) {
    let mut next_table_tick = clock.now();

    while !shutdown.load(Ordering::Relaxed) {
        let now = clock.now();

        if now >= next_table_tick {
            peers.tick(now);
            // Snapshot before taking the engine lock (peer table first in
            // the lock order).
            let report: BTreeMap<NodeId, f32> = peers
                .snapshot()
                .iter()
                .filter(|p| p.liveness == Liveness::Alive)
                .map(|p| (p.id, p.ewma_snr_db))
                .collect();
            let mut eng = engine.lock();
            if eng.role() == Role::Leader {
                eng.update_snr_report(report);
            }
            drop(eng);
            next_table_tick = now + TABLE_TICK;
        }

        // Heartbeat, election, and retry timers are time-gated inside the
        // engine; driving them every pass costs nothing when idle.
        let frames = engine.lock().on_tick(now);
        for frame in &frames {
            link.send(frame);
        }

        let deadline = clock.instant_at(now + ENGINE_WAIT);
        let Some(frame) = queue.pop_until(deadline) else {
            continue;
        };
        let msg = match Message::from_frame(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                trace!(error = %e, kind = ?frame.meta.kind, "dropping frame with bad body");
                continue;
            }
        };

        let now = clock.now();
        let outbound = engine.lock().handle(&frame.meta, &msg, now);
        for frame in &outbound {
            link.send(frame);
        }
        if let Some(role) = &role {
            role.handle(&frame.meta, &msg, now);
        }
        waiter.notify();
    }
}
