//! End-to-end tests: full node runtimes talking over real UDP through
//! the software hub.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_test::traced_test;
use vraft_experiment::{Artifact, ExperimentConfig};
use vraft_node::hub::{run_hub, HubConfig};
use vraft_node::{FollowerOptions, NodeOptions, RoleOptions};
use vraft_types::NodeId;
use vraft_wire::{decode, MsgKind};

fn free_port() -> u16 {
    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    port
}

fn follower_options(id: u8, total: u8, leader_id: u8, tx: u16, rx: u16) -> NodeOptions {
    NodeOptions {
        id: NodeId(id),
        total,
        leader_id: NodeId(leader_id),
        tx_port: tx,
        rx_port: rx,
        role: RoleOptions::Follower(FollowerOptions {
            ctrl_port: None,
            target_snr: 16.0,
            init_gain: 0.5,
            p_node: 1.0,
            status_interval: Duration::from_secs(5),
        }),
        vote_seed: 1000 + id as u64,
    }
}

/// Three nodes, one hub, one grid cell: the full propose → vote → commit
/// → artifact path over real sockets.
#[test]
#[traced_test]
fn three_node_cluster_completes_a_cell() {
    let hub_port = free_port();
    let rx: Vec<u16> = (0..3).map(|_| free_port()).collect();
    let output_dir = tempfile::tempdir().unwrap();

    let hub_shutdown = Arc::new(AtomicBool::new(false));
    let hub_handle = {
        let shutdown = hub_shutdown.clone();
        let node_ports = rx.clone();
        std::thread::spawn(move || {
            run_hub(
                HubConfig {
                    listen_port: hub_port,
                    node_ports,
                    snr_mean: 16.0,
                    snr_jitter: 0.5,
                    loss: 0.0,
                    seed: 3,
                },
                &shutdown,
            )
        })
    };

    let follower_shutdown = Arc::new(AtomicBool::new(false));
    let followers: Vec<_> = [2u8, 3]
        .into_iter()
        .map(|id| {
            let options = follower_options(id, 3, 1, hub_port, rx[(id - 1) as usize]);
            let shutdown = follower_shutdown.clone();
            std::thread::spawn(move || vraft_node::run_node(options, shutdown))
        })
        .collect();

    let leader_options = NodeOptions {
        id: NodeId(1),
        total: 3,
        leader_id: NodeId(1),
        tx_port: hub_port,
        rx_port: rx[0],
        role: RoleOptions::Leader(ExperimentConfig {
            snr_levels: vec![16.0],
            p_node_levels: vec![1.0],
            n_levels: vec![3],
            rounds_per_cell: 5,
            vote_deadline: Duration::from_millis(400),
            stabilize_time: Duration::from_millis(300),
            stabilize_cap: Duration::from_secs(20),
            min_peers: 2,
            seed: 7,
            output_dir: output_dir.path().to_path_buf(),
            ..ExperimentConfig::default()
        }),
        vote_seed: 999,
    };

    let leader_shutdown = Arc::new(AtomicBool::new(false));
    let artifact_path = vraft_node::run_node(leader_options, leader_shutdown)
        .expect("leader run")
        .expect("artifact path");

    follower_shutdown.store(true, Ordering::Relaxed);
    for follower in followers {
        follower.join().unwrap().unwrap();
    }
    hub_shutdown.store(true, Ordering::Relaxed);
    hub_handle.join().unwrap().unwrap();

    let artifact: Artifact =
        serde_json::from_str(&std::fs::read_to_string(&artifact_path).unwrap()).unwrap();

    assert_eq!(artifact.cells.len(), 1);
    assert_eq!(artifact.rounds.len(), 5);

    let cell = &artifact.cells[0];
    assert_eq!(cell.n, 3);
    assert_eq!(cell.rounds, 5);
    // Perfect trust on a clean channel: every round commits with both
    // followers on time.
    assert_eq!(cell.committed, 5, "cell: {:?}", cell);
    assert!((cell.mean_n_eff - 2.0).abs() < 1e-9);
    // Correctness equals the oracle coin; with 5 rounds anything goes,
    // but the invariant committed => (correct == ground truth) means
    // p_sys is a multiple of 1/5.
    assert!((0.0..=1.0).contains(&cell.p_sys));
    assert!(artifact.rounds.iter().all(|r| r.committed));
}

/// With the pinned leader absent, the followers detect the election
/// timeout and raise a new leader among themselves within seconds.
#[test]
#[traced_test]
fn followers_elect_new_leader_when_pinned_leader_is_absent() {
    let hub_port = free_port();
    // Two follower ingress ports plus one sniffer port for the test.
    let rx: Vec<u16> = (0..2).map(|_| free_port()).collect();
    let sniffer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    sniffer
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut node_ports = rx.clone();
    node_ports.push(sniffer.local_addr().unwrap().port());

    let hub_shutdown = Arc::new(AtomicBool::new(false));
    let hub_handle = {
        let shutdown = hub_shutdown.clone();
        std::thread::spawn(move || {
            run_hub(
                HubConfig {
                    listen_port: hub_port,
                    node_ports,
                    snr_mean: 16.0,
                    snr_jitter: 0.5,
                    loss: 0.0,
                    seed: 5,
                },
                &shutdown,
            )
        })
    };

    // Nodes 2 and 3 of a 3-node cluster; node 1 (the pinned leader)
    // never starts.
    let shutdown = Arc::new(AtomicBool::new(false));
    let followers: Vec<_> = [2u8, 3]
        .into_iter()
        .map(|id| {
            let options = follower_options(id, 3, 1, hub_port, rx[(id - 2) as usize]);
            let flag = shutdown.clone();
            std::thread::spawn(move || vraft_node::run_node(options, flag))
        })
        .collect();

    // Election floor is 1.5 s, ceiling 3 s, plus one message round trip;
    // a heartbeat from a new leader must appear well within 10 s.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut new_leader = None;
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline && new_leader.is_none() {
        let Ok(n) = sniffer.recv(&mut buf) else {
            continue;
        };
        if let Ok(frame) = decode(&buf[..n]) {
            if frame.meta.kind == MsgKind::Heartbeat && frame.meta.src != NodeId(1) {
                new_leader = Some(frame.meta.src);
            }
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    for follower in followers {
        follower.join().unwrap().unwrap();
    }
    hub_shutdown.store(true, Ordering::Relaxed);
    hub_handle.join().unwrap().unwrap();

    let leader = new_leader.expect("a new leader should have emerged");
    assert!(leader == NodeId(2) || leader == NodeId(3));
}
