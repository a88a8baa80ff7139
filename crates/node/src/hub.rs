//! Software broadcast hub.
//!
//! Emulates the wireless channel for bench runs: every datagram arriving
//! on the listen port is rebroadcast to all node ingress ports, with a
//! synthetic per-delivery SNR written into the frame metadata (exactly
//! where the real PHY writes its estimate), plus optional seeded packet
//! loss for lossy-channel experiments.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace};
use vraft_wire::{decode, encode, MAX_FRAME_LEN};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Port every node transmits to.
    pub listen_port: u16,
    /// Ingress ports of all nodes; each frame is delivered to all of them.
    pub node_ports: Vec<u16>,
    /// Mean injected SNR in dB.
    pub snr_mean: f32,
    /// Uniform jitter around the mean, in dB.
    pub snr_jitter: f32,
    /// Per-delivery drop probability.
    pub loss: f64,
    /// Seed for SNR jitter and loss draws.
    pub seed: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_port: 50000,
            node_ports: vec![],
            snr_mean: 16.0,
            snr_jitter: 1.0,
            loss: 0.0,
            seed: 1,
        }
    }
}

/// Forwarding statistics, reported on shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct HubStats {
    pub frames_in: u64,
    pub deliveries: u64,
    pub dropped: u64,
    pub undecodable: u64,
}

/// Run the hub until the shutdown flag is set.
pub fn run_hub(config: HubConfig, shutdown: &AtomicBool) -> io::Result<HubStats> {
    let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, config.listen_port))?;
    sock.set_read_timeout(Some(Duration::from_millis(50)))?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut stats = HubStats::default();

    info!(
        listen = config.listen_port,
        nodes = config.node_ports.len(),
        snr = config.snr_mean,
        loss = config.loss,
        "hub up"
    );

    let mut buf = [0u8; MAX_FRAME_LEN + 4];
    while !shutdown.load(Ordering::Relaxed) {
        let n = match sock.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => return Err(e),
        };
        stats.frames_in += 1;

        // Only well-formed frames get SNR metadata; anything else is
        // passed through untouched, like a real transparent channel.
        let frame = match decode(&buf[..n]) {
            Ok(frame) => frame,
            Err(_) => {
                stats.undecodable += 1;
                for &port in &config.node_ports {
                    let _ = sock.send_to(&buf[..n], (Ipv4Addr::LOCALHOST, port));
                }
                continue;
            }
        };

        for &port in &config.node_ports {
            if rng.gen::<f64>() < config.loss {
                stats.dropped += 1;
                trace!(port, kind = ?frame.meta.kind, "frame lost");
                continue;
            }
            let mut delivered = frame.clone();
            let jitter = (rng.gen::<f32>() * 2.0 - 1.0) * config.snr_jitter;
            delivered.meta.snr_db = Some(config.snr_mean + jitter);
            if let Ok(bytes) = encode(&delivered) {
                let _ = sock.send_to(&bytes, (Ipv4Addr::LOCALHOST, port));
                stats.deliveries += 1;
            }
        }
    }

    debug!(
        frames_in = stats.frames_in,
        deliveries = stats.deliveries,
        dropped = stats.dropped,
        "hub down"
    );
    Ok(stats)
}
