//! UDP socket pair and the receiver thread.

use crate::{Clock, InboundQueue, PeerTable};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{trace, warn};
use vraft_types::NodeId;
use vraft_wire::{decode, encode, Frame, MAX_FRAME_LEN};

/// Capacity of the inbound frame queue.
pub const INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Ingress read timeout; bounds how long shutdown can go unnoticed.
pub const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to bind ingress port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("socket setup failed: {0}")]
    Setup(#[from] io::Error),
}

/// Link configuration: the two app↔PHY data ports.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub id: NodeId,
    /// app → PHY port (egress, the "air" side).
    pub tx_port: u16,
    /// PHY → app port (ingress).
    pub rx_port: u16,
}

/// The per-node transport: an egress socket for sends and a reader thread
/// draining the ingress socket into the inbound queue.
///
/// The reader drops undecodable frames (counting them) and suppresses
/// echoes of this node's own transmissions, which the hub rebroadcasts to
/// everyone including the sender.
pub struct UdpLink {
    egress: UdpSocket,
    egress_addr: SocketAddr,
    decode_errors: Arc<AtomicU64>,
    reader: Option<JoinHandle<()>>,
}

impl UdpLink {
    /// Bind the ingress socket and start the reader thread.
    ///
    /// Bind failures are fatal at startup; everything after that degrades
    /// to logged drops.
    pub fn bind(
        config: LinkConfig,
        queue: Arc<InboundQueue>,
        peers: Arc<PeerTable>,
        clock: Clock,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, LinkError> {
        let ingress =
            UdpSocket::bind((Ipv4Addr::LOCALHOST, config.rx_port)).map_err(|source| {
                LinkError::Bind {
                    port: config.rx_port,
                    source,
                }
            })?;
        ingress.set_read_timeout(Some(READ_TIMEOUT))?;

        // Egress is send-only; bind to an ephemeral port.
        let egress = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let egress_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.tx_port));

        let decode_errors = Arc::new(AtomicU64::new(0));
        let reader = {
            let decode_errors = decode_errors.clone();
            let local_id = config.id;
            std::thread::Builder::new()
                .name(format!("recv-{}", local_id))
                .spawn(move || {
                    receiver_loop(
                        ingress,
                        local_id,
                        queue,
                        peers,
                        clock,
                        shutdown,
                        decode_errors,
                    )
                })?
        };

        Ok(Self {
            egress,
            egress_addr,
            decode_errors,
            reader: Some(reader),
        })
    }

    /// Encode and transmit a frame toward the PHY.
    ///
    /// Per-send failures are logged and the frame is dropped; the retry
    /// budget lives in the consensus layer, not here.
    pub fn send(&self, frame: &Frame) {
        let bytes = match encode(frame) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, kind = ?frame.meta.kind, "dropping unencodable frame");
                return;
            }
        };
        if let Err(e) = self.egress.send_to(&bytes, self.egress_addr) {
            warn!(error = %e, kind = ?frame.meta.kind, "send failed, frame dropped");
        }
    }

    /// Frames dropped on the receive path due to decode failures.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Wait for the reader thread to observe shutdown and exit.
    pub fn join(mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn receiver_loop(
    ingress: UdpSocket,
    local_id: NodeId,
    queue: Arc<InboundQueue>,
    peers: Arc<PeerTable>,
    clock: Clock,
    shutdown: Arc<AtomicBool>,
    decode_errors: Arc<AtomicU64>,
) {
    let mut buf = [0u8; MAX_FRAME_LEN + 4];
    while !shutdown.load(Ordering::Relaxed) {
        let n = match ingress.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "ingress receive error");
                continue;
            }
        };

        match decode(&buf[..n]) {
            Ok(frame) => {
                if frame.meta.src == local_id {
                    // Echo of our own broadcast.
                    continue;
                }
                trace!(
                    src = %frame.meta.src,
                    kind = ?frame.meta.kind,
                    snr = ?frame.meta.snr_db,
                    "frame received"
                );
                peers.observe(frame.meta.src, frame.meta.snr_db, clock.now());
                queue.push(frame);
            }
            Err(e) => {
                decode_errors.fetch_add(1, Ordering::Relaxed);
                trace!(error = %e, "dropping undecodable frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vraft_types::Term;
    use vraft_wire::{FrameMeta, MsgKind};

    fn test_frame(src: u8, snr: Option<f32>) -> Frame {
        Frame {
            meta: FrameMeta {
                src: NodeId(src),
                dst: None,
                term: Term(1),
                kind: MsgKind::Heartbeat,
                round_id: None,
                snr_db: snr,
            },
            payload: br#"{"target_snr":16.0,"p_node":1.0,"snr_report":{}}"#.to_vec(),
        }
    }

    /// Loopback pair: one link's egress feeds another socket we control,
    /// and we feed its ingress directly.
    #[test]
    fn test_send_and_receive_loopback() {
        let clock = Clock::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(InboundQueue::new(INBOUND_QUEUE_CAPACITY));
        let peers = Arc::new(PeerTable::new());

        // Stand-in for the PHY: capture egress traffic here.
        let phy = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        phy.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let phy_port = phy.local_addr().unwrap().port();

        // Find a free ingress port by binding then dropping.
        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let rx_port = probe.local_addr().unwrap().port();
        drop(probe);

        let link = UdpLink::bind(
            LinkConfig {
                id: NodeId(1),
                tx_port: phy_port,
                rx_port,
            },
            queue.clone(),
            peers.clone(),
            clock,
            shutdown.clone(),
        )
        .unwrap();

        // Outbound: frame shows up at the "PHY".
        link.send(&test_frame(1, None));
        let mut buf = [0u8; 2048];
        let n = phy.recv(&mut buf).unwrap();
        let got = decode(&buf[..n]).unwrap();
        assert_eq!(got.meta.src, NodeId(1));

        // Inbound: a peer frame with PHY-injected SNR lands in the queue
        // and the peer table.
        let bytes = encode(&test_frame(2, Some(11.0))).unwrap();
        phy.send_to(&bytes, (Ipv4Addr::LOCALHOST, rx_port)).unwrap();
        let frame = queue
            .pop_until(std::time::Instant::now() + Duration::from_secs(2))
            .expect("frame should arrive");
        assert_eq!(frame.meta.src, NodeId(2));
        assert_eq!(peers.snr_of(NodeId(2)), Some(11.0));

        // Inbound echo of our own frame is suppressed.
        let bytes = encode(&test_frame(1, Some(30.0))).unwrap();
        phy.send_to(&bytes, (Ipv4Addr::LOCALHOST, rx_port)).unwrap();
        // Garbage is dropped and counted, not propagated.
        phy.send_to(b"garbage", (Ipv4Addr::LOCALHOST, rx_port))
            .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert!(queue.is_empty());
        assert_eq!(link.decode_errors(), 1);

        shutdown.store(true, Ordering::Relaxed);
        link.join();
    }
}
