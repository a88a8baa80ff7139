//! Peer table: last-seen timestamps, smoothed SNR, liveness.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use vraft_types::{Liveness, NodeId, PeerState};

/// EWMA smoothing factor for per-peer SNR: `0.3 * sample + 0.7 * prev`.
pub const EWMA_ALPHA: f32 = 0.3;

struct Entry {
    last_seen: Duration,
    ewma_snr_db: Option<f32>,
    liveness: Liveness,
}

/// Shared per-peer link-quality bookkeeping.
///
/// The receiver thread calls [`observe`](PeerTable::observe) on every
/// parseable inbound frame; the engine driver calls
/// [`tick`](PeerTable::tick) on its cadence to age liveness. Lock ordering
/// is peer table before consensus state before outcome log.
pub struct PeerTable {
    inner: Mutex<BTreeMap<NodeId, Entry>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record an inbound frame from `id`.
    ///
    /// `last_seen` is updated unconditionally; the SNR estimate only moves
    /// when the PHY attached one to the frame. The first sample seeds the
    /// EWMA directly.
    pub fn observe(&self, id: NodeId, snr_db: Option<f32>, now: Duration) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(id).or_insert(Entry {
            last_seen: now,
            ewma_snr_db: None,
            liveness: Liveness::Alive,
        });
        entry.last_seen = now;
        entry.liveness = Liveness::Alive;
        if let Some(sample) = snr_db {
            entry.ewma_snr_db = Some(match entry.ewma_snr_db {
                Some(prev) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev,
                None => sample,
            });
        }
    }

    /// Re-evaluate liveness from last-seen age.
    pub fn tick(&self, now: Duration) {
        let mut inner = self.inner.lock();
        for entry in inner.values_mut() {
            let age = now.saturating_sub(entry.last_seen);
            entry.liveness = Liveness::classify(age);
        }
    }

    /// Copy out the current table for the controller and the commit rule.
    pub fn snapshot(&self) -> Vec<PeerState> {
        let inner = self.inner.lock();
        inner
            .iter()
            .map(|(&id, e)| PeerState {
                id,
                last_seen: e.last_seen,
                ewma_snr_db: e.ewma_snr_db.unwrap_or(0.0),
                liveness: e.liveness,
            })
            .collect()
    }

    /// Smoothed SNR for one peer, if any sample has arrived.
    pub fn snr_of(&self, id: NodeId) -> Option<f32> {
        self.inner.lock().get(&id).and_then(|e| e.ewma_snr_db)
    }

    /// Peers currently classified Alive.
    pub fn alive_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|e| e.liveness == Liveness::Alive)
            .count()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
