//! Consensus configuration.

use std::time::Duration;
use vraft_types::NodeId;

/// How a follower decides the `granted` bit of an append ack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AckPolicy {
    /// Plain Raft: grant iff the previous-entry check passes.
    Consistency,
    /// Reliability experiment: append unconditionally, grant with
    /// probability `p_node`. Independent of payload and log state.
    Bernoulli { p_node: f64 },
}

/// Configuration for the consensus engine.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's id.
    pub id: NodeId,
    /// Cluster size (ids run 1..=total_nodes).
    pub total_nodes: u8,
    /// The pinned leader. That node starts in the Leader role; elections
    /// only run if it goes silent.
    pub leader_id: NodeId,

    /// Leader heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Leader SNR-report cadence.
    pub snr_report_interval: Duration,
    /// Election timeout range; the concrete value is drawn per node,
    /// seeded by its id.
    pub election_timeout: (Duration, Duration),
    /// Interval between APPEND resends while follower acks are missing.
    pub append_retry_interval: Duration,
    /// Resend budget per round.
    pub append_max_retries: u32,

    /// Initial ack policy.
    pub ack_policy: AckPolicy,
    /// Seed for the vote RNG. Derived from node id + wall clock at
    /// process start; not cryptographically meaningful.
    pub vote_seed: u64,
}

impl RaftConfig {
    pub fn new(id: NodeId, total_nodes: u8, leader_id: NodeId) -> Self {
        Self {
            id,
            total_nodes,
            leader_id,
            heartbeat_interval: Duration::from_millis(150),
            snr_report_interval: Duration::from_millis(500),
            election_timeout: (Duration::from_millis(1500), Duration::from_millis(3000)),
            append_retry_interval: Duration::from_millis(150),
            append_max_retries: 3,
            ack_policy: AckPolicy::Consistency,
            vote_seed: id.0 as u64,
        }
    }

    /// Set the initial ack policy.
    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    /// Set the vote RNG seed.
    pub fn with_vote_seed(mut self, seed: u64) -> Self {
        self.vote_seed = seed;
        self
    }

    pub fn is_pinned_leader(&self) -> bool {
        self.id == self.leader_id
    }
}
