//! The consensus state machine.

use crate::commit::weighted_commit;
use crate::config::{AckPolicy, RaftConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use vraft_types::{LogEntry, NodeId, PeerState, RoundId, RoundOutcome, Term};
use vraft_wire::{AppendBody, Frame, FrameMeta, HeartbeatBody, Message, SnrReportBody};

/// Consensus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("not the leader (current role {0:?})")]
    NotLeader(Role),

    #[error("a round is already in progress")]
    RoundInProgress,

    #[error("no open round to finalize")]
    NoOpenRound,

    #[error("outcome for {0} already recorded")]
    DuplicateRound(RoundId),
}

/// A follower ack as collected at the leader. First ack per voter wins;
/// retransmissions are identical because followers repeat their vote.
#[derive(Debug, Clone, Copy)]
struct AckVote {
    granted: bool,
    received_at: Duration,
}

/// Leader-side state of the round currently awaiting votes.
#[derive(Debug)]
struct OpenRound {
    round_id: RoundId,
    proposed_at: Duration,
    ground_truth: bool,
    /// Cached body for retransmission.
    body: AppendBody,
    votes: BTreeMap<NodeId, AckVote>,
    retries_used: u32,
    next_retry_at: Duration,
}

/// The Raft-style consensus engine.
///
/// Synchronous and deterministic: the runtime injects `now` and delivers
/// frames; the engine returns the frames to transmit. The leader role is
/// pinned by configuration, but the election path is complete so a leader
/// crash triggers a re-election.
pub struct RaftEngine {
    config: RaftConfig,
    role: Role,
    term: Term,
    /// Which candidate we granted a vote in which term. At most one
    /// grant per term; re-requests from the same candidate are repeated.
    voted_for: Option<(Term, NodeId)>,
    log: Vec<LogEntry>,
    commit_index: u64,
    open_round: Option<OpenRound>,
    /// Grants collected while campaigning (includes our own).
    votes_for_me: BTreeSet<NodeId>,
    /// Our vote on the most recent round we acked, repeated on retry.
    last_vote: Option<(RoundId, bool)>,
    /// Follower-side tally of votes cast (total, granted).
    votes_cast: u64,
    votes_granted: u64,

    election_deadline: Duration,
    next_heartbeat_at: Duration,
    next_snr_report_at: Duration,

    target_snr: f32,
    p_node: f64,
    ack_policy: AckPolicy,
    /// Leader's per-peer EWMA SNR map, refreshed by the runtime from the
    /// peer table and echoed in heartbeats.
    snr_report: BTreeMap<NodeId, f32>,

    /// Bernoulli draws (follower acks and the leader's self-vote).
    vote_rng: ChaCha8Rng,
    /// Election timeout jitter, seeded by node id.
    jitter_rng: ChaCha8Rng,
}

impl RaftEngine {
    pub fn new(config: RaftConfig) -> Self {
        let role = if config.is_pinned_leader() {
            Role::Leader
        } else {
            Role::Follower
        };
        let p_node = match config.ack_policy {
            AckPolicy::Bernoulli { p_node } => p_node,
            AckPolicy::Consistency => 1.0,
        };
        let mut jitter_rng = ChaCha8Rng::seed_from_u64(config.id.0 as u64);
        let election_deadline = draw_timeout(&mut jitter_rng, config.election_timeout);
        let vote_rng = ChaCha8Rng::seed_from_u64(config.vote_seed);

        info!(id = %config.id, ?role, total = config.total_nodes, "consensus engine ready");

        Self {
            role,
            term: Term(1),
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            open_round: None,
            votes_for_me: BTreeSet::new(),
            last_vote: None,
            votes_cast: 0,
            votes_granted: 0,
            election_deadline,
            next_heartbeat_at: Duration::ZERO,
            next_snr_report_at: Duration::ZERO,
            target_snr: 16.0,
            p_node,
            ack_policy: config.ack_policy,
            snr_report: BTreeMap::new(),
            vote_rng,
            jitter_rng,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn id(&self) -> NodeId {
        self.config.id
    }

    pub fn total_nodes(&self) -> u8 {
        self.config.total_nodes
    }

    pub fn p_node(&self) -> f64 {
        self.p_node
    }

    pub fn target_snr(&self) -> f32 {
        self.target_snr
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn current_round(&self) -> Option<RoundId> {
        self.open_round.as_ref().map(|r| r.round_id)
    }

    /// Follower vote tally as `(cast, granted)`.
    pub fn vote_stats(&self) -> (u64, u64) {
        (self.votes_cast, self.votes_granted)
    }

    /// Refresh the SNR map echoed in heartbeats and reports (leader side).
    pub fn update_snr_report(&mut self, report: BTreeMap<NodeId, f32>) {
        self.snr_report = report;
    }

    /// Adopt new experiment parameters; used both when the controller
    /// reconfigures the local leader and when a follower hears EXP_BEGIN.
    pub fn set_experiment_params(&mut self, target_snr: Option<f32>, p_node: Option<f64>) {
        if let Some(snr) = target_snr {
            if (snr - self.target_snr).abs() > 0.1 {
                debug!(from = self.target_snr, to = snr, "target SNR updated");
            }
            self.target_snr = snr;
        }
        if let Some(p) = p_node {
            if (p - self.p_node).abs() > 1e-3 {
                debug!(from = self.p_node, to = p, "p_node updated");
            }
            self.p_node = p;
            if matches!(self.ack_policy, AckPolicy::Bernoulli { .. }) {
                self.ack_policy = AckPolicy::Bernoulli { p_node: p };
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Inbound frames
    // ═══════════════════════════════════════════════════════════════════

    /// Process one inbound frame.
    ///
    /// Term handling first, on every kind: a higher term is adopted (and a
    /// Leader or Candidate steps down) before the message is considered; a
    /// lower term discards the message outright.
    pub fn handle(&mut self, meta: &FrameMeta, msg: &Message, now: Duration) -> Vec<Frame> {
        if meta.term > self.term {
            debug!(
                id = %self.config.id,
                observed = %meta.term,
                ours = %self.term,
                src = %meta.src,
                "adopting higher term"
            );
            self.term = meta.term;
            self.voted_for = None;
            if self.role != Role::Follower {
                warn!(id = %self.config.id, term = %self.term, "stepping down");
                self.role = Role::Follower;
                self.open_round = None;
            }
            self.reset_election_timer(now);
        } else if meta.term < self.term {
            trace!(src = %meta.src, stale = %meta.term, "discarding stale-term frame");
            return Vec::new();
        }

        match msg {
            Message::RequestVote {
                last_log_index,
                last_log_term,
            } => self.on_request_vote(meta.src, *last_log_index, *last_log_term, now),
            Message::Vote { granted } => self.on_vote(meta.src, *granted, now),
            Message::Append(body) => self.on_append(meta, body, now),
            Message::AppendAck { index, granted } => {
                self.on_append_ack(meta, *index, *granted, now);
                Vec::new()
            }
            Message::Heartbeat(body) => {
                self.on_leader_contact(now);
                self.set_experiment_params(Some(body.target_snr), Some(body.p_node));
                if self.role == Role::Follower {
                    // Keepalive echo: gives the leader's PHY a frame to
                    // measure this node on between rounds. Carries no
                    // round id, so it is never counted as a vote.
                    vec![Message::AppendAck {
                        index: self.commit_index,
                        granted: true,
                    }
                    .into_frame(self.config.id, Some(meta.src), self.term, None)]
                } else {
                    Vec::new()
                }
            }
            Message::SnrReport(body) => {
                self.set_experiment_params(Some(body.target_snr), None);
                Vec::new()
            }
            Message::ExpBegin(body) => {
                self.set_experiment_params(body.target_snr, body.p_node);
                Vec::new()
            }
            // Gain commands and experiment teardown are the follower
            // role's business, not the log's.
            Message::GainCmd { .. } | Message::ExpEnd => Vec::new(),
        }
    }

    fn on_request_vote(
        &mut self,
        candidate: NodeId,
        last_log_index: u64,
        last_log_term: Term,
        now: Duration,
    ) -> Vec<Frame> {
        let my_last_term = self.log.last().map(|e| e.term).unwrap_or(Term::ZERO);
        let my_last_index = self.log.last().map(|e| e.index).unwrap_or(0);
        let log_ok = (last_log_term, last_log_index) >= (my_last_term, my_last_index);
        let not_yet_voted = match self.voted_for {
            Some((t, c)) => t != self.term || c == candidate,
            None => true,
        };
        let granted = log_ok && not_yet_voted && self.role == Role::Follower;

        if granted {
            self.voted_for = Some((self.term, candidate));
            self.reset_election_timer(now);
            info!(id = %self.config.id, %candidate, term = %self.term, "vote granted");
        } else {
            debug!(id = %self.config.id, %candidate, log_ok, not_yet_voted, "vote denied");
        }

        vec![Message::Vote { granted }.into_frame(self.config.id, Some(candidate), self.term, None)]
    }

    fn on_vote(&mut self, voter: NodeId, granted: bool, now: Duration) -> Vec<Frame> {
        if self.role != Role::Candidate || !granted {
            return Vec::new();
        }
        self.votes_for_me.insert(voter);
        debug!(
            id = %self.config.id,
            votes = self.votes_for_me.len(),
            total = self.config.total_nodes,
            "grant received"
        );
        if self.votes_for_me.len() > self.config.total_nodes as usize / 2 {
            return self.become_leader(now);
        }
        Vec::new()
    }

    fn on_append(&mut self, meta: &FrameMeta, body: &AppendBody, now: Duration) -> Vec<Frame> {
        self.on_leader_contact(now);
        self.set_experiment_params(Some(body.target_snr), Some(body.p_node));

        // Pure keepalive: nothing to vote on.
        if body.entries.is_empty() && meta.round_id.is_none() {
            return Vec::new();
        }

        let round_id = meta.round_id.unwrap_or_else(|| {
            RoundId(body.entries.last().map(|e| e.index).unwrap_or(0))
        });

        // A retransmission of a round we already voted on gets the same
        // answer; a vote, once cast, is never re-rolled.
        if let Some((voted_round, granted)) = self.last_vote {
            if voted_round == round_id {
                return vec![self.make_ack(meta.src, round_id, granted)];
            }
        }

        let granted = match self.ack_policy {
            AckPolicy::Consistency => {
                let prev_ok = body.prev_index == self.log.last().map(|e| e.index).unwrap_or(0)
                    && body.prev_term == self.log.last().map(|e| e.term).unwrap_or(Term::ZERO);
                if prev_ok {
                    self.append_new_entries(&body.entries);
                }
                prev_ok
            }
            AckPolicy::Bernoulli { p_node } => {
                // Reception alone proves the link; the entry is appended
                // unconditionally and only the vote is randomized.
                self.append_new_entries(&body.entries);
                self.vote_rng.gen::<f64>() < p_node
            }
        };

        self.last_vote = Some((round_id, granted));
        self.votes_cast += 1;
        if granted {
            self.votes_granted += 1;
        }
        trace!(id = %self.config.id, %round_id, granted, "append vote cast");
        vec![self.make_ack(meta.src, round_id, granted)]
    }

    fn append_new_entries(&mut self, entries: &[LogEntry]) {
        let last = self.log.last().map(|e| e.index).unwrap_or(0);
        for entry in entries.iter().filter(|e| e.index > last) {
            self.log.push(entry.clone());
        }
    }

    fn on_append_ack(&mut self, meta: &FrameMeta, index: u64, granted: bool, now: Duration) {
        if self.role != Role::Leader {
            return;
        }
        let Some(open) = &mut self.open_round else {
            trace!(src = %meta.src, index, "ack with no open round or keepalive echo");
            return;
        };
        if meta.round_id != Some(open.round_id) {
            trace!(src = %meta.src, got = ?meta.round_id, want = %open.round_id, "stale ack");
            return;
        }
        open.votes.entry(meta.src).or_insert(AckVote {
            granted,
            received_at: now,
        });
        trace!(
            src = %meta.src,
            round = %open.round_id,
            granted,
            acks = open.votes.len(),
            "vote recorded"
        );
    }

    fn on_leader_contact(&mut self, now: Duration) {
        if self.role == Role::Candidate {
            debug!(id = %self.config.id, "leader exists, abandoning candidacy");
            self.role = Role::Follower;
        }
        self.reset_election_timer(now);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════

    /// Advance heartbeat, election, and retry timers to `now`.
    pub fn on_tick(&mut self, now: Duration) -> Vec<Frame> {
        let mut out = Vec::new();
        match self.role {
            Role::Leader => {
                if now >= self.next_heartbeat_at {
                    out.push(self.make_heartbeat());
                    self.next_heartbeat_at = now + self.config.heartbeat_interval;
                }
                if now >= self.next_snr_report_at {
                    if !self.snr_report.is_empty() {
                        out.push(self.make_snr_report());
                    }
                    self.next_snr_report_at = now + self.config.snr_report_interval;
                }
                if let Some(frame) = self.maybe_retry_append(now) {
                    out.push(frame);
                }
            }
            Role::Follower | Role::Candidate => {
                if now >= self.election_deadline {
                    out.extend(self.start_election(now));
                }
            }
        }
        out
    }

    fn maybe_retry_append(&mut self, now: Duration) -> Option<Frame> {
        let open = self.open_round.as_mut()?;
        let missing = (open.votes.len() as u8) < self.config.total_nodes.saturating_sub(1);
        if !missing || now < open.next_retry_at || open.retries_used >= self.config.append_max_retries
        {
            return None;
        }
        open.retries_used += 1;
        open.next_retry_at = now + self.config.append_retry_interval;
        debug!(
            round = %open.round_id,
            attempt = open.retries_used,
            acks = open.votes.len(),
            "resending append"
        );
        Some(
            Message::Append(open.body.clone()).into_frame(
                self.config.id,
                None,
                self.term,
                Some(open.round_id),
            ),
        )
    }

    fn start_election(&mut self, now: Duration) -> Vec<Frame> {
        self.term = self.term.next();
        self.role = Role::Candidate;
        self.voted_for = Some((self.term, self.config.id));
        self.votes_for_me = BTreeSet::from([self.config.id]);
        self.reset_election_timer(now);

        info!(id = %self.config.id, term = %self.term, "election timeout, campaigning");

        let mut out = Vec::new();
        // A one-node cluster elects itself on the spot.
        if self.votes_for_me.len() > self.config.total_nodes as usize / 2 {
            out.extend(self.become_leader(now));
            return out;
        }

        let last_log_index = self.log.last().map(|e| e.index).unwrap_or(0);
        let last_log_term = self.log.last().map(|e| e.term).unwrap_or(Term::ZERO);
        out.push(
            Message::RequestVote {
                last_log_index,
                last_log_term,
            }
            .into_frame(self.config.id, None, self.term, None),
        );
        out
    }

    fn become_leader(&mut self, now: Duration) -> Vec<Frame> {
        info!(id = %self.config.id, term = %self.term, "elected leader");
        self.role = Role::Leader;
        self.open_round = None;
        self.next_heartbeat_at = now + self.config.heartbeat_interval;
        self.next_snr_report_at = now + self.config.snr_report_interval;
        vec![self.make_heartbeat()]
    }

    fn reset_election_timer(&mut self, now: Duration) {
        self.election_deadline =
            now + draw_timeout(&mut self.jitter_rng, self.config.election_timeout);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Leader round lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Open a voting round: append locally, broadcast the entry.
    ///
    /// The oracle bit stays in the local log entry; the broadcast body
    /// never carries it. Rounds are strictly serial; proposing while one
    /// is open is an error.
    pub fn propose(
        &mut self,
        payload: Vec<u8>,
        ground_truth: bool,
        now: Duration,
    ) -> Result<(RoundId, Vec<Frame>), ConsensusError> {
        if self.role != Role::Leader {
            return Err(ConsensusError::NotLeader(self.role));
        }
        if self.open_round.is_some() {
            return Err(ConsensusError::RoundInProgress);
        }

        let prev_index = self.log.last().map(|e| e.index).unwrap_or(0);
        let prev_term = self.log.last().map(|e| e.term).unwrap_or(Term::ZERO);
        let index = prev_index + 1;
        let round_id = RoundId(index);

        let mut local = LogEntry::new(index, self.term, payload.clone());
        local.ground_truth = Some(ground_truth);
        self.log.push(local);

        let body = AppendBody {
            prev_index,
            prev_term,
            entries: vec![LogEntry::new(index, self.term, payload)],
            target_snr: self.target_snr,
            p_node: self.p_node,
        };
        self.open_round = Some(OpenRound {
            round_id,
            proposed_at: now,
            ground_truth,
            body: body.clone(),
            votes: BTreeMap::new(),
            retries_used: 0,
            next_retry_at: now + self.config.append_retry_interval,
        });

        debug!(id = %self.config.id, %round_id, term = %self.term, "round proposed");

        let frame =
            Message::Append(body).into_frame(self.config.id, None, self.term, Some(round_id));
        Ok((round_id, vec![frame]))
    }

    /// Number of follower acks collected for the open round.
    pub fn ack_count(&self) -> usize {
        self.open_round.as_ref().map(|r| r.votes.len()).unwrap_or(0)
    }

    /// Whether every follower inside the size mask has voted.
    pub fn acks_complete(&self, n_target: u8) -> bool {
        let Some(open) = &self.open_round else {
            return true;
        };
        let expected = (1..=n_target.min(self.config.total_nodes))
            .filter(|&i| NodeId(i) != self.config.id)
            .count();
        open.votes.keys().filter(|v| v.0 <= n_target).count() >= expected
    }

    /// Close the open round with the weighted commit rule.
    ///
    /// Voters are the on-time followers with `id <= n_target`, weighted by
    /// their peer-table SNR, plus the leader itself with a virtual SNR
    /// 2 dB above the best follower. The leader casts one more
    /// Bernoulli(p_node) trial as its own vote.
    pub fn finalize_round(
        &mut self,
        peers: &[PeerState],
        n_target: u8,
        now: Duration,
    ) -> Result<RoundOutcome, ConsensusError> {
        let open = self.open_round.take().ok_or(ConsensusError::NoOpenRound)?;

        let snr_of = |id: NodeId| {
            peers
                .iter()
                .find(|p| p.id == id)
                .map(|p| p.ewma_snr_db)
                .unwrap_or(0.0)
        };

        let mut voters: Vec<(bool, f32)> = Vec::new();
        let mut last_ack: Option<Duration> = None;
        for (&voter, ack) in &open.votes {
            if voter.0 <= n_target {
                voters.push((ack.granted, snr_of(voter)));
                last_ack = Some(last_ack.map_or(ack.received_at, |t| t.max(ack.received_at)));
            }
        }
        let n_eff = voters.len() as u32;

        let best_follower_snr = voters
            .iter()
            .map(|&(_, snr)| snr)
            .fold(f32::NEG_INFINITY, f32::max);
        let leader_snr = if voters.is_empty() {
            self.target_snr + 2.0
        } else {
            best_follower_snr + 2.0
        };
        let leader_vote = self.vote_rng.gen::<f64>() < self.p_node;
        voters.push((leader_vote, leader_snr));

        let decision = weighted_commit(&voters);
        if decision.committed {
            self.commit_index = open.round_id.0;
        }
        let correct = decision.committed == open.ground_truth;
        let latency = last_ack.unwrap_or(now).saturating_sub(open.proposed_at);

        debug!(
            round = %open.round_id,
            n_eff,
            w_yes = decision.w_yes,
            w_total = decision.w_total,
            committed = decision.committed,
            correct,
            "round finalized"
        );

        Ok(RoundOutcome {
            round_id: open.round_id,
            n_eff,
            weighted_yes: decision.w_yes,
            weighted_total: decision.w_total,
            committed: decision.committed,
            correct,
            latency_ms: latency.as_secs_f32() * 1000.0,
        })
    }

    /// Abort the open round (shutdown path): recorded as uncommitted.
    pub fn abort_round(&mut self, now: Duration) -> Option<RoundOutcome> {
        let open = self.open_round.take()?;
        warn!(round = %open.round_id, "round aborted");
        Some(RoundOutcome {
            round_id: open.round_id,
            n_eff: 0,
            weighted_yes: 0.0,
            weighted_total: 0.0,
            committed: false,
            // Scored like any other round: an uncommitted verdict matches
            // the oracle exactly when the oracle said no.
            correct: !open.ground_truth,
            latency_ms: now.saturating_sub(open.proposed_at).as_secs_f32() * 1000.0,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Frame construction
    // ═══════════════════════════════════════════════════════════════════

    fn make_heartbeat(&self) -> Frame {
        Message::Heartbeat(HeartbeatBody {
            target_snr: self.target_snr,
            p_node: self.p_node,
            snr_report: self.snr_report.clone(),
        })
        .into_frame(self.config.id, None, self.term, None)
    }

    fn make_snr_report(&self) -> Frame {
        Message::SnrReport(SnrReportBody {
            snr_report: self.snr_report.clone(),
            target_snr: self.target_snr,
        })
        .into_frame(self.config.id, None, self.term, None)
    }

    fn make_ack(&self, leader: NodeId, round_id: RoundId, granted: bool) -> Frame {
        Message::AppendAck {
            index: round_id.0,
            granted,
        }
        .into_frame(self.config.id, Some(leader), self.term, Some(round_id))
    }
}

fn draw_timeout(rng: &mut ChaCha8Rng, range: (Duration, Duration)) -> Duration {
    let (lo, hi) = range;
    Duration::from_secs_f64(rng.gen_range(lo.as_secs_f64()..hi.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vraft_wire::MsgKind;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn leader_engine(total: u8) -> RaftEngine {
        RaftEngine::new(RaftConfig::new(NodeId(1), total, NodeId(1)))
    }

    fn follower_engine(id: u8, total: u8) -> RaftEngine {
        RaftEngine::new(RaftConfig::new(NodeId(id), total, NodeId(1)))
    }

    fn meta_from(src: u8, term: u64, round_id: Option<u64>, kind: MsgKind) -> FrameMeta {
        FrameMeta {
            src: NodeId(src),
            dst: None,
            term: Term(term),
            kind,
            round_id: round_id.map(RoundId),
            snr_db: None,
        }
    }

    fn heartbeat_msg() -> Message {
        Message::Heartbeat(HeartbeatBody {
            target_snr: 16.0,
            p_node: 1.0,
            snr_report: BTreeMap::new(),
        })
    }

    fn append_msg(prev_index: u64, index: u64, term: u64) -> Message {
        append_msg_p(prev_index, index, term, 1.0)
    }

    fn append_msg_p(prev_index: u64, index: u64, term: u64, p_node: f64) -> Message {
        Message::Append(AppendBody {
            prev_index,
            prev_term: if prev_index == 0 { Term::ZERO } else { Term(term) },
            entries: vec![LogEntry::new(index, Term(term), b"DECISION".to_vec())],
            target_snr: 16.0,
            p_node,
        })
    }

    fn peer(id: u8, snr: f32) -> PeerState {
        PeerState {
            id: NodeId(id),
            last_seen: Duration::ZERO,
            ewma_snr_db: snr,
            liveness: vraft_types::Liveness::Alive,
        }
    }

    #[test]
    fn test_pinned_leader_heartbeats_on_tick() {
        let mut engine = leader_engine(3);
        let frames = engine.on_tick(ms(0));
        assert!(frames
            .iter()
            .any(|f| f.meta.kind == MsgKind::Heartbeat));

        // Not due again until the interval elapses.
        assert!(engine.on_tick(ms(50)).is_empty());
        let frames = engine.on_tick(ms(150));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].meta.kind, MsgKind::Heartbeat);
    }

    #[test]
    fn test_follower_election_timeout() {
        let mut engine = follower_engine(2, 3);
        assert_eq!(engine.role(), Role::Follower);

        // Quiet ticks before the timeout do nothing.
        assert!(engine.on_tick(ms(1000)).is_empty());

        // Past the 3 s ceiling the node must have campaigned.
        let frames = engine.on_tick(ms(3001));
        assert_eq!(engine.role(), Role::Candidate);
        assert_eq!(engine.term(), Term(2));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].meta.kind, MsgKind::RequestVote);
    }

    #[test]
    fn test_heartbeat_defers_election() {
        let mut engine = follower_engine(2, 3);
        // Regular leader contact keeps the follower a follower forever.
        for t in (0..40u64).map(|i| i * 150) {
            engine.handle(&meta_from(1, 1, None, MsgKind::Heartbeat), &heartbeat_msg(), ms(t));
            assert!(engine.on_tick(ms(t + 1)).is_empty());
        }
        assert_eq!(engine.role(), Role::Follower);
    }

    #[test]
    fn test_heartbeat_echo_is_not_a_vote() {
        let mut follower = follower_engine(2, 3);
        let echo = follower.handle(
            &meta_from(1, 1, None, MsgKind::Heartbeat),
            &heartbeat_msg(),
            ms(10),
        );
        // The follower echoes a keepalive ack without a round id.
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0].meta.kind, MsgKind::AppendAck);
        assert_eq!(echo[0].meta.round_id, None);

        // Delivered to a leader with an open round, it is not recorded.
        let mut leader = leader_engine(3);
        leader.propose(b"a".to_vec(), true, ms(0)).unwrap();
        let msg = Message::from_frame(&echo[0]).unwrap();
        leader.handle(&echo[0].meta, &msg, ms(20));
        assert_eq!(leader.ack_count(), 0);
    }

    #[test]
    fn test_election_completes_with_majority() {
        let mut engine = follower_engine(2, 3);
        engine.on_tick(ms(3001));
        assert_eq!(engine.role(), Role::Candidate);

        // One grant plus our own vote is 2 of 3.
        let frames = engine.handle(
            &meta_from(3, 2, None, MsgKind::Vote),
            &Message::Vote { granted: true },
            ms(3050),
        );
        assert_eq!(engine.role(), Role::Leader);
        assert!(frames.iter().any(|f| f.meta.kind == MsgKind::Heartbeat));
    }

    #[test]
    fn test_at_most_one_grant_per_term() {
        let mut engine = follower_engine(3, 3);
        let req = Message::RequestVote {
            last_log_index: 0,
            last_log_term: Term::ZERO,
        };

        let reply = engine.handle(&meta_from(2, 2, None, MsgKind::RequestVote), &req, ms(10));
        assert_eq!(
            Message::from_frame(&reply[0]).unwrap(),
            Message::Vote { granted: true }
        );

        // A different candidate in the same term is denied.
        let reply = engine.handle(&meta_from(4, 2, None, MsgKind::RequestVote), &req, ms(20));
        assert_eq!(
            Message::from_frame(&reply[0]).unwrap(),
            Message::Vote { granted: false }
        );

        // The original candidate asking again is granted again.
        let reply = engine.handle(&meta_from(2, 2, None, MsgKind::RequestVote), &req, ms(30));
        assert_eq!(
            Message::from_frame(&reply[0]).unwrap(),
            Message::Vote { granted: true }
        );
    }

    #[test]
    fn test_vote_denied_for_shorter_log() {
        let mut engine = follower_engine(2, 3);
        // Give the voter one entry.
        engine.handle(
            &meta_from(1, 1, Some(1), MsgKind::Append),
            &append_msg(0, 1, 1),
            ms(10),
        );

        let reply = engine.handle(
            &meta_from(3, 2, None, MsgKind::RequestVote),
            &Message::RequestVote {
                last_log_index: 0,
                last_log_term: Term::ZERO,
            },
            ms(20),
        );
        assert_eq!(
            Message::from_frame(&reply[0]).unwrap(),
            Message::Vote { granted: false }
        );
    }

    #[test]
    fn test_higher_term_steps_leader_down() {
        let mut engine = leader_engine(3);
        engine.handle(&meta_from(2, 5, None, MsgKind::Heartbeat), &heartbeat_msg(), ms(10));
        assert_eq!(engine.role(), Role::Follower);
        assert_eq!(engine.term(), Term(5));
    }

    #[test]
    fn test_stale_term_discarded() {
        let mut engine = leader_engine(3);
        engine.handle(&meta_from(2, 9, None, MsgKind::Heartbeat), &heartbeat_msg(), ms(10));
        let term_before = engine.term();

        // Frames from an older term change nothing and draw no reply.
        let out = engine.handle(
            &meta_from(3, 1, Some(1), MsgKind::Append),
            &append_msg(0, 1, 1),
            ms(20),
        );
        assert!(out.is_empty());
        assert_eq!(engine.term(), term_before);
        assert_eq!(engine.log_len(), 0);
    }

    #[test]
    fn test_term_monotone_under_any_input() {
        let mut engine = follower_engine(2, 3);
        let mut highest = engine.term();
        for (src, term) in [(1u8, 1u64), (3, 4), (1, 2), (4, 4), (3, 7), (1, 1)] {
            engine.handle(
                &meta_from(src, term, None, MsgKind::Heartbeat),
                &heartbeat_msg(),
                ms(term * 10),
            );
            assert!(engine.term() >= highest, "term regressed");
            highest = engine.term();
        }
        assert_eq!(highest, Term(7));
    }

    #[test]
    fn test_propose_collect_finalize_commits() {
        let mut engine = leader_engine(3);
        engine.set_experiment_params(None, Some(1.0));

        let (round_id, frames) = engine.propose(b"DECISION_1".to_vec(), true, ms(0)).unwrap();
        assert_eq!(round_id, RoundId(1));
        assert_eq!(frames[0].meta.kind, MsgKind::Append);

        for (src, at) in [(2u8, 40u64), (3, 60)] {
            engine.handle(
                &meta_from(src, 1, Some(1), MsgKind::AppendAck),
                &Message::AppendAck {
                    index: 1,
                    granted: true,
                },
                ms(at),
            );
        }
        assert!(engine.acks_complete(3));

        let peers = [peer(2, 20.0), peer(3, 19.0)];
        let outcome = engine.finalize_round(&peers, 3, ms(500)).unwrap();
        assert!(outcome.committed);
        assert!(outcome.correct); // ground_truth was true
        assert_eq!(outcome.n_eff, 2);
        assert_eq!(engine.commit_index(), 1);
        assert!((outcome.latency_ms - 60.0).abs() < 1.0);
    }

    #[test]
    fn test_commit_vs_ground_truth_scoring() {
        // All-grant cluster commits every round; correctness tracks the
        // oracle bit exactly.
        let mut engine = leader_engine(3);
        engine.set_experiment_params(None, Some(1.0));
        let peers = [peer(2, 20.0), peer(3, 19.0)];

        for (round, gt) in [(1u64, true), (2, false)] {
            let (rid, _) = engine.propose(b"D".to_vec(), gt, ms(round * 1000)).unwrap();
            for src in [2u8, 3] {
                engine.handle(
                    &meta_from(src, 1, Some(rid.0), MsgKind::AppendAck),
                    &Message::AppendAck {
                        index: rid.0,
                        granted: true,
                    },
                    ms(round * 1000 + 50),
                );
            }
            let outcome = engine.finalize_round(&peers, 3, ms(round * 1000 + 500)).unwrap();
            assert!(outcome.committed);
            assert_eq!(outcome.correct, gt);
        }
    }

    #[test]
    fn test_rounds_strictly_serial() {
        let mut engine = leader_engine(3);
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();
        assert!(matches!(
            engine.propose(b"b".to_vec(), true, ms(10)),
            Err(ConsensusError::RoundInProgress)
        ));
    }

    #[test]
    fn test_append_retries_capped_at_three() {
        let mut engine = leader_engine(3);
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();

        let mut resends = 0;
        for t in (0..10u64).map(|i| 150 * (i + 1)) {
            resends += engine
                .on_tick(ms(t))
                .iter()
                .filter(|f| f.meta.kind == MsgKind::Append)
                .count();
        }
        assert_eq!(resends, 3);
    }

    #[test]
    fn test_no_retry_once_all_acked() {
        let mut engine = leader_engine(2);
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();
        engine.handle(
            &meta_from(2, 1, Some(1), MsgKind::AppendAck),
            &Message::AppendAck {
                index: 1,
                granted: true,
            },
            ms(20),
        );
        let appends = engine
            .on_tick(ms(160))
            .iter()
            .filter(|f| f.meta.kind == MsgKind::Append)
            .count();
        assert_eq!(appends, 0);
    }

    #[test]
    fn test_stale_and_duplicate_acks_ignored() {
        let mut engine = leader_engine(3);
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();

        // Ack for a round that isn't open.
        engine.handle(
            &meta_from(2, 1, Some(99), MsgKind::AppendAck),
            &Message::AppendAck {
                index: 99,
                granted: true,
            },
            ms(10),
        );
        assert_eq!(engine.ack_count(), 0);

        // First ack counts; a conflicting duplicate does not overwrite it.
        for granted in [false, true] {
            engine.handle(
                &meta_from(2, 1, Some(1), MsgKind::AppendAck),
                &Message::AppendAck { index: 1, granted },
                ms(20),
            );
        }
        assert_eq!(engine.ack_count(), 1);
        let outcome = engine.finalize_round(&[peer(2, 10.0)], 3, ms(500)).unwrap();
        // The recorded vote is the first one (granted = false); with the
        // leader's yes the weighted rule sees a 1-1 split that the
        // leader's higher virtual SNR resolves upward.
        assert_eq!(outcome.n_eff, 1);
        assert!(outcome.committed);
    }

    #[test]
    fn test_follower_bernoulli_policy() {
        let config = RaftConfig::new(NodeId(2), 3, NodeId(1))
            .with_ack_policy(AckPolicy::Bernoulli { p_node: 0.5 })
            .with_vote_seed(42);
        let mut engine = RaftEngine::new(config);

        let mut yes = 0;
        for i in 1..=200u64 {
            // The append body echoes the cell's p_node, as the leader's
            // broadcasts do.
            let frames = engine.handle(
                &meta_from(1, 1, Some(i), MsgKind::Append),
                &append_msg_p(i - 1, i, 1, 0.5),
                ms(i * 10),
            );
            match Message::from_frame(&frames[0]).unwrap() {
                Message::AppendAck { granted, .. } => {
                    if granted {
                        yes += 1;
                    }
                }
                other => panic!("expected ack, got {:?}", other),
            }
        }
        // Every entry is appended regardless of the vote.
        assert_eq!(engine.log_len(), 200);
        // Seeded draw: the yes-rate sits near p_node.
        assert!((70..=130).contains(&yes), "yes = {}", yes);
    }

    #[test]
    fn test_retransmission_gets_same_vote() {
        let config = RaftConfig::new(NodeId(2), 3, NodeId(1))
            .with_ack_policy(AckPolicy::Bernoulli { p_node: 0.5 })
            .with_vote_seed(7);
        let mut engine = RaftEngine::new(config);

        let first = engine.handle(
            &meta_from(1, 1, Some(1), MsgKind::Append),
            &append_msg_p(0, 1, 1, 0.5),
            ms(10),
        );
        let retry = engine.handle(
            &meta_from(1, 1, Some(1), MsgKind::Append),
            &append_msg_p(0, 1, 1, 0.5),
            ms(200),
        );
        assert_eq!(
            Message::from_frame(&first[0]).unwrap(),
            Message::from_frame(&retry[0]).unwrap()
        );
        assert_eq!(engine.log_len(), 1);
    }

    #[test]
    fn test_consistency_policy_rejects_gap() {
        let mut engine = follower_engine(2, 3);
        // prev_index 5 but the log is empty.
        let frames = engine.handle(
            &meta_from(1, 1, Some(6), MsgKind::Append),
            &append_msg(5, 6, 1),
            ms(10),
        );
        match Message::from_frame(&frames[0]).unwrap() {
            Message::AppendAck { granted, .. } => assert!(!granted),
            other => panic!("expected ack, got {:?}", other),
        }
        assert_eq!(engine.log_len(), 0);
    }

    #[test]
    fn test_weighted_tie_resolved_deterministically() {
        // n = 2: the follower votes no on a strong link; the leader votes
        // yes with its virtual SNR 2 dB above. Replay gives the same bit.
        let run = || {
            let config = RaftConfig::new(NodeId(1), 2, NodeId(1)).with_vote_seed(5);
            let mut engine = RaftEngine::new(config);
            engine.set_experiment_params(None, Some(1.0));
            engine.propose(b"tie".to_vec(), true, ms(0)).unwrap();
            engine.handle(
                &meta_from(2, 1, Some(1), MsgKind::AppendAck),
                &Message::AppendAck {
                    index: 1,
                    granted: false,
                },
                ms(30),
            );
            engine.finalize_round(&[peer(2, 20.0)], 2, ms(400)).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.committed, b.committed);
        assert_eq!(a.weighted_yes.to_bits(), b.weighted_yes.to_bits());
        assert_eq!(a.weighted_total.to_bits(), b.weighted_total.to_bits());
        // Leader (yes, 22 dB) vs follower (no, 20 dB): the perturbation
        // tips the round to committed.
        assert!(a.committed);
    }

    #[test]
    fn test_nobody_votes_round_uncommitted() {
        let config = RaftConfig::new(NodeId(1), 3, NodeId(1)).with_vote_seed(3);
        let mut engine = RaftEngine::new(config);
        engine.set_experiment_params(None, Some(0.0)); // leader votes no too
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();
        let outcome = engine.finalize_round(&[], 3, ms(500)).unwrap();
        assert!(!outcome.committed);
        assert!(!outcome.correct);
        assert_eq!(outcome.n_eff, 0);
    }

    #[test]
    fn test_mask_filters_high_ids() {
        let mut engine = leader_engine(6);
        engine.set_experiment_params(None, Some(1.0));
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();

        // Followers 2..6 all vote yes, but only ids <= 3 may count.
        for src in 2u8..=6 {
            engine.handle(
                &meta_from(src, 1, Some(1), MsgKind::AppendAck),
                &Message::AppendAck {
                    index: 1,
                    granted: true,
                },
                ms(20 + src as u64),
            );
        }
        let peers: Vec<PeerState> = (2u8..=6).map(|i| peer(i, 15.0)).collect();
        let outcome = engine.finalize_round(&peers, 3, ms(500)).unwrap();
        assert_eq!(outcome.n_eff, 2);
        assert!(outcome.committed);
    }

    #[test]
    fn test_outbound_append_carries_no_oracle() {
        let mut engine = leader_engine(3);
        let (_, frames) = engine.propose(b"secret".to_vec(), true, ms(0)).unwrap();
        let wire = vraft_wire::encode(&frames[0]).unwrap();
        assert!(!String::from_utf8_lossy(&wire).contains("ground_truth"));
    }

    #[test]
    fn test_abort_round_is_uncommitted() {
        let mut engine = leader_engine(3);
        engine.propose(b"a".to_vec(), true, ms(0)).unwrap();
        let outcome = engine.abort_round(ms(100)).unwrap();
        assert!(!outcome.committed);
        // Uncommitted against a true oracle bit is a wrong verdict.
        assert!(!outcome.correct);
        assert!(engine.current_round().is_none());

        // Against a false oracle bit, not committing is the right call.
        engine.propose(b"b".to_vec(), false, ms(200)).unwrap();
        let outcome = engine.abort_round(ms(300)).unwrap();
        assert!(!outcome.committed);
        assert!(outcome.correct);
    }
}
