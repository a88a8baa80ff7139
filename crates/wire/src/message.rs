//! Typed message bodies, one per frame kind.
//!
//! The metadata line routes and timestamps a frame; the payload is the
//! JSON-encoded body for its kind. [`Message`] pairs the two so call
//! sites never match on a kind without the matching body shape.

use crate::frame::{CodecError, Frame, FrameMeta, MsgKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vraft_types::{LogEntry, NodeId, RoundId, Term};

/// Body of an `APPEND` frame.
///
/// Heartbeats are empty appends, but travel as their own kind so the
/// receive path can skip the log entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendBody {
    pub prev_index: u64,
    pub prev_term: Term,
    pub entries: Vec<LogEntry>,
    /// Current experiment target SNR, echoed so late joiners converge.
    pub target_snr: f32,
    /// Current Bernoulli vote probability.
    pub p_node: f64,
}

/// Body of a `HEARTBEAT` frame.
///
/// Carries the leader's per-peer EWMA SNR map so each follower can see
/// how the leader hears it without a separate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatBody {
    pub target_snr: f32,
    pub p_node: f64,
    #[serde(default)]
    pub snr_report: BTreeMap<NodeId, f32>,
}

/// Body of an `SNR_REPORT` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnrReportBody {
    pub snr_report: BTreeMap<NodeId, f32>,
    pub target_snr: f32,
}

/// Body of an `EXP_BEGIN` frame. Either field may change independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ExpBeginBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_snr: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_node: Option<f64>,
}

/// A fully decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RequestVote { last_log_index: u64, last_log_term: Term },
    Vote { granted: bool },
    Append(AppendBody),
    AppendAck { index: u64, granted: bool },
    Heartbeat(HeartbeatBody),
    SnrReport(SnrReportBody),
    GainCmd { tx_gain: f32 },
    ExpBegin(ExpBeginBody),
    ExpEnd,
}

#[derive(Serialize, Deserialize)]
struct RequestVoteBody {
    last_log_index: u64,
    last_log_term: Term,
}

#[derive(Serialize, Deserialize)]
struct VoteBody {
    granted: bool,
}

#[derive(Serialize, Deserialize)]
struct AppendAckBody {
    index: u64,
    granted: bool,
}

#[derive(Serialize, Deserialize)]
struct GainCmdBody {
    tx_gain: f32,
}

impl Message {
    /// The frame kind this message travels as.
    pub fn kind(&self) -> MsgKind {
        match self {
            Message::RequestVote { .. } => MsgKind::RequestVote,
            Message::Vote { .. } => MsgKind::Vote,
            Message::Append(_) => MsgKind::Append,
            Message::AppendAck { .. } => MsgKind::AppendAck,
            Message::Heartbeat(_) => MsgKind::Heartbeat,
            Message::SnrReport(_) => MsgKind::SnrReport,
            Message::GainCmd { .. } => MsgKind::GainCmd,
            Message::ExpBegin(_) => MsgKind::ExpBegin,
            Message::ExpEnd => MsgKind::ExpEnd,
        }
    }

    /// Build a frame from this message.
    pub fn into_frame(
        self,
        src: NodeId,
        dst: Option<NodeId>,
        term: Term,
        round_id: Option<RoundId>,
    ) -> Frame {
        let kind = self.kind();
        let payload = self.encode_body();
        Frame {
            meta: FrameMeta {
                src,
                dst,
                term,
                kind,
                round_id,
                snr_db: None,
            },
            payload,
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        // Serializing our own in-memory bodies to JSON cannot fail.
        let json = match self {
            Message::RequestVote {
                last_log_index,
                last_log_term,
            } => serde_json::to_vec(&RequestVoteBody {
                last_log_index: *last_log_index,
                last_log_term: *last_log_term,
            }),
            Message::Vote { granted } => serde_json::to_vec(&VoteBody { granted: *granted }),
            Message::Append(body) => serde_json::to_vec(body),
            Message::AppendAck { index, granted } => serde_json::to_vec(&AppendAckBody {
                index: *index,
                granted: *granted,
            }),
            Message::Heartbeat(body) => serde_json::to_vec(body),
            Message::SnrReport(body) => serde_json::to_vec(body),
            Message::GainCmd { tx_gain } => serde_json::to_vec(&GainCmdBody { tx_gain: *tx_gain }),
            Message::ExpBegin(body) => serde_json::to_vec(body),
            Message::ExpEnd => return Vec::new(),
        };
        json.unwrap_or_default()
    }

    /// Decode the body of a frame according to its kind.
    pub fn from_frame(frame: &Frame) -> Result<Message, CodecError> {
        fn body<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, CodecError> {
            serde_json::from_slice(payload).map_err(|e| CodecError::BadJson(e.to_string()))
        }

        Ok(match frame.meta.kind {
            MsgKind::RequestVote => {
                let b: RequestVoteBody = body(&frame.payload)?;
                Message::RequestVote {
                    last_log_index: b.last_log_index,
                    last_log_term: b.last_log_term,
                }
            }
            MsgKind::Vote => {
                let b: VoteBody = body(&frame.payload)?;
                Message::Vote { granted: b.granted }
            }
            MsgKind::Append => Message::Append(body(&frame.payload)?),
            MsgKind::AppendAck => {
                let b: AppendAckBody = body(&frame.payload)?;
                Message::AppendAck {
                    index: b.index,
                    granted: b.granted,
                }
            }
            MsgKind::Heartbeat => Message::Heartbeat(body(&frame.payload)?),
            MsgKind::SnrReport => Message::SnrReport(body(&frame.payload)?),
            MsgKind::GainCmd => {
                let b: GainCmdBody = body(&frame.payload)?;
                Message::GainCmd { tx_gain: b.tx_gain }
            }
            MsgKind::ExpBegin => Message::ExpBegin(body(&frame.payload)?),
            MsgKind::ExpEnd => Message::ExpEnd,
        })
    }
}
