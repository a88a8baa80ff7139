//! Frame encoding and decoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vraft_types::{NodeId, RoundId, Term};

/// Largest frame the link will accept, matching the radio-side MTU budget.
pub const MAX_FRAME_LEN: usize = 4096;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short")]
    FrameTooShort,

    #[error("bad frame length: declared {declared}, have {actual}")]
    BadLength { declared: usize, actual: usize },

    #[error("bad metadata json: {0}")]
    BadJson(String),

    #[error("unknown message kind: {0}")]
    UnknownKind(String),
}

/// Message kind, dispatched from the metadata line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    RequestVote,
    Vote,
    Append,
    AppendAck,
    Heartbeat,
    SnrReport,
    GainCmd,
    ExpBegin,
    ExpEnd,
}

impl MsgKind {
    /// Wire name for this kind.
    pub fn as_wire(self) -> &'static str {
        match self {
            MsgKind::RequestVote => "REQUEST_VOTE",
            MsgKind::Vote => "VOTE",
            MsgKind::Append => "APPEND",
            MsgKind::AppendAck => "APPEND_ACK",
            MsgKind::Heartbeat => "HEARTBEAT",
            MsgKind::SnrReport => "SNR_REPORT",
            MsgKind::GainCmd => "GAIN_CMD",
            MsgKind::ExpBegin => "EXP_BEGIN",
            MsgKind::ExpEnd => "EXP_END",
        }
    }

    /// Parse a wire name.
    pub fn from_wire(s: &str) -> Option<MsgKind> {
        Some(match s {
            "REQUEST_VOTE" => MsgKind::RequestVote,
            "VOTE" => MsgKind::Vote,
            "APPEND" => MsgKind::Append,
            "APPEND_ACK" => MsgKind::AppendAck,
            "HEARTBEAT" => MsgKind::Heartbeat,
            "SNR_REPORT" => MsgKind::SnrReport,
            "GAIN_CMD" => MsgKind::GainCmd,
            "EXP_BEGIN" => MsgKind::ExpBegin,
            "EXP_END" => MsgKind::ExpEnd,
            _ => return None,
        })
    }
}

/// Per-frame metadata.
///
/// `dst: None` means broadcast. `snr_db` is absent on transmit and filled
/// in by the PHY on reception.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMeta {
    pub src: NodeId,
    pub dst: Option<NodeId>,
    pub term: Term,
    pub kind: MsgKind,
    pub round_id: Option<RoundId>,
    pub snr_db: Option<f32>,
}

/// Serde shape of the metadata line. The kind travels as its wire string
/// so an unknown kind can be reported as such instead of as a JSON error.
#[derive(Serialize, Deserialize)]
struct RawMeta {
    src: NodeId,
    dst: Option<NodeId>,
    term: Term,
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    round_id: Option<RoundId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snr_db: Option<f32>,
}

/// A decoded frame: metadata plus opaque body bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub meta: FrameMeta,
    pub payload: Vec<u8>,
}

/// Encode a frame to wire bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let raw = RawMeta {
        src: frame.meta.src,
        dst: frame.meta.dst,
        term: frame.meta.term,
        kind: frame.meta.kind.as_wire().to_string(),
        round_id: frame.meta.round_id,
        snr_db: frame.meta.snr_db,
    };
    let meta_line = serde_json::to_string(&raw).map_err(|e| CodecError::BadJson(e.to_string()))?;

    let body_len = meta_line.len() + 1 + frame.payload.len();
    let mut bytes = Vec::with_capacity(4 + body_len);
    bytes.extend_from_slice(&(body_len as u32).to_be_bytes());
    bytes.extend_from_slice(meta_line.as_bytes());
    bytes.push(b'\n');
    bytes.extend_from_slice(&frame.payload);
    Ok(bytes)
}

/// Decode a frame from wire bytes.
pub fn decode(data: &[u8]) -> Result<Frame, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::FrameTooShort);
    }

    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[4..];
    if declared != body.len() || declared > MAX_FRAME_LEN {
        return Err(CodecError::BadLength {
            declared,
            actual: body.len(),
        });
    }

    // Metadata is everything up to the first newline.
    let nl = body
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(CodecError::FrameTooShort)?;
    let meta_bytes = &body[..nl];
    let payload = body[nl + 1..].to_vec();

    let raw: RawMeta =
        serde_json::from_slice(meta_bytes).map_err(|e| CodecError::BadJson(e.to_string()))?;
    let kind = MsgKind::from_wire(&raw.kind).ok_or_else(|| CodecError::UnknownKind(raw.kind.clone()))?;

    Ok(Frame {
        meta: FrameMeta {
            src: raw.src,
            dst: raw.dst,
            term: raw.term,
            kind,
            round_id: raw.round_id,
            snr_db: raw.snr_db,
        },
        payload,
    })
}
