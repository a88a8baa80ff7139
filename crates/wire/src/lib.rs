//! Message framing for the vraft broadcast channel.
//!
//! # Wire Format
//!
//! ```text
//! [len: u32 big-endian][metadata: JSON line "\n"][payload: bytes]
//! ```
//!
//! - `len` counts everything after the length prefix
//! - Metadata is a single JSON object carrying routing and link fields
//!   (`src`, `dst`, `term`, `kind`, optional `round_id` and `snr_db`)
//! - The payload is the JSON-encoded message body for the frame's kind
//!
//! The PHY prepends nothing and strips nothing: it rewrites the metadata
//! `snr_db` field on reception with its per-frame SNR estimate, so the
//! application sees link quality without talking to the radio directly.
//!
//! Decoding failures are never fatal: callers drop the frame, bump a
//! counter, and continue.

mod frame;
mod message;

pub use frame::{decode, encode, CodecError, Frame, FrameMeta, MsgKind, MAX_FRAME_LEN};
pub use message::{AppendBody, ExpBeginBody, HeartbeatBody, Message, SnrReportBody};
