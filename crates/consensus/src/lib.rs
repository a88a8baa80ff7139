//! Raft-style consensus engine for the vraft testbed.
//!
//! This crate implements the consensus state machine as a synchronous,
//! deterministic model:
//!
//! ```text
//! frames in → RaftEngine::handle() / on_tick() → frames out
//! ```
//!
//! The engine is:
//! - **Synchronous**: no async, no sockets, no sleeping
//! - **Deterministic**: same state + inputs (including the injected
//!   `now` and seeded RNG) = same outputs
//! - **Pure-ish**: mutates itself, performs no I/O
//!
//! All I/O lives in the node runtime, which delivers inbound frames and
//! tick edges to the engine and transmits whatever frames it returns.
//!
//! The leader role is pinned by configuration for normal operation; the
//! full election path is present and exercised only when the pinned
//! leader disappears.

mod commit;
mod config;
mod engine;
mod outcome_log;

pub use commit::{weighted_commit, WeightedDecision, WEIGHT_EPSILON, WEIGHT_SPREAD};
pub use config::{AckPolicy, RaftConfig};
pub use engine::{ConsensusError, RaftEngine, Role};
pub use outcome_log::OutcomeLog;
