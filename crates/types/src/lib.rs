//! Core types for the vraft wireless-consensus testbed.
//!
//! This crate provides the foundational types used throughout the
//! implementation:
//!
//! - **Identifiers**: [`NodeId`], [`Term`], [`RoundId`]
//! - **Consensus records**: [`LogEntry`], [`VoteRecord`]
//! - **Link state**: [`PeerState`], [`Liveness`]
//! - **Experiment records**: [`RoundOutcome`], [`CellParams`], [`CellSummary`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod ids;
mod log;
mod outcome;
mod peer;

pub use ids::{NodeId, RoundId, Term};
pub use log::{LogEntry, VoteRecord};
pub use outcome::{CellParams, CellSummary, RoundOutcome};
pub use peer::{Liveness, PeerState, DEAD_AFTER, STALE_AFTER};
