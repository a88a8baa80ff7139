//! Node runtime for the vraft testbed.
//!
//! Glues the transport, the consensus engine, and the experiment roles
//! into a running process. Per node there are four long-lived workers:
//!
//! 1. **Receiver**: the link's reader thread (socket → queue + peer table)
//! 2. **Engine driver**: drains the inbound queue into the engine,
//!    transmits its output, and advances its timers
//! 3. **Round driver**: leader only; the experiment controller
//! 4. **Gain controller**: follower only; the 500 ms gain servo
//!
//! One shutdown flag, set by SIGINT/SIGTERM or by experiment completion,
//! is observed at every blocking point.

pub mod cli;
pub mod hub;
mod runtime;

pub use cli::{build_options, Args, ConfigError, FollowerOptions, NodeOptions, RoleOptions};
pub use runtime::{run_node, NodeError};
