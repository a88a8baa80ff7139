//! Command-line surface and option validation.

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use vraft_experiment::ExperimentConfig;
use vraft_types::NodeId;

/// vraft consensus-experiment node.
///
/// The node whose `--id` equals `--leader-id` runs the experiment
/// controller; every other node runs the follower role and needs the
/// local PHY control port (`--ctrl`).
#[derive(Parser, Debug)]
#[command(name = "vraft-node")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Node id (1-based, unique per node).
    #[arg(long)]
    pub id: u8,

    /// Cluster size.
    #[arg(long, default_value = "6")]
    pub total: u8,

    /// app → PHY data port (egress).
    #[arg(long)]
    pub tx: u16,

    /// PHY → app data port (ingress).
    #[arg(long)]
    pub rx: u16,

    /// Pinned leader id.
    #[arg(long, default_value = "1")]
    pub leader_id: u8,

    /// Local PHY control port (follower only).
    #[arg(long)]
    pub ctrl: Option<u16>,

    /// Initial target SNR in dB (follower only).
    #[arg(long, default_value = "16.0")]
    pub target_snr: f32,

    /// Initial normalized TX gain (follower only).
    #[arg(long, default_value = "0.5")]
    pub init_gain: f32,

    /// Initial trust probability (follower only).
    #[arg(long, default_value = "1.0")]
    pub p_node: f64,

    /// Status line interval in seconds (follower only).
    #[arg(long, default_value = "2.0")]
    pub status_interval: f32,

    /// SNR tiers to sweep, comma separated (leader only).
    #[arg(long, default_value = "16.0,6.0")]
    pub snr_levels: String,

    /// Trust probabilities to sweep, comma separated (leader only).
    #[arg(long, default_value = "0.6,0.7,0.8,0.9")]
    pub p_node_levels: String,

    /// Cluster sizes to sweep, comma separated (leader only).
    #[arg(long, default_value = "1,2,3,4,5,6")]
    pub n_levels: String,

    /// Voting rounds per grid cell (leader only).
    #[arg(long, default_value = "30")]
    pub rounds: u32,

    /// Per-round ack collection deadline in seconds (leader only).
    #[arg(long, default_value = "0.5")]
    pub vote_deadline: f32,

    /// Minimum dwell after an SNR tier change, in seconds (leader only).
    #[arg(long, default_value = "2.0")]
    pub stabilize_time: f32,

    /// Peers that must be in SNR tolerance during stabilization.
    #[arg(long, default_value = "1")]
    pub min_peers: usize,

    /// Ground-truth oracle seed (leader only).
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Directory for the result artifact (leader only).
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--id must be in 1..={total}, got {id}")]
    IdOutOfRange { id: u8, total: u8 },

    #[error("--leader-id must be in 1..={total}, got {leader_id}")]
    LeaderOutOfRange { leader_id: u8, total: u8 },

    #[error("--ctrl is required for follower nodes")]
    MissingCtrlPort,

    #[error("--{flag} must be in {range}, got {value}")]
    ValueOutOfRange {
        flag: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("--{flag}: cannot parse {value:?} as a list")]
    BadList { flag: &'static str, value: String },

    #[error("--{flag} must not be empty")]
    EmptyList { flag: &'static str },
}

/// Follower-side options.
#[derive(Debug, Clone)]
pub struct FollowerOptions {
    pub ctrl_port: Option<u16>,
    pub target_snr: f32,
    pub init_gain: f32,
    pub p_node: f64,
    pub status_interval: Duration,
}

/// Role-specific options.
#[derive(Debug, Clone)]
pub enum RoleOptions {
    Leader(ExperimentConfig),
    Follower(FollowerOptions),
}

/// Fully validated node options.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub id: NodeId,
    pub total: u8,
    pub leader_id: NodeId,
    pub tx_port: u16,
    pub rx_port: u16,
    pub role: RoleOptions,
    /// Seed for the follower's vote RNG; derived from the node id and the
    /// wall clock unless pinned (tests pin it).
    pub vote_seed: u64,
}

impl NodeOptions {
    pub fn is_leader(&self) -> bool {
        self.id == self.leader_id
    }
}

/// Validate parsed arguments into runnable options.
pub fn build_options(args: Args) -> Result<NodeOptions, ConfigError> {
    if args.id == 0 || args.id > args.total {
        return Err(ConfigError::IdOutOfRange {
            id: args.id,
            total: args.total,
        });
    }
    if args.leader_id == 0 || args.leader_id > args.total {
        return Err(ConfigError::LeaderOutOfRange {
            leader_id: args.leader_id,
            total: args.total,
        });
    }

    let role = if args.id == args.leader_id {
        let snr_levels = parse_list::<f32>("snr-levels", &args.snr_levels)?;
        let p_node_levels = parse_list::<f64>("p-node-levels", &args.p_node_levels)?;
        let n_levels = parse_list::<u8>("n-levels", &args.n_levels)?;
        for &p in &p_node_levels {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::ValueOutOfRange {
                    flag: "p-node-levels",
                    range: "[0, 1]",
                    value: p,
                });
            }
        }
        RoleOptions::Leader(ExperimentConfig {
            snr_levels,
            p_node_levels,
            n_levels,
            rounds_per_cell: args.rounds,
            vote_deadline: Duration::from_secs_f32(args.vote_deadline),
            stabilize_time: Duration::from_secs_f32(args.stabilize_time),
            min_peers: args.min_peers,
            seed: args.seed,
            output_dir: args.output_dir.clone(),
            ..ExperimentConfig::default()
        })
    } else {
        if args.ctrl.is_none() {
            return Err(ConfigError::MissingCtrlPort);
        }
        if !(0.0..=1.0).contains(&args.init_gain) {
            return Err(ConfigError::ValueOutOfRange {
                flag: "init-gain",
                range: "[0, 1]",
                value: args.init_gain as f64,
            });
        }
        if !(0.0..=1.0).contains(&args.p_node) {
            return Err(ConfigError::ValueOutOfRange {
                flag: "p-node",
                range: "[0, 1]",
                value: args.p_node,
            });
        }
        RoleOptions::Follower(FollowerOptions {
            ctrl_port: args.ctrl,
            target_snr: args.target_snr,
            init_gain: args.init_gain,
            p_node: args.p_node,
            status_interval: Duration::from_secs_f32(args.status_interval),
        })
    };

    let wall = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Ok(NodeOptions {
        id: NodeId(args.id),
        total: args.total,
        leader_id: NodeId(args.leader_id),
        tx_port: args.tx,
        rx_port: args.rx,
        role,
        vote_seed: wall.wrapping_add(args.id as u64),
    })
}

fn parse_list<T: FromStr>(flag: &'static str, value: &str) -> Result<Vec<T>, ConfigError> {
    let items: Result<Vec<T>, _> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(T::from_str)
        .collect();
    let items = items.map_err(|_| ConfigError::BadList {
        flag,
        value: value.to_string(),
    })?;
    if items.is_empty() {
        return Err(ConfigError::EmptyList { flag });
    }
    Ok(items)
}
