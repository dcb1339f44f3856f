use crate::p2p::InboundLimits;
use anyhow::{Context, Result};
use ledger_core::{
    constants::{DEFAULT_DIFFICULTY, DEFAULT_FORK_LIM, DEFAULT_REWARD},
    ConsensusConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

/// Node settings, read from a JSON file. Every field has a default.
///
/// ```json
/// {
///   "node_id": "george_linux",
///   "host": "172.29.20.2",
///   "port": 5002,
///   "difficulty": 4,
///   "reward": 10,
///   "fork_lim": 6,
///   "blockchain_file": "db/blockchain.json",
///   "peers_file": "configs/peers.txt"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique name of this node; credited by its coinbase transactions.
    pub node_id: String,
    pub host: String,
    /// Peer-to-peer port, shared by every node in the network.
    pub port: u16,
    /// Port of the local HTTP control API.
    pub api_port: u16,
    pub difficulty: u32,
    pub reward: f64,
    pub fork_lim: usize,
    pub blockchain_file: PathBuf,
    pub peers_file: PathBuf,
    pub peer_timeout_ms: u64,
    /// Longest inbound peer message accepted, newline included.
    pub max_message_bytes: usize,
    /// An inbound connection silent for this long is closed.
    pub peer_idle_timeout_ms: u64,
    pub parallel_mining: bool,
    pub sync_on_start: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5002,
            api_port: 8080,
            difficulty: DEFAULT_DIFFICULTY,
            reward: DEFAULT_REWARD,
            fork_lim: DEFAULT_FORK_LIM,
            blockchain_file: PathBuf::from("db/blockchain.json"),
            peers_file: PathBuf::from("configs/peers.txt"),
            peer_timeout_ms: 5_000,
            max_message_bytes: 32 * 1024 * 1024,
            peer_idle_timeout_ms: 300_000,
            parallel_mining: false,
            sync_on_start: true,
        }
    }
}

impl NodeConfig {
    /// Read `path`. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn consensus(&self) -> ConsensusConfig {
        ConsensusConfig {
            difficulty: self.difficulty,
            fork_lim: self.fork_lim,
            reward: self.reward,
            miner: self.node_id.clone(),
        }
    }

    pub fn p2p_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.host, self.api_port)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn inbound_limits(&self) -> InboundLimits {
        InboundLimits {
            max_line_bytes: self.max_message_bytes,
            idle_timeout: Duration::from_millis(self.peer_idle_timeout_ms),
        }
    }
}
