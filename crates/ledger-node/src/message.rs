use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};

/// A peer-to-peer message: `{"type": ..., "data": ...}`, one JSON document per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Block(Block),
    Tx(Transaction),
    Chain(Vec<Block>),
    ChainRequest,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Chain(_) => "chain",
            Message::ChainRequest => "chain_request",
        }
    }

    /// Newline-terminated JSON.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}
