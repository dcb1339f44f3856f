use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the peer-to-peer ledger node")]
struct Cli {
    /// Node control API base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transaction to the pending pool
    Submit {
        /// Sender
        #[arg(long)]
        from: String,
        /// Recipient
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        amount: f64,
    },
    /// Mine a block with the pending transactions
    Mine,
    /// Print the canonical chain
    Chain,
    /// Print the active fork branches
    Forks,
    /// Print the pending transactions
    Pending,
    /// Print the balance of an identifier
    Balance {
        id: String,
    },
}

#[derive(Serialize)]
struct Tx {
    from: String,
    to: String,
    amount: f64,
}

#[derive(Deserialize)]
struct BlockRow {
    index: u64,
    hash: String,
    miner: String,
    difficulty: u32,
    transactions: Vec<Value>,
}

#[derive(Deserialize)]
struct Balance {
    id: String,
    balance: f64,
}

fn print_blocks(blocks: &[BlockRow]) {
    for b in blocks {
        let short = b.hash.get(..10).unwrap_or(&b.hash);
        println!(
            "Index: {}, Hash: {}..., Miner: {}, Difficulty: {}, Tx: {}",
            b.index,
            short,
            b.miner,
            b.difficulty,
            b.transactions.len()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = reqwest::Client::new();
    debug!(node, command = ?cli.cmd, "sending request");
    match cli.cmd {
        Command::Submit { from, to, amount } => {
            let tx = Tx { from, to, amount };
            let res = client.post(format!("{node}/tx")).json(&tx).send().await?;
            let body: Value = res.error_for_status()?.json().await?;
            if body["accepted"].as_bool().unwrap_or(false) {
                println!("[+] Transaction added.");
            } else {
                println!("[!] Transaction already pending.");
            }
        }
        Command::Mine => {
            let res = client.post(format!("{node}/mine")).send().await?;
            let body: Value = res.error_for_status()?.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Chain => {
            let blocks: Vec<BlockRow> = client
                .get(format!("{node}/chain"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            print_blocks(&blocks);
        }
        Command::Forks => {
            let forks: Vec<Vec<BlockRow>> = client
                .get(format!("{node}/forks"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if forks.is_empty() {
                println!("No active forks.");
            }
            for (i, fork) in forks.iter().enumerate() {
                println!("\nFork {i}:");
                print_blocks(fork);
            }
        }
        Command::Pending => {
            let txs: Value = client
                .get(format!("{node}/pending"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&txs)?);
        }
        Command::Balance { id } => {
            let mut url = reqwest::Url::parse(node)?;
            url.path_segments_mut()
                .map_err(|_| anyhow!("node URL cannot have a path: {node}"))?
                .pop_if_empty()
                .push("balance")
                .push(&id);
            let balance: Balance = client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("[i] The balance of {} is {}.", balance.id, balance.balance);
        }
    }
    Ok(())
}
