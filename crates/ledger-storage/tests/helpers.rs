use ledger_core::{chain::genesis_block, pow, Block, Transaction};
use ledger_storage::JsonFileStore;
use rand::Rng;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, JsonFileStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("db").join("blockchain.json");
    (temp_dir, JsonFileStore::new(path))
}

/// A valid chain of `len` blocks with random transfers in each block.
pub fn random_chain(len: usize) -> Vec<Block> {
    let mut rng = rand::thread_rng();
    let mut chain = vec![genesis_block()];
    while chain.len() < len {
        let tip = chain.last().expect("chain is never empty");
        let txs: Vec<Transaction> = (0..rng.gen_range(0..5))
            .map(|i| {
                Transaction::new(
                    format!("user{}", rng.gen_range(0..10)),
                    format!("user{i}"),
                    rng.gen_range(0.5..500.0),
                )
            })
            .collect();
        let block = pow::mine(txs, &tip.hash, tip.index + 1, "miner", 10.0, 1);
        chain.push(block);
    }
    chain
}

/// A valid chain whose blocks carry `count` transfers in total, with amounts
/// spread over many magnitudes and full mantissas.
pub fn chain_with_amounts(count: usize) -> Vec<Block> {
    let mut rng = rand::thread_rng();
    let mut chain = vec![genesis_block()];
    let mut left = count;
    while left > 0 {
        let tip = chain.last().expect("chain is never empty");
        let n = left.min(50);
        let txs: Vec<Transaction> = (0..n)
            .map(|i| {
                let scale = 10f64.powi(rng.gen_range(-6..9));
                Transaction::new("alice", format!("user{i}"), rng.gen::<f64>() * scale)
            })
            .collect();
        let block = pow::mine(txs, &tip.hash, tip.index + 1, "miner", 10.0, 0);
        chain.push(block);
        left -= n;
    }
    chain
}
