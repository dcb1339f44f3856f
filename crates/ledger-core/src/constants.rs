pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_HASH: &str = "0";
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_MINER: &str = "genesis";
pub const DEFAULT_DIFFICULTY: u32 = 4;
pub const DEFAULT_FORK_LIM: usize = 6;
pub const DEFAULT_REWARD: f64 = 10.0;
/// Nonces tried per `PowSearch::step` call when a caller runs the search to completion.
pub const NONCES_PER_STEP: u64 = 1 << 16;
