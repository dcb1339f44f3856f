pub mod json_store;

pub use json_store::JsonFileStore;
pub use ledger_core::chain::ChainStore;
