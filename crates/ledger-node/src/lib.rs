pub mod api;
pub mod config;
pub mod message;
pub mod p2p;
pub mod peers;
