// Map Bench - library root

pub mod bench;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod provision;
pub mod server;
pub mod suite;
pub mod workload;
