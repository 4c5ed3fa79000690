//! Peer liveness and bloom filter synchronization for a distributed key/value node.

pub mod bloomfilter;
pub mod cache;
pub mod config;
pub mod dht;
pub mod message;
pub mod network;
pub mod scheduler;
pub mod utils;

pub use cache::Cache;
pub use config::Config;
pub use message::MessageHandler;
