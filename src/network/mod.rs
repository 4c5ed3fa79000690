mod handler;
mod heartbeat;
mod incoming;

pub use handler::{connect_with_retry, start_incoming_network};
pub use heartbeat::{get_remote_bloom_filters, heartbeat, heartbeat_remote_nodes, HeartbeatHandle};
pub use incoming::{start_network_router, RouterHandle};
