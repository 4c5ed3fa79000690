mod peer;
mod peer_list;

pub use peer::{Peer, PeerStatus, RemotePeer};
pub use peer_list::{PeerList, PeerSet};
