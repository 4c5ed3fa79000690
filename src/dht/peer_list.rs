use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::peer::{Peer, RemotePeer};
use crate::config::Config;
use crate::message::MessageHandler;

/// Fixed number of slots, each holding a peer or nothing
#[derive(Debug, Clone)]
pub struct PeerSet {
    slots: Vec<Option<Arc<dyn Peer>>>,
}

impl PeerSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Places `peer` in `slot`; an occupied slot is never overwritten
    pub fn insert(&mut self, slot: usize, peer: Arc<dyn Peer>) -> Result<()> {
        let capacity = self.slots.len();
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| anyhow!("Slot {} is out of range (capacity {})", slot, capacity))?;
        if let Some(existing) = entry {
            return Err(anyhow!("Slot {} is already held by {}", slot, existing.address()));
        }
        *entry = Some(peer);
        Ok(())
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<dyn Peer>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots with their index, empty slots skipped
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn Peer>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, peer)| peer.as_ref().map(|peer| (slot, peer)))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of the primary and backup peers known to this node.
///
/// Built and connected during startup, then shared behind an `Arc` and only
/// read from.
#[derive(Debug)]
pub struct PeerList {
    pub peers: PeerSet,
    pub backup_peers: PeerSet,
    peer_map: HashMap<String, bool>,
    handler: Arc<MessageHandler>,
}

impl PeerList {
    pub fn new(handler: Arc<MessageHandler>, config: &Config) -> Self {
        Self {
            peers: PeerSet::with_capacity(config.max_peers),
            backup_peers: PeerSet::with_capacity(config.max_peers),
            peer_map: HashMap::new(),
            handler,
        }
    }

    /// Registers a [`RemotePeer`] for each configured address.
    ///
    /// Every address takes the slot matching its position in its list. An
    /// address that is already known is skipped and its slot left empty, so
    /// each peer is dialed once. More addresses than slots is an error and
    /// registers nothing.
    pub fn register_remote_peers(&mut self, primaries: &[String], backups: &[String]) -> Result<()> {
        for (kind, addresses, set) in [
            ("primary", primaries, &self.peers),
            ("backup", backups, &self.backup_peers),
        ] {
            if addresses.len() > set.capacity() {
                return Err(anyhow!(
                    "{} {} peers configured but only {} slots available",
                    addresses.len(),
                    kind,
                    set.capacity()
                ));
            }
        }

        for (slot, address) in primaries.iter().enumerate() {
            if !self.skip_known(address, slot) {
                let peer = Arc::new(RemotePeer::new(address.as_str(), Arc::clone(&self.handler)));
                self.add_peer(slot, peer)?;
            }
        }
        for (slot, address) in backups.iter().enumerate() {
            if !self.skip_known(address, slot) {
                let peer = Arc::new(RemotePeer::new(address.as_str(), Arc::clone(&self.handler)));
                self.add_backup_peer(slot, peer)?;
            }
        }
        Ok(())
    }

    fn skip_known(&self, address: &str, slot: usize) -> bool {
        let known = self.is_known(address);
        if known {
            warn!("⚠️ Peer {} is already registered, leaving slot {} empty", address, slot);
        }
        known
    }

    /// Adds a primary peer at `slot` and marks its address as known
    pub fn add_peer(&mut self, slot: usize, peer: Arc<dyn Peer>) -> Result<()> {
        self.ensure_unknown(peer.address())?;
        let address = peer.address().to_string();
        self.peers.insert(slot, peer)?;
        self.peer_map.insert(address, true);
        Ok(())
    }

    /// Adds a backup peer at `slot` and marks its address as known
    pub fn add_backup_peer(&mut self, slot: usize, peer: Arc<dyn Peer>) -> Result<()> {
        self.ensure_unknown(peer.address())?;
        let address = peer.address().to_string();
        self.backup_peers.insert(slot, peer)?;
        self.peer_map.insert(address, true);
        Ok(())
    }

    fn ensure_unknown(&self, address: &str) -> Result<()> {
        if self.is_known(address) {
            return Err(anyhow!("Peer {} is already registered", address));
        }
        Ok(())
    }

    pub fn is_known(&self, address: &str) -> bool {
        self.peer_map.get(address).copied().unwrap_or(false)
    }

    /// Addresses of every registered peer, sorted
    pub fn known_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .peer_map
            .iter()
            .filter(|(_, known)| **known)
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// Connects every primary peer, failing if any of them is unreachable
    pub async fn connect_all_peers(&self) -> Result<()> {
        let mut unreachable = Vec::new();
        for (slot, peer) in self.peers.iter() {
            if let Err(e) = peer.connect().await {
                error!("❌ Failed to connect to peer {} in slot {}: {:#}", peer.address(), slot, e);
                unreachable.push(peer.address().to_string());
            }
        }

        if unreachable.is_empty() {
            info!("✅ Connected to {} peers", self.peers.len());
            Ok(())
        } else {
            Err(anyhow!(
                "Failed to connect to {} of {} peers: {}",
                unreachable.len(),
                self.peers.len(),
                unreachable.join(", ")
            ))
        }
    }
}
