use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::dht::{PeerList, PeerSet};
use crate::scheduler::execute_repeatedly;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerOperation {
    Heartbeat,
    BloomFilter,
}

/// Probes and pulls currently running, keyed by peer slot.
///
/// A slot whose previous call is still running is skipped for the round, so
/// a slow peer never accumulates overlapping calls.
#[derive(Default)]
struct InFlight {
    tasks: HashMap<usize, JoinHandle<()>>,
}

impl InFlight {
    fn dispatch(&mut self, peers: &PeerSet, operation: PeerOperation) {
        for (slot, peer) in peers.iter() {
            if self.tasks.get(&slot).is_some_and(|task| !task.is_finished()) {
                trace!("{:?} for {} still running, skipping this round", operation, peer.address());
                continue;
            }

            let peer = Arc::clone(peer);
            let task = tokio::spawn(async move {
                match operation {
                    PeerOperation::Heartbeat => peer.test_connection().await,
                    PeerOperation::BloomFilter => peer.get_bloom_filter().await,
                }
            });
            self.tasks.insert(slot, task);
        }
    }

    fn abort_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn run_peer_operation(
    peers: PeerSet,
    interval: Duration,
    operation: PeerOperation,
    stop: CancellationToken,
) {
    debug!("💡 Starting {:?} loop over {} peers every {:?}", operation, peers.len(), interval);
    let mut in_flight = InFlight::default();

    execute_repeatedly(interval, || in_flight.dispatch(&peers, operation), stop, None).await;

    in_flight.abort_all();
    debug!("💡 {:?} loop stopped", operation);
}

/// Sends a liveness probe to every peer in `peers` each `interval`
pub async fn heartbeat_remote_nodes(peers: PeerSet, interval: Duration, stop: CancellationToken) {
    run_peer_operation(peers, interval, PeerOperation::Heartbeat, stop).await
}

/// Pulls the bloom filter of every peer in `peers` each `interval`
pub async fn get_remote_bloom_filters(peers: PeerSet, interval: Duration, stop: CancellationToken) {
    run_peer_operation(peers, interval, PeerOperation::BloomFilter, stop).await
}

/// The four background loops started by [`heartbeat`]
#[derive(Debug)]
pub struct HeartbeatHandle {
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Signals every loop to stop without waiting for them
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Stops every loop and waits until all of them have returned.
    ///
    /// Returns the number of loops that ended abnormally.
    pub async fn shutdown(self) -> usize {
        self.stop.cancel();
        let mut failed = 0;
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("❌ Heartbeat loop failed: {}", e);
                failed += 1;
            }
        }
        failed
    }
}

/// Starts the heartbeat and bloom filter loops for both peer sets.
///
/// Primary peers are probed every `heartbeat_interval`; backup peers are
/// probed, and both sets have their bloom filters pulled, every
/// `cycle_duration`. The loops run independently until `stop` is cancelled.
pub fn heartbeat(
    heartbeat_interval: Duration,
    cycle_duration: Duration,
    peer_list: &PeerList,
    stop: CancellationToken,
) -> HeartbeatHandle {
    let tasks = vec![
        tokio::spawn(heartbeat_remote_nodes(
            peer_list.peers.clone(),
            heartbeat_interval,
            stop.clone(),
        )),
        tokio::spawn(heartbeat_remote_nodes(
            peer_list.backup_peers.clone(),
            cycle_duration,
            stop.clone(),
        )),
        tokio::spawn(get_remote_bloom_filters(
            peer_list.peers.clone(),
            cycle_duration,
            stop.clone(),
        )),
        tokio::spawn(get_remote_bloom_filters(
            peer_list.backup_peers.clone(),
            cycle_duration,
            stop.clone(),
        )),
    ];

    HeartbeatHandle { stop, tasks }
}
