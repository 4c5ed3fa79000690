use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::heartbeat::heartbeat;
use super::incoming::start_network_router;
use crate::cache::Cache;
use crate::config::Config;
use crate::dht::PeerList;
use crate::message::MessageHandler;

/// Connects every primary peer, sleeping `retry` between failed attempts.
///
/// There is no retry limit: a node that relies on peers does not start
/// serving until it can reach all of them. Returns the number of retries,
/// or `None` if `shutdown` fired first.
pub async fn connect_with_retry(
    peer_list: &PeerList,
    retry: Duration,
    shutdown: &CancellationToken,
) -> Option<u32> {
    let mut retries = 0u32;
    loop {
        match peer_list.connect_all_peers().await {
            Ok(()) => return Some(retries),
            Err(e) => {
                warn!("⚠️ {:#}", e);
                info!("💤 Sleeping for {} seconds and attempting to reconnect", retry.as_secs());
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(retry) => retries += 1,
        }
    }
}

/// Brings the node's networking up and keeps it running until `shutdown`.
///
/// Non-base nodes first register and connect their configured peers, blocking
/// until every primary peer is reachable, then start the heartbeat loops.
/// Every node then serves inbound requests. Cancelling `shutdown` stops the
/// router and the heartbeat loops before this returns.
pub async fn start_incoming_network(
    handler: Arc<MessageHandler>,
    cache: Arc<Cache>,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut peer_list = PeerList::new(Arc::clone(&handler), &config);

    if !config.base_node {
        peer_list
            .register_remote_peers(&config.remote_peers, &config.backup_peers)
            .context("Failed to register configured peers")?;

        match connect_with_retry(&peer_list, config.connect_retry(), &shutdown).await {
            Some(retries) => info!("✅ Peers reachable after {} retries", retries),
            None => {
                info!("❎ Shutdown requested before peers became reachable");
                return Ok(());
            }
        }
    } else {
        info!("💡 Starting as base node, waiting for inbound connections");
    }

    let peer_list = Arc::new(peer_list);

    let heartbeats = (!config.base_node).then(|| {
        heartbeat(
            config.heartbeat_interval(),
            config.cycle_duration(),
            &peer_list,
            shutdown.child_token(),
        )
    });

    let router = start_network_router(handler, cache, Arc::clone(&peer_list), &config).await?;

    shutdown.cancelled().await;
    info!("❎ Shutdown requested, stopping network");

    router.stop().await;
    if let Some(heartbeats) = heartbeats {
        heartbeats.shutdown().await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::Peer;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FlakyPeer {
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Peer for FlakyPeer {
        fn address(&self) -> &str {
            "flaky:1"
        }

        async fn connect(&self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures_left.store(left - 1, Ordering::SeqCst);
            Err(anyhow!("connection refused"))
        }

        async fn test_connection(&self) {}

        async fn get_bloom_filter(&self) {}
    }

    fn flaky_list(failures: u32) -> (PeerList, Arc<FlakyPeer>) {
        let config = Config::default();
        let mut list = PeerList::new(Arc::new(MessageHandler::new(&config)), &config);
        let peer = Arc::new(FlakyPeer {
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        });
        list.add_peer(0, peer.clone()).unwrap();
        (list, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_once_per_failure() {
        let (list, peer) = flaky_list(3);
        let start = tokio::time::Instant::now();

        let retries = connect_with_retry(&list, Duration::from_secs(60), &CancellationToken::new()).await;

        assert_eq!(retries, Some(3));
        assert_eq!(peer.attempts.load(Ordering::SeqCst), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(180) && elapsed < Duration::from_secs(181));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_when_first_attempt_succeeds() {
        let (list, _) = flaky_list(0);
        let start = tokio::time::Instant::now();

        let retries = connect_with_retry(&list, Duration::from_secs(60), &CancellationToken::new()).await;

        assert_eq!(retries, Some(0));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry_sleep() {
        let (list, peer) = flaky_list(u32::MAX);
        let shutdown = CancellationToken::new();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            canceller.cancel();
        });

        let retries = connect_with_retry(&list, Duration::from_secs(60), &shutdown).await;

        assert_eq!(retries, None);
        assert_eq!(peer.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_peer_addresses_reach_the_connect_gate() {
        let dead_peer = "127.0.0.1:1".to_string();
        let config = Config {
            listen_address: "127.0.0.1:0".to_string(),
            remote_peers: vec![dead_peer.clone(), dead_peer.clone()],
            backup_peers: vec![dead_peer],
            request_timeout_ms: 200,
            ..Config::default()
        };
        let shutdown = CancellationToken::new();

        let node = tokio::spawn(start_incoming_network(
            Arc::new(MessageHandler::new(&config)),
            Arc::new(Cache::new()),
            config,
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!node.is_finished(), "startup should be waiting on the unreachable peer");

        shutdown.cancel();
        node.await.unwrap().unwrap();
    }
}
