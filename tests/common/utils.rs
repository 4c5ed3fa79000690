#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use olivia::dht::Peer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Peer that only counts how often each operation was invoked
#[derive(Debug)]
pub struct CountingPeer {
    address: String,
    probes: AtomicUsize,
    pulls: AtomicUsize,
}

impl CountingPeer {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            probes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        })
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peer for CountingPeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn test_connection(&self) {
        self.probes.fetch_add(1, Ordering::SeqCst);
    }

    async fn get_bloom_filter(&self) {
        self.pulls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reserves a free localhost port by binding and releasing it
pub fn free_local_address() -> Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.to_string())
}

/// Helper function to wait for a condition with timeout
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_secs: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let mut last_log = std::time::Instant::now();

    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        if last_log.elapsed() >= Duration::from_secs(1) {
            info!("Still waiting for condition... ({:?} elapsed)", start.elapsed());
            last_log = std::time::Instant::now();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
