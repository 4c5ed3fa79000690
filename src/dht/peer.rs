use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bloomfilter::BloomFilter;
use crate::message::{MessageHandler, Request, Response};

/// A remote node the local node keeps alive and synchronizes with.
///
/// The heartbeat loops call these concurrently and may overlap calls on the
/// same peer, so implementations must tolerate that.
#[async_trait]
pub trait Peer: Send + Sync + std::fmt::Debug {
    /// Address the peer is reachable at
    fn address(&self) -> &str;

    /// Establishes the initial connection
    async fn connect(&self) -> Result<()>;

    /// Liveness probe, failures are handled internally
    async fn test_connection(&self);

    /// Pulls and stores the peer's current bloom filter
    async fn get_bloom_filter(&self);
}

/// Last observed state of a remote peer
#[derive(Debug, Clone, Default)]
pub struct PeerStatus {
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub bloom_filter: Option<BloomFilter>,
}

/// A peer reached over the line-delimited JSON protocol
#[derive(Debug)]
pub struct RemotePeer {
    address: String,
    handler: Arc<MessageHandler>,
    status: Mutex<PeerStatus>,
}

impl RemotePeer {
    pub fn new(address: impl Into<String>, handler: Arc<MessageHandler>) -> Self {
        Self {
            address: address.into(),
            handler,
            status: Mutex::new(PeerStatus::default()),
        }
    }

    pub async fn status(&self) -> PeerStatus {
        self.status.lock().await.clone()
    }

    async fn ping(&self) -> Result<()> {
        match self.handler.send(&self.address, &Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(anyhow!("Unexpected reply to ping from {}: {:?}", self.address, other)),
        }
    }

    async fn fetch_bloom_filter(&self) -> Result<BloomFilter> {
        match self.handler.send(&self.address, &Request::BloomFilter).await? {
            Response::BloomFilter { filter } => BloomFilter::from_wire(&filter)
                .with_context(|| format!("Invalid bloom filter from {}", self.address)),
            Response::Error { message } => {
                Err(anyhow!("{} failed to produce a bloom filter: {}", self.address, message))
            }
            other => Err(anyhow!(
                "Unexpected reply to bloom filter request from {}: {:?}",
                self.address,
                other
            )),
        }
    }

    async fn record_success(&self) {
        let mut status = self.status.lock().await;
        if !status.connected {
            info!("✅ Peer {} is reachable", self.address);
        }
        status.connected = true;
        status.last_seen = Some(Utc::now());
        status.consecutive_failures = 0;
    }

    async fn record_failure(&self, error: &anyhow::Error) {
        let mut status = self.status.lock().await;
        status.connected = false;
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        warn!(
            "⚠️ Peer {} unreachable ({} consecutive failures): {:#}",
            self.address, status.consecutive_failures, error
        );
    }
}

#[async_trait]
impl Peer for RemotePeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<()> {
        info!("🔌 Attempting to connect to peer at {}", self.address);
        match self.ping().await {
            Ok(()) => {
                self.record_success().await;
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn test_connection(&self) {
        match self.ping().await {
            Ok(()) => self.record_success().await,
            Err(e) => self.record_failure(&e).await,
        }
    }

    async fn get_bloom_filter(&self) {
        match self.fetch_bloom_filter().await {
            Ok(filter) => {
                debug!(
                    "📨 Received bloom filter from {} ({} of {} bits set)",
                    self.address,
                    filter.count_ones(),
                    filter.size()
                );
                self.record_success().await;
                self.status.lock().await.bloom_filter = Some(filter);
            }
            Err(e) => self.record_failure(&e).await,
        }
    }
}
