use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::bloomfilter::{BloomFilter, WireBloomFilter};
use crate::cache::Cache;
use crate::config::Config;
use crate::dht::PeerList;

/// Requests exchanged between nodes, one JSON document per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Get { key: String },
    Set { key: String, value: String },
    Delete { key: String },
    BloomFilter,
    Peers,
}

/// Responses to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Value { key: String, value: Option<String> },
    Ok,
    BloomFilter { filter: WireBloomFilter },
    Peers { addresses: Vec<String> },
    Error { message: String },
}

/// Serializes `message` as a single newline-terminated JSON frame
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(message).context("Failed to serialize frame")?;
    frame.push(b'\n');
    Ok(frame)
}

/// A line ran past the frame limit before its newline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame exceeds {limit} bytes")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// Reads one newline-terminated frame of at most `max_bytes`.
///
/// Returns `None` at end of stream. No more than `max_bytes + 1` bytes are
/// buffered for a frame; a longer one fails with [`FrameTooLarge`] and leaves
/// the stream positioned inside it.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut frame = Vec::new();
    let read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut frame)
        .await
        .context("Failed to read frame")?;
    if read == 0 {
        return Ok(None);
    }

    if frame.last() == Some(&b'\n') {
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
    } else if frame.len() > max_bytes {
        return Err(FrameTooLarge { limit: max_bytes }.into());
    }

    String::from_utf8(frame).map(Some).context("Frame is not valid UTF-8")
}

/// Handles the request/response protocol on both sides of a connection
#[derive(Debug, Clone)]
pub struct MessageHandler {
    request_timeout: Duration,
    bloom_filter_bits: usize,
    bloom_filter_hashes: u32,
    max_frame_bytes: usize,
}

impl MessageHandler {
    pub fn new(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            bloom_filter_bits: config.bloom_filter_bits,
            bloom_filter_hashes: config.bloom_filter_hashes,
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Serves one inbound request against the local cache and peer registry
    pub async fn handle(&self, request: Request, cache: &Cache, peers: &PeerList) -> Response {
        trace!("Handling request: {:?}", request);
        match request {
            Request::Ping => Response::Pong,
            Request::Get { key } => {
                let value = cache.get(&key).await;
                Response::Value { key, value }
            }
            Request::Set { key, value } => {
                cache.set(key, value).await;
                Response::Ok
            }
            Request::Delete { key } => {
                cache.delete(&key).await;
                Response::Ok
            }
            Request::BloomFilter => match self.local_bloom_filter(cache).await {
                Ok(filter) => Response::BloomFilter { filter },
                Err(e) => {
                    warn!("⚠️ Failed to build local bloom filter: {:#}", e);
                    Response::Error {
                        message: format!("{:#}", e),
                    }
                }
            },
            Request::Peers => Response::Peers {
                addresses: peers.known_addresses(),
            },
        }
    }

    /// Summarizes the cache keys as a wire-encoded bloom filter
    pub async fn local_bloom_filter(&self, cache: &Cache) -> Result<WireBloomFilter> {
        let keys = cache.keys().await;
        let filter = BloomFilter::from_keys(&keys, self.bloom_filter_bits, self.bloom_filter_hashes)?;
        debug!(
            "📝 Built bloom filter over {} keys ({} of {} bits set)",
            keys.len(),
            filter.count_ones(),
            filter.size()
        );
        filter.to_wire()
    }

    /// Sends `request` to the node at `address` and waits for its response
    pub async fn send(&self, address: &str, request: &Request) -> Result<Response> {
        tokio::time::timeout(self.request_timeout, self.exchange(address, request))
            .await
            .map_err(|_| anyhow!("Request to {} timed out after {:?}", address, self.request_timeout))?
    }

    async fn exchange(&self, address: &str, request: &Request) -> Result<Response> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Failed to connect to {}", address))?;
        let (reader, mut writer) = stream.into_split();

        writer
            .write_all(&encode_frame(request)?)
            .await
            .with_context(|| format!("Failed to send request to {}", address))?;

        let line = read_frame(&mut BufReader::new(reader), self.max_frame_bytes)
            .await
            .with_context(|| format!("Failed to read response from {}", address))?
            .ok_or_else(|| anyhow!("Connection to {} closed before a response", address))?;

        serde_json::from_str(&line).with_context(|| format!("Malformed response from {}", address))
    }
}
