use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::dht::PeerList;
use crate::message::{encode_frame, read_frame, FrameTooLarge, MessageHandler, Request, Response};

/// Running inbound router
#[derive(Debug)]
pub struct RouterHandle {
    local_addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RouterHandle {
    /// Address the router actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the accept loop to exit
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            error!("❌ Router task failed: {}", e);
        }
        info!("❎ Router on {} stopped", self.local_addr);
    }
}

/// Binds the configured listen address and serves requests until stopped
pub async fn start_network_router(
    handler: Arc<MessageHandler>,
    cache: Arc<Cache>,
    peer_list: Arc<PeerList>,
    config: &Config,
) -> Result<RouterHandle> {
    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("Failed to bind router to {}", config.listen_address))?;
    let local_addr = listener.local_addr().context("Failed to read router address")?;
    info!("✅ Router listening on {}", local_addr);

    let stop = CancellationToken::new();
    let task = tokio::spawn(accept_loop(listener, handler, cache, peer_list, stop.clone()));

    Ok(RouterHandle {
        local_addr,
        stop,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<MessageHandler>,
    cache: Arc<Cache>,
    peer_list: Arc<PeerList>,
    stop: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, remote)) => {
                trace!("Accepted connection from {}", remote);
                let handler = Arc::clone(&handler);
                let cache = Arc::clone(&cache);
                let peer_list = Arc::clone(&peer_list);
                let stop = stop.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        served = serve_connection(socket, &handler, &cache, &peer_list) => {
                            if let Err(e) = served {
                                warn!("⚠️ Connection from {} failed: {:#}", remote, e);
                            }
                        }
                    }
                });
            }
            Err(e) => error!("❌ Failed to accept connection: {}", e),
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    handler: &MessageHandler,
    cache: &Cache,
    peer_list: &PeerList,
) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let line = match read_frame(&mut reader, handler.max_frame_bytes()).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.is::<FrameTooLarge>() => {
                warn!("⚠️ Dropping connection after oversized request: {}", e);
                let response = Response::Error {
                    message: format!("Request rejected: {}", e),
                };
                writer
                    .write_all(&encode_frame(&response)?)
                    .await
                    .context("Failed to write response")?;
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to read request"),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handler.handle(request, cache, peer_list).await,
            Err(e) => {
                debug!("📝 Rejecting malformed request: {}", e);
                Response::Error {
                    message: format!("Parse error: {}", e),
                }
            }
        };

        writer
            .write_all(&encode_frame(&response)?)
            .await
            .context("Failed to write response")?;
    }

    trace!("Connection closed by client");
    Ok(())
}
