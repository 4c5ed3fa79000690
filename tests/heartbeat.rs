use anyhow::Result;
use olivia::dht::PeerList;
use olivia::network::heartbeat;
use olivia::{Config, MessageHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;
use common::utils::CountingPeer;

fn peer_list(max_peers: usize) -> PeerList {
    let config = Config {
        max_peers,
        ..Config::default()
    };
    PeerList::new(Arc::new(MessageHandler::new(&config)), &config)
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_reaches_every_occupied_slot() -> Result<()> {
    let primary: Vec<_> = ["p0:1", "p2:1", "p4:1"]
        .iter()
        .map(|address| CountingPeer::new(address))
        .collect();
    let backup = CountingPeer::new("b1:1");

    let mut list = peer_list(5);
    list.add_peer(0, primary[0].clone())?;
    list.add_peer(2, primary[1].clone())?;
    list.add_peer(4, primary[2].clone())?;
    list.add_backup_peer(1, backup.clone())?;
    assert_eq!(list.peers.len(), 3);
    assert_eq!(list.backup_peers.len(), 1);

    let handle = heartbeat(
        Duration::from_millis(100),
        Duration::from_secs(1),
        &list,
        CancellationToken::new(),
    );

    tokio::time::sleep(Duration::from_millis(1050)).await;
    handle.shutdown().await;

    for peer in &primary {
        assert_eq!(peer.probes(), 10, "{:?}", peer);
        assert_eq!(peer.pulls(), 1, "{:?}", peer);
    }
    assert_eq!(backup.probes(), 1);
    assert_eq!(backup.pulls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_the_parent_token_stops_all_loops() -> Result<()> {
    let peer = CountingPeer::new("p0:1");
    let backup = CountingPeer::new("b0:1");
    let mut list = peer_list(1);
    list.add_peer(0, peer.clone())?;
    list.add_backup_peer(0, backup.clone())?;

    let shutdown = CancellationToken::new();
    let handle = heartbeat(
        Duration::from_millis(50),
        Duration::from_millis(200),
        &list,
        shutdown.child_token(),
    );

    tokio::time::sleep(Duration::from_millis(450)).await;
    shutdown.cancel();
    for _ in 0..10 {
        if handle.is_stopped() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(handle.is_stopped());

    let (probes, pulls, backup_probes) = (peer.probes(), peer.pulls(), backup.probes());
    assert!(probes >= 8);
    assert!(pulls >= 2);
    assert!(backup_probes >= 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(peer.probes(), probes);
    assert_eq!(peer.pulls(), pulls);
    assert_eq!(backup.probes(), backup_probes);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stopping_one_loop_leaves_the_others_running() -> Result<()> {
    let peer = CountingPeer::new("p0:1");
    let mut set = olivia::dht::PeerSet::with_capacity(1);
    set.insert(0, peer.clone())?;

    let probe_stop = CancellationToken::new();
    let pull_stop = CancellationToken::new();
    let probes = tokio::spawn(olivia::network::heartbeat_remote_nodes(
        set.clone(),
        Duration::from_millis(100),
        probe_stop.clone(),
    ));
    let pulls = tokio::spawn(olivia::network::get_remote_bloom_filters(
        set,
        Duration::from_millis(100),
        pull_stop.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(250)).await;
    probe_stop.cancel();
    probes.await?;
    let probes_at_stop = peer.probes();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(peer.probes(), probes_at_stop);
    assert_eq!(peer.pulls(), 5);

    pull_stop.cancel();
    pulls.await?;
    Ok(())
}
