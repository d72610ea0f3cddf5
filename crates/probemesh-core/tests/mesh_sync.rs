//! End-to-end log synchronization against the simulated network

use probemesh_core::sim::{SimulatedNetwork, SimulatedProbe, SimulatedRepeater};
use probemesh_core::{
    runtime, ChannelTransport, DataPoint, Engine, EngineConfig, EngineHandle, LinkId,
};
use std::time::Duration;
use tokio::sync::mpsc;

const SERIAL: u32 = 0x1000_0042;
const DIRECT: LinkId = LinkId(1);

fn start(network: SimulatedNetwork) -> EngineHandle {
    let (transport, outbound) = ChannelTransport::new();
    let (events_tx, events_rx) = mpsc::channel(256);
    tokio::spawn(network.run(events_tx, outbound));
    runtime::spawn(Engine::new(EngineConfig::default(), transport), events_rx)
}

/// Poll once a simulated second until the probe reports fully synced
async fn wait_synced(handle: &EngineHandle, serial: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if handle.percent_synced(serial).await.ok().flatten() == Some(100) {
            return true;
        }
    }
    false
}

fn sequences(log: &[DataPoint]) -> Vec<u32> {
    log.iter().map(|p| p.sequence).collect()
}

#[tokio::test(start_paused = true)]
async fn test_history_syncs_over_direct_link() {
    let mut network = SimulatedNetwork::new(Duration::from_secs(1));
    let index = network.add_probe(SimulatedProbe::new(SERIAL, 7, 1000).with_history(50));
    network.connect_direct(index, DIRECT);
    let handle = start(network);

    assert!(wait_synced(&handle, SERIAL, Duration::from_secs(60)).await);

    // let the staged tail flush
    tokio::time::sleep(Duration::from_secs(1)).await;
    let log = handle.session_log(SERIAL, None).await.unwrap().unwrap();
    let seqs = sequences(&log);
    assert!(seqs.len() > 50);
    assert_eq!(seqs[0], 0);
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

    let probe = handle.probe(SERIAL).await.unwrap().unwrap();
    assert_eq!(probe.session.map(|s| s.session_id), Some(7));
    assert_eq!(probe.direct_link, Some(DIRECT));
    assert_eq!(probe.hop_count, None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_syncs_through_lossy_repeaters() {
    let mut network = SimulatedNetwork::new(Duration::from_secs(1));
    network.add_probe(SimulatedProbe::new(SERIAL, 3, 1000).with_history(40));
    network.add_repeater(SimulatedRepeater::new(LinkId(10), 1, 0.2, 11));
    network.add_repeater(SimulatedRepeater::new(LinkId(11), 2, 0.2, 12));
    let handle = start(network);

    assert!(wait_synced(&handle, SERIAL, Duration::from_secs(900)).await);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let log = handle.session_log(SERIAL, None).await.unwrap().unwrap();
    let seqs = sequences(&log);
    assert!(seqs.len() >= 40);
    assert_eq!(seqs[0], 0);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let probe = handle.probe(SERIAL).await.unwrap().unwrap();
    assert_eq!(probe.direct_link, None);
    assert!(probe.hop_count.is_some());

    let repeaters = handle.repeaters().await.unwrap();
    assert_eq!(repeaters.len(), 2);
    assert!(repeaters.iter().any(|r| r.reachable.contains(&SERIAL)));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sync_continues_after_direct_link_drops() {
    let mut network = SimulatedNetwork::new(Duration::from_secs(1));
    let index = network.add_probe(SimulatedProbe::new(SERIAL, 9, 1000).with_history(20));
    network.connect_direct(index, DIRECT);
    network.add_repeater(SimulatedRepeater::new(LinkId(10), 1, 0.0, 5));
    let handle = start(network);

    assert!(wait_synced(&handle, SERIAL, Duration::from_secs(60)).await);

    handle.disconnect(DIRECT).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let probe = handle.probe(SERIAL).await.unwrap().unwrap();
    assert_eq!(probe.direct_link, None);
    assert_eq!(probe.hop_count, Some(1));

    assert!(wait_synced(&handle, SERIAL, Duration::from_secs(120)).await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let log = handle.session_log(SERIAL, None).await.unwrap().unwrap();
    let seqs = sequences(&log);
    assert!(seqs.len() > 45);
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

    handle.shutdown().await;
}
