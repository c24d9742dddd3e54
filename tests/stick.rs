mod common;

use common::{mac, FakeStick, CIRCLE_PLUS, STICK};
use plugwise_stick::{
    Completion, Error, EventType, NodeType, Payload, Request, Stick, StickConfig, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const CIRCLE_A: &str = "000D6F0000000001";
const CIRCLE_B: &str = "000D6F0000000002";
const SILENT: &str = "000D6F0000000003";

async fn connected(fake: &Arc<FakeStick>) -> Stick {
    let stick = Stick::new(fake.clone(), StickConfig::default());
    stick.connect().await.unwrap();
    stick
}

async fn initialized(fake: &Arc<FakeStick>) -> Stick {
    let stick = connected(fake).await;
    stick.initialize().await.unwrap();
    stick.initialize_circle_plus().await.unwrap();
    stick
}

#[tokio::test(start_paused = true)]
async fn test_initialize_reads_network_state() {
    let fake = FakeStick::new();
    let stick = initialized(&fake).await;

    assert_eq!(stick.mac_stick().await, Some(mac(STICK)));
    assert_eq!(stick.circle_plus_mac().await, Some(mac(CIRCLE_PLUS)));
    assert_eq!(stick.network_id().await, Some(0x4E51));
    assert!(stick.network_online().await);

    let coordinator = stick.node(mac(CIRCLE_PLUS)).await.unwrap();
    assert_eq!(coordinator.node_type(), NodeType::CirclePlus);
    assert_eq!(fake.sent()[0], "000A");
}

#[tokio::test(start_paused = true)]
async fn test_initialize_requires_connection() {
    let fake = FakeStick::new();
    let stick = Stick::new(fake.clone(), StickConfig::default());
    assert!(matches!(stick.initialize().await, Err(Error::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn test_request_completes_on_response() {
    let fake = FakeStick::new();
    let stick = initialized(&fake).await;

    let reply = stick.send(Request::Ping {
        mac: mac(CIRCLE_PLUS),
    });
    match reply.await.unwrap() {
        Completion::Done(response) => {
            assert!(matches!(response.payload, Payload::Ping { ping_ms: 8, .. }))
        }
        other => panic!("unexpected completion {:?}", other),
    }
    assert_eq!(stick.pending_count().await, 0);
    assert_eq!(fake.count("000D", CIRCLE_PLUS), 1);

    let record = stick.node(mac(CIRCLE_PLUS)).await.unwrap().record().clone();
    assert_eq!(record.rssi_in, Some(70));
    assert_eq!(record.ping_ms, Some(8));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_is_resent_then_dropped() {
    let fake = FakeStick::new();
    fake.link_silent(SILENT);
    let stick = initialized(&fake).await;

    let started = Instant::now();
    let reply = stick.send(Request::Ping { mac: mac(SILENT) });
    // the channel closes once the retry budget is used up
    assert!(reply.await.is_err());

    let max_retries = StickConfig::default().max_retries as usize;
    assert_eq!(fake.count("000D", SILENT), max_retries + 1);
    assert!(started.elapsed() > StickConfig::default().message_timeout * (max_retries as u32));
    assert_eq!(stick.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scan_completes_without_silent_node() {
    let fake = FakeStick::new();
    fake.link(CIRCLE_A, NodeType::Circle);
    fake.link(CIRCLE_B, NodeType::Stealth);
    fake.link_silent(SILENT);
    let stick = initialized(&fake).await;
    let mut events = stick.dispatcher().receiver();

    let summary = stick.scan().await.unwrap();
    assert_eq!(summary.registered, 3);
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.not_discovered, vec![mac(SILENT)]);

    let macs: Vec<_> = stick.nodes().await.iter().map(|n| n.mac()).collect();
    assert_eq!(macs, vec![mac(CIRCLE_A), mac(CIRCLE_B), mac(CIRCLE_PLUS)]);
    assert_eq!(stick.registered_nodes().await, 4);
    assert_eq!(
        stick.node(mac(CIRCLE_A)).await.unwrap().record().address,
        Some(0)
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type);
    }
    assert_eq!(
        seen.iter().filter(|t| **t == EventType::NewNode).count(),
        2
    );
    assert!(seen.contains(&EventType::ScanFinished));
}

#[tokio::test(start_paused = true)]
async fn test_scan_reports_unreachable_node_offline() {
    let fake = FakeStick::new();
    fake.link(CIRCLE_A, NodeType::Circle);
    fake.link_unreachable(SILENT);
    let stick = initialized(&fake).await;

    let started = Instant::now();
    let summary = stick.scan().await.unwrap();
    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.not_discovered, vec![mac(SILENT)]);
    // the negative acknowledgement ends the scan before the discovery timer
    assert!(started.elapsed() < StickConfig::default().discovery_timeout(2));
}

#[tokio::test(start_paused = true)]
async fn test_switch_relay() {
    let fake = FakeStick::new();
    fake.link(CIRCLE_A, NodeType::Circle);
    let stick = initialized(&fake).await;
    stick.scan().await.unwrap();

    let reply = stick.switch_relay(mac(CIRCLE_A), true).await.unwrap();
    assert!(matches!(reply.await, Ok(Completion::Done(_))));
    assert_eq!(
        stick.node(mac(CIRCLE_A)).await.unwrap().relay_state(),
        Some(true)
    );
    assert_eq!(fake.count("0017", CIRCLE_A), 1);

    assert!(stick.switch_relay(mac(SILENT), true).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unjoin_removes_node() {
    let fake = FakeStick::new();
    fake.link(CIRCLE_A, NodeType::Circle);
    let stick = initialized(&fake).await;
    stick.scan().await.unwrap();
    assert!(stick.node(mac(CIRCLE_A)).await.is_some());

    let mut events = stick.dispatcher().receiver();
    stick.node_unjoin(CIRCLE_A).await.unwrap();
    let event = loop {
        let event = events.recv().await.unwrap();
        if event.event_type == EventType::NodeRemoved {
            break event;
        }
    };
    assert_eq!(event.mac(), Some(mac(CIRCLE_A)));
    assert!(stick.node(mac(CIRCLE_A)).await.is_none());
    assert_eq!(stick.registered_nodes().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_update_collects_power() {
    let fake = FakeStick::new();
    fake.link(CIRCLE_A, NodeType::Circle);
    let stick = initialized(&fake).await;
    stick.scan().await.unwrap();

    stick.auto_update(Some(Duration::from_secs(10))).await;
    tokio::time::sleep(Duration::from_secs(25)).await;

    let watts = stick.node(mac(CIRCLE_A)).await.unwrap().power_watts();
    assert!(watts.is_some_and(|w| w > 0.0));
    assert!(fake.count("0012", CIRCLE_A) >= 2);
    assert!(fake.count("0026", CIRCLE_A) >= 1);

    stick.auto_update(Some(Duration::ZERO)).await;
    let sent = fake.sent().len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fake.sent().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_emits_disconnected() {
    let fake = FakeStick::new();
    let stick = initialized(&fake).await;
    let mut events = stick.dispatcher().receiver();

    fake.hang_up();
    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.event_type == EventType::Disconnected {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert!(event.mac().is_none());
    assert!(!fake.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_requests() {
    let fake = FakeStick::new();
    let stick = initialized(&fake).await;
    stick.disconnect().await.unwrap();
    assert_eq!(stick.pending_count().await, 0);

    let sent = fake.sent().len();
    let reply = stick.send(Request::Ping {
        mac: mac(CIRCLE_PLUS),
    });
    assert!(tokio::time::timeout(Duration::from_secs(5), reply).await.is_err());
    assert_eq!(fake.sent().len(), sent);
}
