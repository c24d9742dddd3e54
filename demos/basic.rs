//! Basic example showing how to connect to a stick, scan the network and watch it

use futures::StreamExt;
use plugwise_stick::{EventPayload, EventType, Stick, StickConfig};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Serial port, or host:port of a serial-to-TCP bridge
    let port = env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    println!("Connecting to stick on {}...", port);
    let stick = Stick::open(&port, StickConfig::default()).await?;

    stick.initialize().await?;
    println!("Stick initialized");
    println!("  MAC: {:?}", stick.mac_stick().await);
    println!("  Circle+: {:?}", stick.circle_plus_mac().await);
    println!("  Network id: {:?}", stick.network_id().await);

    stick.initialize_circle_plus().await?;
    let summary = stick.scan().await?;
    println!(
        "\nDiscovered {} of {} linked nodes",
        summary.discovered, summary.registered
    );
    for mac in &summary.not_discovered {
        println!("  - {} did not answer, retried in the background", mac);
    }

    for node in stick.nodes().await {
        println!(
            "  - {} {:?} relay: {:?}",
            node.mac(),
            node.node_type(),
            node.relay_state()
        );
    }

    // Report nodes going on- and off-line
    let _sub = stick
        .subscribe(EventType::AvailabilityChanged, HashMap::new(), |event| {
            if let EventPayload::Availability { mac, available } = event.payload {
                println!("{} is now {}", mac, if available { "online" } else { "offline" });
            }
        })
        .await;

    stick.auto_update(Some(Duration::from_secs(30))).await;

    println!("\nWatching the network (press Ctrl+C to exit)...");
    let mut new_nodes = stick.event_stream_filtered(EventType::NewNode);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = new_nodes.next() => {
                println!("New node: {:?}", event.mac());
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                for node in stick.nodes().await {
                    if let Some(watts) = node.power_watts() {
                        println!("{}: {:.1} W", node.mac(), watts);
                    }
                }
            }
        }
    }

    println!("\nDisconnecting...");
    stick.disconnect().await?;

    Ok(())
}
