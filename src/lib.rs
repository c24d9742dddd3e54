//! plugwise-stick - Rust library for controlling Plugwise Zigbee USB sticks
//!
//! This library provides an async controller for a Plugwise stick and the network of
//! Circle, Circle+, Stealth, Scan and Sense nodes behind it, over a serial port or a
//! serial-to-TCP bridge.
//!
//! # Example
//!
//! ```no_run
//! use plugwise_stick::{Stick, StickConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), plugwise_stick::Error> {
//!     // Connect via serial
//!     let stick = Stick::serial("/dev/ttyUSB0", StickConfig::default()).await?;
//!
//!     // Read the network state and find the Circle+
//!     stick.initialize().await?;
//!     stick.initialize_circle_plus().await?;
//!
//!     // Identify every linked node
//!     let summary = stick.scan().await?;
//!     println!("Discovered {} of {} nodes", summary.discovered, summary.registered);
//!
//!     // Poll nodes every 30 seconds
//!     stick.auto_update(Some(Duration::from_secs(30))).await;
//!
//!     for node in stick.nodes().await {
//!         println!("{} {:?} {:?} W", node.mac(), node.node_type(), node.power_watts());
//!     }
//!
//!     stick.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod messages;
pub mod nodes;
pub mod packets;
pub mod parsing;
pub mod pending;
pub mod reader;

mod stick;

pub use config::StickConfig;
pub use connection::{ByteSink, Transport};
pub use error::Error;
pub use events::{Event, EventDispatcher, EventPayload, EventType, ScanSummary, Subscription};
pub use messages::{Payload, Request, Response};
pub use nodes::{Node, NodeKind, NodeRecord};
pub use packets::{Mac, NodeType, SeqId};
pub use pending::{Completion, Reply};
pub use stick::Stick;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;
