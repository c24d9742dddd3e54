//! Node drivers
//!
//! A [`Node`] pairs the bookkeeping the controller needs for every node
//! ([`NodeRecord`]) with the device specific state of its type ([`NodeKind`]).
//! Requests issued by a node go straight into the controller's send queue.

pub mod circle;
pub mod sed;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

use crate::events::Event;
use crate::messages::{Payload, Request, Response};
use crate::packets::{Mac, NodeType};
use crate::pending::{Outbox, Reply};

pub use circle::{Calibration, CircleState, FollowUp, PULSES_PER_KW_SECOND};
pub use sed::{ScanState, SenseState, DEFAULT_MAINTENANCE_INTERVAL};

/// Bookkeeping common to every node
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub mac: Mac,
    /// Slot in the coordinator memory, when known from a scan
    pub address: Option<u8>,
    pub node_type: NodeType,
    pub available: bool,
    /// Last time any message from the node was processed
    pub last_update: Instant,
    pub last_request: Option<Instant>,
    pub last_info_message: Option<DateTime<Utc>>,
    /// Minutes between maintenance wake-ups (SEDs only)
    pub maintenance_interval: u32,
    pub hardware: Option<String>,
    /// Firmware build time as unix seconds
    pub firmware: Option<u32>,
    pub rssi_in: Option<u8>,
    pub rssi_out: Option<u8>,
    pub ping_ms: Option<u16>,
}

/// Device specific part of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Circle(CircleState),
    CirclePlus(CircleState),
    Stealth(CircleState),
    Scan(ScanState),
    Sense(SenseState),
    /// Known type without a driver; kept so the MAC is not rediscovered
    Unmanaged(u8),
}

impl NodeKind {
    pub fn from_type(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Circle => NodeKind::Circle(CircleState::default()),
            NodeType::CirclePlus => NodeKind::CirclePlus(CircleState::default()),
            NodeType::Stealth => NodeKind::Stealth(CircleState::default()),
            NodeType::Scan => NodeKind::Scan(ScanState::default()),
            NodeType::Sense => NodeKind::Sense(SenseState::default()),
            other => NodeKind::Unmanaged(other.code()),
        }
    }

    fn circle(&self) -> Option<&CircleState> {
        match self {
            NodeKind::Circle(s) | NodeKind::CirclePlus(s) | NodeKind::Stealth(s) => Some(s),
            _ => None,
        }
    }

    fn circle_mut(&mut self) -> Option<&mut CircleState> {
        match self {
            NodeKind::Circle(s) | NodeKind::CirclePlus(s) | NodeKind::Stealth(s) => Some(s),
            _ => None,
        }
    }
}

/// A node of the network and its driver
#[derive(Debug, Clone)]
pub struct Node {
    record: NodeRecord,
    kind: NodeKind,
    outbox: Outbox,
}

impl Node {
    pub fn new(mac: Mac, address: Option<u8>, node_type: NodeType, outbox: Outbox) -> Self {
        let record = NodeRecord {
            mac,
            address,
            node_type,
            available: true,
            last_update: Instant::now(),
            last_request: None,
            last_info_message: None,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            hardware: None,
            firmware: None,
            rssi_in: None,
            rssi_out: None,
            ping_ms: None,
        };
        Self {
            record,
            kind: NodeKind::from_type(node_type),
            outbox,
        }
    }

    pub fn mac(&self) -> Mac {
        self.record.mac
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut NodeRecord {
        &mut self.record
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.record.node_type
    }

    pub fn is_managed(&self) -> bool {
        !matches!(self.kind, NodeKind::Unmanaged(_))
    }

    /// Battery powered sleepy end device
    pub fn is_sed(&self) -> bool {
        matches!(self.kind, NodeKind::Scan(_) | NodeKind::Sense(_))
    }

    /// Node with a power meter and relay
    pub fn is_metering(&self) -> bool {
        self.kind.circle().is_some()
    }

    pub fn get_available(&self) -> bool {
        self.record.available
    }

    /// Update availability; returns the event to emit when it changed
    pub fn set_available(&mut self, available: bool) -> Option<Event> {
        if self.record.available == available {
            return None;
        }
        self.record.available = available;
        if available {
            tracing::info!("Node {} is available again", self.record.mac);
        } else {
            tracing::info!("Mark node {} as unavailable", self.record.mac);
        }
        Some(Event::availability(self.record.mac, available))
    }

    /// Whether a SED missed its maintenance wake-up (with one minute of slack)
    pub fn maintenance_overdue(&self, now: Instant) -> bool {
        let window = Duration::from_secs((self.record.maintenance_interval as u64 + 1) * 60);
        now.duration_since(self.record.last_update) > window
    }

    /// Apply a message addressed to this node
    pub fn on_message(&mut self, response: &Response) -> Vec<Event> {
        let mut events = Vec::new();
        self.record.last_update = Instant::now();
        events.extend(self.set_available(true));

        match &response.payload {
            Payload::NodeInfo {
                hardware, firmware, ..
            } => {
                self.record.last_info_message = Some(Utc::now());
                self.record.hardware = Some(hardware.clone());
                self.record.firmware = Some(*firmware);
            }
            Payload::Ping {
                rssi_in,
                rssi_out,
                ping_ms,
            } => {
                self.record.rssi_in = Some(*rssi_in);
                self.record.rssi_out = Some(*rssi_out);
                self.record.ping_ms = Some(*ping_ms);
            }
            _ => {}
        }

        match &mut self.kind {
            NodeKind::Circle(state) | NodeKind::CirclePlus(state) | NodeKind::Stealth(state) => {
                match state.apply(&response.payload) {
                    FollowUp::Calibrate => {
                        self.request_calibration();
                    }
                    FollowUp::PowerBuffer => {
                        self.request_power_buffer();
                    }
                    FollowUp::None => {}
                }
            }
            NodeKind::Scan(state) => state.apply(&response.payload),
            NodeKind::Sense(state) => state.apply(&response.payload),
            NodeKind::Unmanaged(_) => {}
        }
        events
    }

    fn send(&self, request: Request) -> Reply {
        self.outbox.enqueue(request)
    }

    pub fn ping(&self) -> Reply {
        tracing::debug!("Ping node {}", self.record.mac);
        self.send(Request::Ping {
            mac: self.record.mac,
        })
    }

    pub fn update_power_usage(&self) -> Option<Reply> {
        self.is_metering().then(|| {
            self.send(Request::PowerUsage {
                mac: self.record.mac,
            })
        })
    }

    pub fn request_calibration(&self) -> Option<Reply> {
        self.is_metering().then(|| {
            self.send(Request::Calibration {
                mac: self.record.mac,
            })
        })
    }

    /// Refresh node info; with `then_buffer` the log buffer is read once it arrives
    pub fn request_info(&mut self, then_buffer: bool) -> Reply {
        if let Some(state) = self.kind.circle_mut() {
            state.buffer_after_info = then_buffer;
        }
        self.send(Request::NodeInfo {
            mac: self.record.mac,
        })
    }

    pub fn request_power_buffer(&self) -> Option<Reply> {
        let log_address = self.kind.circle()?.last_log_address?;
        Some(self.send(Request::PowerBuffer {
            mac: self.record.mac,
            log_address,
        }))
    }

    pub fn sync_clock(&self) -> Option<Reply> {
        self.is_metering().then(|| {
            tracing::info!("Sync clock of node {}", self.record.mac);
            self.send(Request::ClockSet {
                mac: self.record.mac,
                time: Utc::now(),
            })
        })
    }

    pub fn switch_relay(&self, on: bool) -> Option<Reply> {
        self.is_metering().then(|| {
            self.send(Request::SwitchRelay {
                mac: self.record.mac,
                on,
            })
        })
    }

    /// Non-metering nodes have no log to collect
    pub fn last_log_collected(&self) -> bool {
        self.kind.circle().map_or(true, |s| s.last_log_collected)
    }

    pub fn relay_state(&self) -> Option<bool> {
        self.kind.circle().map(|s| s.relay_state)
    }

    pub fn power_watts(&self) -> Option<f64> {
        self.kind.circle()?.power_watts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::SeqId;
    use crate::pending::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn mac() -> Mac {
        Mac::parse("000D6F0000B1B64B").unwrap()
    }

    fn node(node_type: NodeType) -> (Node, UnboundedReceiver<Outbound>) {
        let (outbox, rx) = Outbox::new();
        (Node::new(mac(), Some(3), node_type, outbox), rx)
    }

    fn response(payload: Payload) -> Response {
        Response::new(SeqId(1), Some(mac()), payload)
    }

    #[test]
    fn test_kind_from_type() {
        assert!(matches!(NodeKind::from_type(NodeType::Circle), NodeKind::Circle(_)));
        assert!(matches!(NodeKind::from_type(NodeType::Scan), NodeKind::Scan(_)));
        assert_eq!(NodeKind::from_type(NodeType::Switch), NodeKind::Unmanaged(3));
        assert_eq!(NodeKind::from_type(NodeType::CelsiusNr), NodeKind::Unmanaged(8));
        assert_eq!(NodeKind::from_type(NodeType::Unknown(42)), NodeKind::Unmanaged(42));
    }

    #[tokio::test]
    async fn test_capabilities() {
        let (circle, _rx) = node(NodeType::Circle);
        assert!(circle.is_managed());
        assert!(circle.is_metering());
        assert!(!circle.is_sed());

        let (sense, _rx) = node(NodeType::Sense);
        assert!(sense.is_sed());
        assert!(!sense.is_metering());
        assert!(sense.update_power_usage().is_none());
        assert!(sense.last_log_collected());

        let (switch, _rx) = node(NodeType::Switch);
        assert!(!switch.is_managed());
    }

    #[tokio::test]
    async fn test_availability_events() {
        let (mut circle, _rx) = node(NodeType::Circle);
        assert!(circle.set_available(true).is_none());
        let event = circle.set_available(false).unwrap();
        assert_eq!(event.attributes.get("available").unwrap(), "false");

        let events = circle.on_message(&response(Payload::Ping {
            rssi_in: 70,
            rssi_out: 72,
            ping_ms: 9,
        }));
        assert_eq!(events.len(), 1);
        assert!(circle.get_available());
        assert_eq!(circle.record().ping_ms, Some(9));
    }

    #[tokio::test]
    async fn test_power_usage_requests_calibration() {
        let (mut circle, mut rx) = node(NodeType::Circle);
        circle.on_message(&response(Payload::PowerUsage {
            pulses_1s: 10,
            pulses_8s: 80,
            pulses_hour: 1000,
        }));
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.request, Request::Calibration { mac: mac() });
    }

    #[tokio::test]
    async fn test_info_refresh_chains_buffer_request() {
        let (mut circle, mut rx) = node(NodeType::Stealth);
        assert!(circle.request_power_buffer().is_none());
        let _reply = circle.request_info(true);
        assert!(rx.try_recv().unwrap().request.is_node_info());

        circle.on_message(&response(Payload::NodeInfo {
            node_type: NodeType::Stealth,
            relay_state: false,
            last_log_address: 0x00044000,
            frequency: 0x85,
            hardware: "000000470000".to_string(),
            firmware: 0,
        }));
        assert!(circle.record().last_info_message.is_some());
        let sent = rx.try_recv().unwrap();
        assert_eq!(
            sent.request,
            Request::PowerBuffer {
                mac: mac(),
                log_address: 0x00044000
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_overdue() {
        let (sense, _rx) = node(NodeType::Sense);
        assert!(!sense.maintenance_overdue(Instant::now()));
        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert!(!sense.maintenance_overdue(Instant::now()));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(sense.maintenance_overdue(Instant::now()));
    }
}
