//! Scripted stick used by the integration tests
//!
//! Every request is accepted with a small success ack carrying the next sequence id,
//! then answered the way a real network with the configured nodes would.

#![allow(dead_code)]

use async_trait::async_trait;
use plugwise_stick::packets::{AckCode, AckSize, MESSAGE_FOOTER, MESSAGE_HEADER};
use plugwise_stick::parsing::{read_hex_u8, read_mac, verify_frame, CRC_LEN};
use plugwise_stick::{ByteSink, Mac, NodeType, Payload, Response, SeqId, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const STICK: &str = "000D6F0000AAAAAA";
pub const CIRCLE_PLUS: &str = "000D6F0000C0FFEE";
/// Coordinator MAC as the stick reports it, with the network prefix byte
pub const CIRCLE_PLUS_REPORTED: &str = "AB0D6F0000C0FFEE";

pub fn mac(s: &str) -> Mac {
    Mac::parse(s).unwrap()
}

#[derive(Default)]
struct Network {
    sink: Option<ByteSink>,
    seq: u16,
    nodes: HashMap<Mac, NodeType>,
    linked: Vec<Mac>,
    /// Known to the coordinator but never answering
    silent: HashSet<Mac>,
    /// Answered with a timeout ack by the stick
    unreachable: HashSet<Mac>,
    sent: Vec<String>,
}

/// Fake stick transport
pub struct FakeStick {
    network: Mutex<Network>,
}

impl FakeStick {
    /// A network holding only the Circle+
    pub fn new() -> Arc<Self> {
        let mut network = Network::default();
        network.nodes.insert(mac(CIRCLE_PLUS), NodeType::CirclePlus);
        Arc::new(Self {
            network: Mutex::new(network),
        })
    }

    fn network(&self) -> MutexGuard<'_, Network> {
        self.network.lock().unwrap()
    }

    /// Add a node linked to the Circle+
    pub fn link(&self, node: &str, node_type: NodeType) {
        let mut network = self.network();
        network.nodes.insert(mac(node), node_type);
        network.linked.push(mac(node));
    }

    /// Add a linked node that never answers
    pub fn link_silent(&self, node: &str) {
        let mut network = self.network();
        network.linked.push(mac(node));
        network.silent.insert(mac(node));
    }

    /// Add a linked node the stick cannot reach
    pub fn link_unreachable(&self, node: &str) {
        let mut network = self.network();
        network.linked.push(mac(node));
        network.unreachable.insert(mac(node));
    }

    /// Bodies of all requests written so far
    pub fn sent(&self) -> Vec<String> {
        self.network().sent.clone()
    }

    /// Number of requests written with the given id to `node`
    pub fn count(&self, id: &str, node: &str) -> usize {
        let prefix = format!("{}{}", id, node);
        self.sent().iter().filter(|b| b.starts_with(&prefix)).count()
    }

    /// Deliver an unsolicited message
    pub fn push(&self, response: Response) {
        if let Some(sink) = &self.network().sink {
            let _ = sink.send(response.frame());
        }
    }

    /// Close the byte stream as if the stick was unplugged
    pub fn hang_up(&self) {
        self.network().sink = None;
    }

    fn answer(network: &mut Network, body: &str) -> Vec<Response> {
        network.seq += 1;
        let seq = SeqId(network.seq);
        let small = |code| Response::new(seq, None, Payload::Ack { code, size: AckSize::Small });
        let mut replies = vec![small(AckCode::Success)];

        let id = &body[..4];
        let Ok(target) = read_mac(body, 4) else {
            if id == "000A" {
                replies.push(Response::new(
                    seq,
                    Some(mac(STICK)),
                    Payload::StickInit {
                        network_online: true,
                        circle_plus_mac: mac(CIRCLE_PLUS_REPORTED),
                        network_id: 0x4E51,
                    },
                ));
            } else if id == "0008" {
                replies.push(small(AckCode::JoinAccepted));
            }
            return replies;
        };

        if network.unreachable.contains(&target) {
            replies.push(small(AckCode::Timeout));
            return replies;
        }
        if network.silent.contains(&target) {
            return replies;
        }

        let reply = |payload| Response::new(seq, Some(target), payload);
        let large = |code| reply(Payload::Ack { code, size: AckSize::Large });
        match id {
            "0023" => {
                if let Some(node_type) = network.nodes.get(&target) {
                    replies.push(reply(Payload::NodeInfo {
                        node_type: *node_type,
                        relay_state: false,
                        last_log_address: 0x00044000,
                        frequency: 0x85,
                        hardware: "000000470000".to_string(),
                        firmware: 0x4E0843A9,
                    }));
                }
            }
            "000D" => replies.push(reply(Payload::Ping {
                rssi_in: 70,
                rssi_out: 72,
                ping_ms: 8,
            })),
            "0012" => replies.push(reply(Payload::PowerUsage {
                pulses_1s: 469,
                pulses_8s: 3752,
                pulses_hour: 1000,
            })),
            "0026" => replies.push(reply(Payload::Calibration {
                gain_a: 1.0,
                gain_b: 0.0,
                off_total: 0.0,
                off_noise: 0.0,
            })),
            "0048" => replies.push(reply(Payload::PowerBuffer {
                pulses: [1, 2, 3, 4],
                log_address: 0x00044000,
            })),
            "0016" => replies.push(large(AckCode::ClockSet)),
            "0017" => {
                let on = read_hex_u8(body, 20).unwrap_or(0) == 1;
                replies.push(large(if on { AckCode::RelayOn } else { AckCode::RelayOff }));
            }
            "0018" => {
                let address = read_hex_u8(body, 20).unwrap_or(0);
                let linked_mac = network
                    .linked
                    .get(address as usize)
                    .copied()
                    .unwrap_or(Mac::EMPTY_SLOT);
                replies.push(reply(Payload::CirclePlusScan {
                    linked_mac,
                    address,
                }));
            }
            "001C" => {
                if let Ok(removed) = read_mac(body, 20) {
                    network.nodes.remove(&removed);
                    network.linked.retain(|m| *m != removed);
                    replies.push(reply(Payload::NodeRemoved {
                        removed,
                        success: true,
                    }));
                }
            }
            _ => {}
        }
        replies
    }
}

#[async_trait]
impl Transport for FakeStick {
    async fn connect(&self, sink: ByteSink) -> plugwise_stick::Result<()> {
        self.network().sink = Some(sink);
        Ok(())
    }

    async fn disconnect(&self) -> plugwise_stick::Result<()> {
        self.network().sink = None;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> plugwise_stick::Result<()> {
        let content = &data[MESSAGE_HEADER.len()..data.len() - MESSAGE_FOOTER.len()];
        let body = verify_frame(content)?.to_string();
        assert_eq!(content.len(), body.len() + CRC_LEN);

        let mut network = self.network();
        network.sent.push(body.clone());
        let replies = FakeStick::answer(&mut network, &body);
        if let Some(sink) = &network.sink {
            for reply in replies {
                let _ = sink.send(reply.frame());
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.network().sink.is_some()
    }

    fn reader_alive(&self) -> bool {
        self.is_connected()
    }

    fn writer_alive(&self) -> bool {
        self.is_connected()
    }
}
