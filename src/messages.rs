//! Typed request and response messages
//!
//! Requests know how to encode themselves into a framed message and which response
//! kind completes them. Responses are decoded from a validated frame body by
//! [`Response::decode`].

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::Error;
use crate::packets::{request_id, AckCode, AckSize, Mac, NodeType, ResponseId, SeqId};
use crate::parsing::*;
use crate::Result;

/// Outbound request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask the stick for its MAC, network state and coordinator MAC
    StickInit,
    NodeInfo { mac: Mac },
    Ping { mac: Mac },
    PowerUsage { mac: Mac },
    Calibration { mac: Mac },
    SwitchRelay { mac: Mac, on: bool },
    /// Read one slot of the coordinator's link table
    CirclePlusScan { mac: Mac, address: u8 },
    ClockGet { mac: Mac },
    ClockSet { mac: Mac, time: DateTime<Utc> },
    RealTimeClockGet { mac: Mac },
    PowerBuffer { mac: Mac, log_address: u32 },
    /// Add a node to the coordinator memory
    NodeAdd { mac: Mac, accept: bool },
    AllowJoining { enable: bool },
    /// Remove `mac` from the network through the coordinator
    NodeRemove { coordinator: Mac, mac: Mac },
}

impl Request {
    /// Message identifier on the wire
    pub fn id(&self) -> &'static str {
        match self {
            Request::StickInit => request_id::STICK_INIT,
            Request::NodeInfo { .. } => request_id::NODE_INFO,
            Request::Ping { .. } => request_id::NODE_PING,
            Request::PowerUsage { .. } => request_id::CIRCLE_POWER_USAGE,
            Request::Calibration { .. } => request_id::CIRCLE_CALIBRATION,
            Request::SwitchRelay { .. } => request_id::CIRCLE_SWITCH_RELAY,
            Request::CirclePlusScan { .. } => request_id::CIRCLE_PLUS_SCAN,
            Request::ClockGet { .. } => request_id::CIRCLE_CLOCK_GET,
            Request::ClockSet { .. } => request_id::CIRCLE_CLOCK_SET,
            Request::RealTimeClockGet { .. } => request_id::CIRCLE_PLUS_REAL_TIME_CLOCK_GET,
            Request::PowerBuffer { .. } => request_id::CIRCLE_POWER_BUFFER,
            Request::NodeAdd { .. } => request_id::NODE_ADD,
            Request::AllowJoining { .. } => request_id::NODE_ALLOW_JOINING,
            Request::NodeRemove { .. } => request_id::NODE_REMOVE,
        }
    }

    /// Human readable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::StickInit => "StickInitRequest",
            Request::NodeInfo { .. } => "NodeInfoRequest",
            Request::Ping { .. } => "NodePingRequest",
            Request::PowerUsage { .. } => "CirclePowerUsageRequest",
            Request::Calibration { .. } => "CircleCalibrationRequest",
            Request::SwitchRelay { .. } => "CircleSwitchRelayRequest",
            Request::CirclePlusScan { .. } => "CirclePlusScanRequest",
            Request::ClockGet { .. } => "CircleClockGetRequest",
            Request::ClockSet { .. } => "CircleClockSetRequest",
            Request::RealTimeClockGet { .. } => "CirclePlusRealTimeClockGetRequest",
            Request::PowerBuffer { .. } => "CirclePowerBufferRequest",
            Request::NodeAdd { .. } => "NodeAddRequest",
            Request::AllowJoining { .. } => "NodeAllowJoiningRequest",
            Request::NodeRemove { .. } => "NodeRemoveRequest",
        }
    }

    /// Node the request is addressed to, if any
    pub fn mac(&self) -> Option<Mac> {
        match self {
            Request::StickInit | Request::AllowJoining { .. } => None,
            Request::NodeRemove { coordinator, .. } => Some(*coordinator),
            Request::NodeInfo { mac }
            | Request::Ping { mac }
            | Request::PowerUsage { mac }
            | Request::Calibration { mac }
            | Request::SwitchRelay { mac, .. }
            | Request::CirclePlusScan { mac, .. }
            | Request::ClockGet { mac }
            | Request::ClockSet { mac, .. }
            | Request::RealTimeClockGet { mac }
            | Request::PowerBuffer { mac, .. }
            | Request::NodeAdd { mac, .. } => Some(*mac),
        }
    }

    /// Response kind that completes this request; `None` accepts any terminal answer
    pub fn expected_response(&self) -> Option<ResponseId> {
        match self {
            Request::StickInit => Some(ResponseId::StickInit),
            Request::NodeInfo { .. } => Some(ResponseId::NodeInfo),
            Request::Ping { .. } => Some(ResponseId::PingResponse),
            Request::PowerUsage { .. } => Some(ResponseId::PowerUsage),
            Request::Calibration { .. } => Some(ResponseId::Calibration),
            Request::SwitchRelay { .. } => Some(ResponseId::Ack),
            Request::CirclePlusScan { .. } => Some(ResponseId::CirclePlusScan),
            Request::ClockGet { .. } => Some(ResponseId::Clock),
            Request::RealTimeClockGet { .. } => Some(ResponseId::RealTimeClock),
            Request::PowerBuffer { .. } => Some(ResponseId::PowerBuffer),
            Request::NodeRemove { .. } => Some(ResponseId::NodeRemove),
            Request::ClockSet { .. } | Request::NodeAdd { .. } | Request::AllowJoining { .. } => {
                None
            }
        }
    }

    pub fn is_node_info(&self) -> bool {
        matches!(self, Request::NodeInfo { .. })
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, Request::Ping { .. })
    }

    pub fn is_power_usage(&self) -> bool {
        matches!(self, Request::PowerUsage { .. })
    }

    /// Message body without header, checksum and footer
    pub fn encode(&self) -> String {
        let mut body = String::from(self.id());
        match self {
            Request::StickInit => {}
            Request::NodeInfo { mac }
            | Request::Ping { mac }
            | Request::PowerUsage { mac }
            | Request::Calibration { mac }
            | Request::ClockGet { mac }
            | Request::RealTimeClockGet { mac } => body.push_str(&mac.to_string()),
            Request::SwitchRelay { mac, on } => {
                body.push_str(&mac.to_string());
                body.push_str(if *on { "01" } else { "00" });
            }
            Request::CirclePlusScan { mac, address } => {
                body.push_str(&mac.to_string());
                body.push_str(&format!("{:02X}", address));
            }
            Request::ClockSet { mac, time } => {
                body.push_str(&mac.to_string());
                body.push_str(&format!(
                    "{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                    time.year().rem_euclid(100),
                    time.month(),
                    time.day(),
                    time.hour(),
                    time.minute(),
                    time.second(),
                    time.weekday().num_days_from_monday()
                ));
            }
            Request::PowerBuffer { mac, log_address } => {
                body.push_str(&mac.to_string());
                body.push_str(&format!("{:08X}", log_address));
            }
            Request::NodeAdd { mac, accept } => {
                body.push_str(if *accept { "01" } else { "00" });
                body.push_str(&mac.to_string());
            }
            Request::AllowJoining { enable } => body.push_str(if *enable { "01" } else { "00" }),
            Request::NodeRemove { coordinator, mac } => {
                body.push_str(&coordinator.to_string());
                body.push_str(&mac.to_string());
            }
        }
        body
    }

    /// Complete frame ready for the transport
    pub fn frame(&self) -> Vec<u8> {
        frame_message(&self.encode())
    }
}

/// Kind-specific fields of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ack {
        code: AckCode,
        size: AckSize,
    },
    StickInit {
        network_online: bool,
        /// As reported, still carrying the network prefix byte
        circle_plus_mac: Mac,
        network_id: u16,
    },
    NodeInfo {
        node_type: NodeType,
        relay_state: bool,
        last_log_address: u32,
        frequency: u8,
        hardware: String,
        firmware: u32,
    },
    Ping {
        rssi_in: u8,
        rssi_out: u8,
        ping_ms: u16,
    },
    PowerUsage {
        pulses_1s: u16,
        pulses_8s: u16,
        pulses_hour: u32,
    },
    Calibration {
        gain_a: f32,
        gain_b: f32,
        off_total: f32,
        off_noise: f32,
    },
    CirclePlusScan {
        linked_mac: Mac,
        address: u8,
    },
    Clock {
        hour: u8,
        minute: u8,
        second: u8,
        weekday: u8,
    },
    RealTimeClock {
        second: u8,
        minute: u8,
        hour: u8,
        weekday: u8,
        day: u8,
        month: u8,
        year: u8,
    },
    PowerBuffer {
        pulses: [u32; 4],
        log_address: u32,
    },
    Awake {
        awake_type: u8,
    },
    JoinAvailable,
    JoinAck,
    NodeRemoved {
        removed: Mac,
        success: bool,
    },
    SwitchGroup {
        group: u8,
        on: bool,
    },
    SenseReport {
        humidity: u16,
        temperature: u16,
    },
    Unknown {
        id: u16,
        fields: String,
    },
}

impl Payload {
    /// Wire identifier of this payload
    pub fn id(&self) -> ResponseId {
        match self {
            Payload::Ack { size: AckSize::Standard, .. } => ResponseId::NodeAck,
            Payload::Ack { .. } => ResponseId::Ack,
            Payload::StickInit { .. } => ResponseId::StickInit,
            Payload::NodeInfo { .. } => ResponseId::NodeInfo,
            Payload::Ping { .. } => ResponseId::PingResponse,
            Payload::PowerUsage { .. } => ResponseId::PowerUsage,
            Payload::Calibration { .. } => ResponseId::Calibration,
            Payload::CirclePlusScan { .. } => ResponseId::CirclePlusScan,
            Payload::Clock { .. } => ResponseId::Clock,
            Payload::RealTimeClock { .. } => ResponseId::RealTimeClock,
            Payload::PowerBuffer { .. } => ResponseId::PowerBuffer,
            Payload::Awake { .. } => ResponseId::Awake,
            Payload::JoinAvailable => ResponseId::JoinAvailable,
            Payload::JoinAck => ResponseId::JoinAck,
            Payload::NodeRemoved { .. } => ResponseId::NodeRemove,
            Payload::SwitchGroup { .. } => ResponseId::SwitchGroup,
            Payload::SenseReport { .. } => ResponseId::SenseReport,
            Payload::Unknown { id, .. } => ResponseId::Unknown(*id),
        }
    }

    fn raw_id(&self) -> u16 {
        match self.id() {
            ResponseId::Ack => 0x0000,
            ResponseId::NodeAck => 0x0100,
            ResponseId::JoinAvailable => 0x0006,
            ResponseId::PingResponse => 0x000E,
            ResponseId::StickInit => 0x0011,
            ResponseId::PowerUsage => 0x0013,
            ResponseId::CirclePlusScan => 0x0019,
            ResponseId::NodeRemove => 0x001D,
            ResponseId::NodeInfo => 0x0024,
            ResponseId::Calibration => 0x0027,
            ResponseId::RealTimeClock => 0x003A,
            ResponseId::Clock => 0x003F,
            ResponseId::PowerBuffer => 0x0049,
            ResponseId::Awake => 0x004F,
            ResponseId::SwitchGroup => 0x0056,
            ResponseId::JoinAck => 0x0061,
            ResponseId::SenseReport => 0x0105,
            ResponseId::Unknown(id) => id,
        }
    }
}

/// Inbound message, already validated and decoded
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub seq_id: SeqId,
    /// Originating node; `None` for small acks from the stick itself
    pub mac: Option<Mac>,
    pub payload: Payload,
}

// Offsets into the body: id at 0, sequence id at 4, MAC (when present) at 8.
const SEQ_OFFSET: usize = 4;
const MAC_OFFSET: usize = 8;
const FIELDS_OFFSET: usize = 24;
const SMALL_ACK_LEN: usize = 12;

impl Response {
    pub fn new(seq_id: SeqId, mac: Option<Mac>, payload: Payload) -> Self {
        Self {
            seq_id,
            mac,
            payload,
        }
    }

    /// Message name used in logs
    pub fn name(&self) -> &'static str {
        match &self.payload {
            Payload::Ack { size: AckSize::Small, .. } => "NodeAckSmallResponse",
            Payload::Ack { size: AckSize::Standard, .. } => "NodeAckResponse",
            Payload::Ack { size: AckSize::Large, .. } => "NodeAckLargeResponse",
            Payload::StickInit { .. } => "StickInitResponse",
            Payload::NodeInfo { .. } => "NodeInfoResponse",
            Payload::Ping { .. } => "NodePingResponse",
            Payload::PowerUsage { .. } => "CirclePowerUsageResponse",
            Payload::Calibration { .. } => "CircleCalibrationResponse",
            Payload::CirclePlusScan { .. } => "CirclePlusScanResponse",
            Payload::Clock { .. } => "CircleClockResponse",
            Payload::RealTimeClock { .. } => "CirclePlusRealTimeClockResponse",
            Payload::PowerBuffer { .. } => "CirclePowerBufferResponse",
            Payload::Awake { .. } => "NodeAwakeResponse",
            Payload::JoinAvailable => "NodeJoinAvailableResponse",
            Payload::JoinAck => "NodeJoinAckResponse",
            Payload::NodeRemoved { .. } => "NodeRemoveResponse",
            Payload::SwitchGroup { .. } => "NodeSwitchGroupResponse",
            Payload::SenseReport { .. } => "SenseReportResponse",
            Payload::Unknown { .. } => "UnknownResponse",
        }
    }

    /// Decode a frame body (checksum already verified and stripped)
    pub fn decode(body: &str) -> Result<Response> {
        let id = ResponseId::from(read_hex_u16(body, 0)?);
        let seq_id = SeqId(read_hex_u16(body, SEQ_OFFSET)?);
        let f = FIELDS_OFFSET;

        if id == ResponseId::Ack {
            let code = AckCode::from(read_hex_u16(body, MAC_OFFSET)?);
            if body.len() <= SMALL_ACK_LEN {
                let payload = Payload::Ack {
                    code,
                    size: AckSize::Small,
                };
                return Ok(Response::new(seq_id, None, payload));
            }
            let mac = read_mac(body, SMALL_ACK_LEN)?;
            let payload = Payload::Ack {
                code,
                size: AckSize::Large,
            };
            return Ok(Response::new(seq_id, Some(mac), payload));
        }

        if let ResponseId::Unknown(raw) = id {
            let mac = read_mac(body, MAC_OFFSET).ok();
            let start = if mac.is_some() { f } else { MAC_OFFSET };
            let payload = Payload::Unknown {
                id: raw,
                fields: body.get(start..).unwrap_or_default().to_string(),
            };
            return Ok(Response::new(seq_id, mac, payload));
        }

        let mac = read_mac(body, MAC_OFFSET)?;
        let payload = match id {
            ResponseId::NodeAck => Payload::Ack {
                code: AckCode::from(read_hex_u16(body, f)?),
                size: AckSize::Standard,
            },
            ResponseId::StickInit => Payload::StickInit {
                network_online: read_hex_u8(body, f + 2)? == 1,
                circle_plus_mac: read_mac(body, f + 4)?,
                network_id: read_hex_u16(body, f + 20)?,
            },
            ResponseId::NodeInfo => Payload::NodeInfo {
                last_log_address: read_hex_u32(body, f)?,
                relay_state: read_hex_u8(body, f + 8)? == 1,
                frequency: read_hex_u8(body, f + 10)?,
                hardware: body
                    .get(f + 12..f + 24)
                    .ok_or_else(|| Error::protocol("Node info too short"))?
                    .to_string(),
                firmware: read_hex_u32(body, f + 24)?,
                node_type: NodeType::from(read_hex_u8(body, f + 32)?),
            },
            ResponseId::PingResponse => Payload::Ping {
                rssi_in: read_hex_u8(body, f)?,
                rssi_out: read_hex_u8(body, f + 2)?,
                ping_ms: read_hex_u16(body, f + 4)?,
            },
            ResponseId::PowerUsage => Payload::PowerUsage {
                pulses_1s: read_hex_u16(body, f)?,
                pulses_8s: read_hex_u16(body, f + 4)?,
                pulses_hour: read_hex_u32(body, f + 8)?,
            },
            ResponseId::Calibration => Payload::Calibration {
                gain_a: read_hex_f32(body, f)?,
                gain_b: read_hex_f32(body, f + 8)?,
                off_total: read_hex_f32(body, f + 16)?,
                off_noise: read_hex_f32(body, f + 24)?,
            },
            ResponseId::CirclePlusScan => Payload::CirclePlusScan {
                linked_mac: read_mac(body, f)?,
                address: read_hex_u8(body, f + 16)?,
            },
            ResponseId::Clock => Payload::Clock {
                hour: read_hex_u8(body, f)?,
                minute: read_hex_u8(body, f + 2)?,
                second: read_hex_u8(body, f + 4)?,
                weekday: read_hex_u8(body, f + 6)?,
            },
            ResponseId::RealTimeClock => Payload::RealTimeClock {
                second: read_hex_u8(body, f)?,
                minute: read_hex_u8(body, f + 2)?,
                hour: read_hex_u8(body, f + 4)?,
                weekday: read_hex_u8(body, f + 6)?,
                day: read_hex_u8(body, f + 8)?,
                month: read_hex_u8(body, f + 10)?,
                year: read_hex_u8(body, f + 12)?,
            },
            ResponseId::PowerBuffer => Payload::PowerBuffer {
                pulses: [
                    read_hex_u32(body, f)?,
                    read_hex_u32(body, f + 8)?,
                    read_hex_u32(body, f + 16)?,
                    read_hex_u32(body, f + 24)?,
                ],
                log_address: read_hex_u32(body, f + 32)?,
            },
            ResponseId::Awake => Payload::Awake {
                awake_type: read_hex_u8(body, f)?,
            },
            ResponseId::JoinAvailable => Payload::JoinAvailable,
            ResponseId::JoinAck => Payload::JoinAck,
            ResponseId::NodeRemove => Payload::NodeRemoved {
                removed: read_mac(body, f)?,
                success: read_hex_u8(body, f + 16)? == 1,
            },
            ResponseId::SwitchGroup => Payload::SwitchGroup {
                group: read_hex_u8(body, f)?,
                on: read_hex_u8(body, f + 2)? == 1,
            },
            ResponseId::SenseReport => Payload::SenseReport {
                humidity: read_hex_u16(body, f)?,
                temperature: read_hex_u16(body, f + 4)?,
            },
            ResponseId::Ack | ResponseId::Unknown(_) => {
                return Err(Error::protocol("Unreachable response id"));
            }
        };
        Ok(Response::new(seq_id, Some(mac), payload))
    }

    /// Encode back into a frame body, as a stick would send it
    pub fn encode(&self) -> String {
        let mut body = format!("{:04X}{}", self.payload.raw_id(), self.seq_id);
        let mac = self.mac.map(|m| m.to_string()).unwrap_or_default();
        match &self.payload {
            Payload::Ack { code, size } => {
                let code = format!("{:04X}", ack_code_value(*code));
                match size {
                    AckSize::Small => body.push_str(&code),
                    AckSize::Large => {
                        body.push_str(&code);
                        body.push_str(&mac);
                    }
                    AckSize::Standard => {
                        body.push_str(&mac);
                        body.push_str(&code);
                    }
                }
                return body;
            }
            Payload::Unknown { fields, .. } => {
                body.push_str(&mac);
                body.push_str(fields);
                return body;
            }
            _ => body.push_str(&mac),
        }
        match &self.payload {
            Payload::StickInit {
                network_online,
                circle_plus_mac,
                network_id,
            } => body.push_str(&format!(
                "01{:02X}{}{:04X}FF",
                *network_online as u8, circle_plus_mac, network_id
            )),
            Payload::NodeInfo {
                node_type,
                relay_state,
                last_log_address,
                frequency,
                hardware,
                firmware,
            } => body.push_str(&format!(
                "{:08X}{:02X}{:02X}{:0>12.12}{:08X}{:02X}",
                last_log_address,
                *relay_state as u8,
                frequency,
                hardware,
                firmware,
                node_type.code()
            )),
            Payload::Ping {
                rssi_in,
                rssi_out,
                ping_ms,
            } => body.push_str(&format!("{:02X}{:02X}{:04X}", rssi_in, rssi_out, ping_ms)),
            Payload::PowerUsage {
                pulses_1s,
                pulses_8s,
                pulses_hour,
            } => body.push_str(&format!(
                "{:04X}{:04X}{:08X}",
                pulses_1s, pulses_8s, pulses_hour
            )),
            Payload::Calibration {
                gain_a,
                gain_b,
                off_total,
                off_noise,
            } => body.push_str(&format!(
                "{:08X}{:08X}{:08X}{:08X}",
                gain_a.to_bits(),
                gain_b.to_bits(),
                off_total.to_bits(),
                off_noise.to_bits()
            )),
            Payload::CirclePlusScan {
                linked_mac,
                address,
            } => body.push_str(&format!("{}{:02X}", linked_mac, address)),
            Payload::Clock {
                hour,
                minute,
                second,
                weekday,
            } => body.push_str(&format!(
                "{:02X}{:02X}{:02X}{:02X}",
                hour, minute, second, weekday
            )),
            Payload::RealTimeClock {
                second,
                minute,
                hour,
                weekday,
                day,
                month,
                year,
            } => body.push_str(&format!(
                "{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                second, minute, hour, weekday, day, month, year
            )),
            Payload::PowerBuffer {
                pulses,
                log_address,
            } => {
                for p in pulses {
                    body.push_str(&format!("{:08X}", p));
                }
                body.push_str(&format!("{:08X}", log_address));
            }
            Payload::Awake { awake_type } => body.push_str(&format!("{:02X}", awake_type)),
            Payload::NodeRemoved { removed, success } => {
                body.push_str(&format!("{}{:02X}", removed, *success as u8))
            }
            Payload::SwitchGroup { group, on } => {
                body.push_str(&format!("{:02X}{:02X}", group, *on as u8))
            }
            Payload::SenseReport {
                humidity,
                temperature,
            } => body.push_str(&format!("{:04X}{:04X}", humidity, temperature)),
            Payload::JoinAvailable | Payload::JoinAck => {}
            Payload::Ack { .. } | Payload::Unknown { .. } => {}
        }
        body
    }

    /// Complete frame, as a stick would send it
    pub fn frame(&self) -> Vec<u8> {
        frame_message(&self.encode())
    }
}

fn ack_code_value(code: AckCode) -> u16 {
    match code {
        AckCode::Success => 0x00C1,
        AckCode::Error => 0x00C2,
        AckCode::Timeout => 0x00E1,
        AckCode::ScanParamsSet => 0x00BE,
        AckCode::ScanParamsNack => 0x00BF,
        AckCode::ClockSet => 0x00D7,
        AckCode::RelayOn => 0x00D8,
        AckCode::JoinAccepted => 0x00D9,
        AckCode::RelayOff => 0x00DE,
        AckCode::RealTimeClockSet => 0x00DF,
        AckCode::RelayNack => 0x00E2,
        AckCode::RealTimeClockNack => 0x00E7,
        AckCode::SleepSet => 0x00F6,
        AckCode::SleepNack => 0x00F7,
        AckCode::Unknown(v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mac(s: &str) -> Mac {
        Mac::parse(s).unwrap()
    }

    #[test]
    fn test_encode_requests() {
        let m = mac("000D6F0000B1B64B");
        assert_eq!(Request::StickInit.encode(), "000A");
        assert_eq!(Request::NodeInfo { mac: m }.encode(), "0023000D6F0000B1B64B");
        assert_eq!(
            Request::SwitchRelay { mac: m, on: true }.encode(),
            "0017000D6F0000B1B64B01"
        );
        assert_eq!(
            Request::CirclePlusScan { mac: m, address: 63 }.encode(),
            "0018000D6F0000B1B64B3F"
        );
        assert_eq!(
            Request::NodeAdd { mac: m, accept: true }.encode(),
            "000701000D6F0000B1B64B"
        );
        assert_eq!(Request::AllowJoining { enable: false }.encode(), "000800");
    }

    #[test]
    fn test_encode_clock_set() {
        let m = mac("000D6F0000B1B64B");
        let time = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 30).unwrap();
        let body = Request::ClockSet { mac: m, time }.encode();
        // 2024-03-15 was a Friday
        assert_eq!(body, "0016000D6F0000B1B64B18030F0D2D1E04");
    }

    #[test]
    fn test_request_metadata() {
        let m = mac("000D6F0000B1B64B");
        let c = mac("000D6F0000AAAAAA");
        assert_eq!(Request::StickInit.mac(), None);
        assert_eq!(
            Request::NodeRemove { coordinator: c, mac: m }.mac(),
            Some(c)
        );
        assert_eq!(
            Request::Ping { mac: m }.expected_response(),
            Some(ResponseId::PingResponse)
        );
        assert_eq!(Request::ClockSet { mac: m, time: Utc::now() }.expected_response(), None);
        assert!(Request::NodeInfo { mac: m }.is_node_info());
        assert!(!Request::NodeInfo { mac: m }.is_ping());
    }

    #[test]
    fn test_decode_small_ack() {
        let r = Response::decode("0000000100C1").unwrap();
        assert_eq!(r.seq_id, SeqId(1));
        assert_eq!(r.mac, None);
        assert_eq!(
            r.payload,
            Payload::Ack {
                code: AckCode::Success,
                size: AckSize::Small
            }
        );
    }

    #[test]
    fn test_decode_large_ack() {
        let r = Response::decode("0000000200D8000D6F0000B1B64B").unwrap();
        assert_eq!(r.mac, Some(mac("000D6F0000B1B64B")));
        assert_eq!(
            r.payload,
            Payload::Ack {
                code: AckCode::RelayOn,
                size: AckSize::Large
            }
        );
    }

    #[test]
    fn test_decode_standard_ack() {
        let r = Response::decode("01000003000D6F0000B1B64B00BE").unwrap();
        assert_eq!(
            r.payload,
            Payload::Ack {
                code: AckCode::ScanParamsSet,
                size: AckSize::Standard
            }
        );
    }

    #[test]
    fn test_decode_stick_init() {
        let body = "00110001000D6F0000B1B64B0101AB0D6F0000C0FFEE4E51FF";
        let r = Response::decode(body).unwrap();
        assert_eq!(r.mac, Some(mac("000D6F0000B1B64B")));
        match r.payload {
            Payload::StickInit {
                network_online,
                circle_plus_mac,
                network_id,
            } => {
                assert!(network_online);
                assert_eq!(circle_plus_mac, mac("AB0D6F0000C0FFEE"));
                assert_eq!(network_id, 0x4E51);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_node_info() {
        let info = Response::new(
            SeqId(0x0010),
            Some(mac("000D6F0000B1B64B")),
            Payload::NodeInfo {
                node_type: NodeType::Circle,
                relay_state: true,
                last_log_address: 0x00044000,
                frequency: 0x85,
                hardware: "000000470000".to_string(),
                firmware: 0x4E0843A9,
            },
        );
        let body = info.encode();
        assert_eq!(body.len(), 58);
        assert_eq!(Response::decode(&body).unwrap(), info);
    }

    #[test]
    fn test_decode_unknown_message() {
        let r = Response::decode("07770005000D6F0000B1B64BCAFE").unwrap();
        assert_eq!(r.mac, Some(mac("000D6F0000B1B64B")));
        assert_eq!(
            r.payload,
            Payload::Unknown {
                id: 0x0777,
                fields: "CAFE".to_string()
            }
        );
    }

    #[test]
    fn test_decode_truncated_fails() {
        assert!(Response::decode("0024000A000D6F0000B1B64B").is_err());
        assert!(Response::decode("00").is_err());
    }
}
