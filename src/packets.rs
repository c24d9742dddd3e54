//! Protocol constants and primitive identifiers for the stick protocol

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Frame header marker
pub const MESSAGE_HEADER: &[u8] = b"\x05\x05\x03\x03";

/// Frame footer marker
pub const MESSAGE_FOOTER: &[u8] = b"\r\n";

/// Default serial baud rate of the USB stick
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Number of link slots in the Circle+ memory table
pub const CIRCLE_PLUS_SLOTS: u8 = 64;

/// Outbound message identifiers
pub mod request_id {
    pub const NODE_ADD: &str = "0007";
    pub const NODE_ALLOW_JOINING: &str = "0008";
    pub const STICK_INIT: &str = "000A";
    pub const NODE_PING: &str = "000D";
    pub const CIRCLE_POWER_USAGE: &str = "0012";
    pub const CIRCLE_CLOCK_SET: &str = "0016";
    pub const CIRCLE_SWITCH_RELAY: &str = "0017";
    pub const CIRCLE_PLUS_SCAN: &str = "0018";
    pub const NODE_REMOVE: &str = "001C";
    pub const NODE_INFO: &str = "0023";
    pub const CIRCLE_CALIBRATION: &str = "0026";
    pub const CIRCLE_PLUS_REAL_TIME_CLOCK_GET: &str = "0029";
    pub const CIRCLE_CLOCK_GET: &str = "003E";
    pub const CIRCLE_POWER_BUFFER: &str = "0048";
}

/// Inbound message identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseId {
    /// Small and large acknowledgements share an id, told apart by length
    Ack,
    NodeAck,
    JoinAvailable,
    PingResponse,
    StickInit,
    PowerUsage,
    CirclePlusScan,
    NodeRemove,
    NodeInfo,
    Calibration,
    RealTimeClock,
    Clock,
    PowerBuffer,
    Awake,
    SwitchGroup,
    JoinAck,
    SenseReport,
    Unknown(u16),
}

impl From<u16> for ResponseId {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ResponseId::Ack,
            0x0100 => ResponseId::NodeAck,
            0x0006 => ResponseId::JoinAvailable,
            0x000E => ResponseId::PingResponse,
            0x0011 => ResponseId::StickInit,
            0x0013 => ResponseId::PowerUsage,
            0x0019 => ResponseId::CirclePlusScan,
            0x001D => ResponseId::NodeRemove,
            0x0024 => ResponseId::NodeInfo,
            0x0027 => ResponseId::Calibration,
            0x003A => ResponseId::RealTimeClock,
            0x003F => ResponseId::Clock,
            0x0049 => ResponseId::PowerBuffer,
            0x004F => ResponseId::Awake,
            0x0056 => ResponseId::SwitchGroup,
            0x0061 => ResponseId::JoinAck,
            0x0105 => ResponseId::SenseReport,
            other => ResponseId::Unknown(other),
        }
    }
}

/// 64-bit Zigbee MAC address, printed as 16 upper-case hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac([u8; 8]);

impl Mac {
    /// MAC reported by the coordinator for an unused memory slot
    pub const EMPTY_SLOT: Mac = Mac([0xFF; 8]);

    /// Build from raw bytes
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Mac(bytes)
    }

    /// Parse and validate a 16 hex character MAC
    pub fn parse(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::invalid_mac(s))?;
        Ok(Mac(bytes))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// True for the placeholder MAC of an unused coordinator slot
    pub fn is_empty_slot(&self) -> bool {
        *self == Mac::EMPTY_SLOT
    }

    /// The stick reports the coordinator MAC with a network prefix in the first
    /// byte; the node itself answers on the same MAC with that byte zeroed.
    pub fn with_coordinator_prefix(&self) -> Mac {
        let mut bytes = self.0;
        bytes[0] = 0;
        Mac(bytes)
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl FromStr for Mac {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Mac::parse(s)
    }
}

/// Sequence id assigned by the stick to every accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqId(pub u16);

impl SeqId {
    pub const ZERO: SeqId = SeqId(0);

    /// Ids the stick uses for unsolicited messages; never valid cursor values
    pub const RESERVED: [SeqId; 3] = [SeqId(0xFFFD), SeqId(0xFFFE), SeqId(0xFFFF)];

    /// First reserved id; the counter wraps to zero before reaching it
    const WRAP_AT: u16 = 0xFFFD;

    /// The cursor may wrap to a low id only once it has reached this range
    const WRAP_WINDOW: u16 = 0xFF00;

    pub fn is_reserved(self) -> bool {
        SeqId::RESERVED.contains(&self)
    }

    /// Whether the stick can hand this id out to a request
    pub fn is_assignable(self) -> bool {
        self.0 < Self::WRAP_AT
    }

    /// Id the stick will assign to the request after this one
    pub fn next(self) -> SeqId {
        match self.0.checked_add(1) {
            Some(v) if v < Self::WRAP_AT => SeqId(v),
            _ => SeqId::ZERO,
        }
    }

    /// Whether an inbound id moves a cursor currently at `self` forward
    pub fn advanced_by(self, incoming: SeqId) -> bool {
        if !incoming.is_assignable() {
            return false;
        }
        if incoming > self {
            return true;
        }
        self.0 >= Self::WRAP_WINDOW && incoming.0 < (u16::MAX - Self::WRAP_WINDOW)
    }

    /// True once a cursor at `self` has reached or passed `target`
    pub fn has_reached(self, target: SeqId) -> bool {
        self.0.wrapping_sub(target.0) < 0x8000
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Node type reported in a node-info response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Stick,
    CirclePlus,
    Circle,
    Switch,
    Sense,
    Scan,
    CelsiusSed,
    CelsiusNr,
    Stealth,
    Unknown(u8),
}

impl NodeType {
    pub fn code(self) -> u8 {
        match self {
            NodeType::Stick => 0,
            NodeType::CirclePlus => 1,
            NodeType::Circle => 2,
            NodeType::Switch => 3,
            NodeType::Sense => 5,
            NodeType::Scan => 6,
            NodeType::CelsiusSed => 7,
            NodeType::CelsiusNr => 8,
            NodeType::Stealth => 9,
            NodeType::Unknown(code) => code,
        }
    }
}

impl From<u8> for NodeType {
    fn from(value: u8) -> Self {
        match value {
            0 => NodeType::Stick,
            1 => NodeType::CirclePlus,
            2 => NodeType::Circle,
            3 => NodeType::Switch,
            5 => NodeType::Sense,
            6 => NodeType::Scan,
            7 => NodeType::CelsiusSed,
            8 => NodeType::CelsiusNr,
            9 => NodeType::Stealth,
            other => NodeType::Unknown(other),
        }
    }
}

/// The three acknowledgement frame layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSize {
    /// From the stick itself, no MAC
    Small,
    /// From a node, MAC before the code
    Standard,
    /// From a node, MAC after the code
    Large,
}

/// Acknowledgement codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckCode {
    Success,
    Error,
    Timeout,
    ScanParamsSet,
    ScanParamsNack,
    ClockSet,
    RelayOn,
    JoinAccepted,
    RelayOff,
    RealTimeClockSet,
    RelayNack,
    RealTimeClockNack,
    SleepSet,
    SleepNack,
    Unknown(u16),
}

impl From<u16> for AckCode {
    fn from(value: u16) -> Self {
        match value {
            0x00C1 => AckCode::Success,
            0x00C2 => AckCode::Error,
            0x00E1 => AckCode::Timeout,
            0x00BE => AckCode::ScanParamsSet,
            0x00BF => AckCode::ScanParamsNack,
            0x00D7 => AckCode::ClockSet,
            0x00D8 => AckCode::RelayOn,
            0x00D9 => AckCode::JoinAccepted,
            0x00DE => AckCode::RelayOff,
            0x00DF => AckCode::RealTimeClockSet,
            0x00E2 => AckCode::RelayNack,
            0x00E7 => AckCode::RealTimeClockNack,
            0x00F6 => AckCode::SleepSet,
            0x00F7 => AckCode::SleepNack,
            other => AckCode::Unknown(other),
        }
    }
}

/// What an acknowledgement means for the pending request it names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Stick accepted the request for transmission; keep waiting for the response
    LinkAccepted,
    /// Terminal positive answer; resolve and complete
    Complete,
    /// Failure or negative answer; resend within the retry budget
    Retry,
    /// Unrecognized code; leave the request for the timeout sweeper
    Unmanaged,
}

impl AckCode {
    pub fn outcome(self, size: AckSize) -> AckOutcome {
        match self {
            AckCode::Success if size == AckSize::Small => AckOutcome::LinkAccepted,
            AckCode::Success => AckOutcome::Complete,
            AckCode::Error | AckCode::Timeout => AckOutcome::Retry,
            AckCode::RelayOn
            | AckCode::RelayOff
            | AckCode::SleepSet
            | AckCode::ClockSet
            | AckCode::RealTimeClockSet
            | AckCode::JoinAccepted
            | AckCode::ScanParamsSet => AckOutcome::Complete,
            AckCode::RelayNack
            | AckCode::SleepNack
            | AckCode::RealTimeClockNack
            | AckCode::ScanParamsNack => AckOutcome::Retry,
            AckCode::Unknown(_) => AckOutcome::Unmanaged,
        }
    }
}
