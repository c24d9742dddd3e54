//! Battery powered sleepy end devices: Scan and Sense

use crate::messages::Payload;

/// Default minutes between two maintenance wake-ups of a SED
pub const DEFAULT_MAINTENANCE_INTERVAL: u32 = 60;

/// Motion sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanState {
    pub motion: bool,
    /// Switch group the last motion report was sent to
    pub group: Option<u8>,
}

impl ScanState {
    pub fn apply(&mut self, payload: &Payload) {
        if let Payload::SwitchGroup { group, on } = payload {
            if self.motion != *on {
                tracing::debug!("Motion state changed to {}", on);
            }
            self.motion = *on;
            self.group = Some(*group);
        }
    }
}

/// Temperature and humidity sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenseState {
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
}

impl SenseState {
    pub fn apply(&mut self, payload: &Payload) {
        if let Payload::SenseReport {
            humidity,
            temperature,
        } = payload
        {
            if *temperature != 0xFFFF {
                let raw = *temperature as f64;
                self.temperature = Some((175.72 * raw / 65536.0 - 46.85).round_to(2));
            }
            if *humidity != 0xFFFF {
                let raw = *humidity as f64;
                self.humidity = Some((125.0 * raw / 65536.0 - 6.0).round_to(1));
            }
        }
    }
}

trait RoundTo {
    fn round_to(self, decimals: i32) -> f64;
}

impl RoundTo for f64 {
    fn round_to(self, decimals: i32) -> f64 {
        let factor = 10f64.powi(decimals);
        (self * factor).round() / factor
    }
}
