//! Metering nodes: Circle, Circle+ and Stealth

use crate::messages::Payload;
use crate::packets::AckCode;

/// Pulses the meter counts per kilowatt-second
pub const PULSES_PER_KW_SECOND: f64 = 468.9385193;

/// Meter correction factors read from the node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub gain_a: f64,
    pub gain_b: f64,
    pub off_total: f64,
    pub off_noise: f64,
}

impl Calibration {
    /// Corrected energy in kilowatt-seconds for `pulses` counted over `seconds`
    pub fn pulses_to_kws(&self, pulses: f64, seconds: f64) -> f64 {
        if pulses == 0.0 || seconds <= 0.0 {
            return 0.0;
        }
        let rate = pulses / seconds + self.off_noise;
        let corrected = seconds * (rate * rate * self.gain_b + rate * self.gain_a + self.off_total);
        corrected / PULSES_PER_KW_SECOND
    }
}

/// State shared by all relay-carrying metering nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircleState {
    pub relay_state: bool,
    pub calibration: Option<Calibration>,
    pub pulses_1s: Option<u16>,
    pub pulses_8s: Option<u16>,
    pub pulses_hour: Option<u32>,
    pub last_log_address: Option<u32>,
    /// Pulse counters of the most recent log buffer read
    pub log_buffer: Vec<u32>,
    pub last_log_collected: bool,
    /// Request the log buffer once the next node-info response arrives
    pub buffer_after_info: bool,
    /// Node clock as last reported (hour, minute, second)
    pub clock: Option<(u8, u8, u8)>,
}

/// Follow-up the controller should issue after a message was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    None,
    Calibrate,
    PowerBuffer,
}

impl CircleState {
    /// Apply a message; returns the follow-up request the node needs
    pub fn apply(&mut self, payload: &Payload) -> FollowUp {
        match payload {
            Payload::NodeInfo {
                relay_state,
                last_log_address,
                ..
            } => {
                self.relay_state = *relay_state;
                if self.last_log_address != Some(*last_log_address) {
                    self.last_log_collected = false;
                }
                self.last_log_address = Some(*last_log_address);
                if std::mem::take(&mut self.buffer_after_info) {
                    return FollowUp::PowerBuffer;
                }
            }
            Payload::PowerUsage {
                pulses_1s,
                pulses_8s,
                pulses_hour,
            } => {
                self.pulses_1s = Some(*pulses_1s);
                self.pulses_8s = Some(*pulses_8s);
                self.pulses_hour = Some(*pulses_hour);
                if self.calibration.is_none() {
                    return FollowUp::Calibrate;
                }
            }
            Payload::Calibration {
                gain_a,
                gain_b,
                off_total,
                off_noise,
            } => {
                self.calibration = Some(Calibration {
                    gain_a: *gain_a as f64,
                    gain_b: *gain_b as f64,
                    off_total: *off_total as f64,
                    off_noise: *off_noise as f64,
                });
            }
            Payload::PowerBuffer {
                pulses,
                log_address,
            } => {
                self.log_buffer = pulses.to_vec();
                if self.last_log_address.map_or(true, |a| *log_address >= a) {
                    self.last_log_collected = true;
                }
            }
            Payload::Ack { code, .. } => match code {
                AckCode::RelayOn => self.relay_state = true,
                AckCode::RelayOff => self.relay_state = false,
                _ => {}
            },
            Payload::Clock {
                hour,
                minute,
                second,
                ..
            } => self.clock = Some((*hour, *minute, *second)),
            _ => {}
        }
        FollowUp::None
    }

    /// Current consumption in watts, from the one-second counter
    pub fn power_watts(&self) -> Option<f64> {
        let calibration = self.calibration?;
        let pulses = self.pulses_1s? as f64;
        Some(calibration.pulses_to_kws(pulses, 1.0) * 1000.0)
    }

    /// Average consumption over the last eight seconds, in watts
    pub fn power_watts_8s(&self) -> Option<f64> {
        let calibration = self.calibration?;
        let pulses = self.pulses_8s? as f64;
        Some(calibration.pulses_to_kws(pulses, 8.0) / 8.0 * 1000.0)
    }

    /// Energy consumed during the current hour, in kWh
    pub fn energy_kwh_hour(&self) -> Option<f64> {
        let calibration = self.calibration?;
        let pulses = self.pulses_hour? as f64;
        Some(calibration.pulses_to_kws(pulses, 3600.0) / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unity() -> Calibration {
        Calibration {
            gain_a: 1.0,
            gain_b: 0.0,
            off_total: 0.0,
            off_noise: 0.0,
        }
    }

    #[test]
    fn test_pulses_to_kws() {
        let kws = unity().pulses_to_kws(PULSES_PER_KW_SECOND, 1.0);
        assert!((kws - 1.0).abs() < 1e-9);
        assert_eq!(unity().pulses_to_kws(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_power_requires_calibration() {
        let mut state = CircleState::default();
        let follow = state.apply(&Payload::PowerUsage {
            pulses_1s: 469,
            pulses_8s: 3752,
            pulses_hour: 0,
        });
        assert_eq!(follow, FollowUp::Calibrate);
        assert_eq!(state.power_watts(), None);

        state.apply(&Payload::Calibration {
            gain_a: 1.0,
            gain_b: 0.0,
            off_total: 0.0,
            off_noise: 0.0,
        });
        let watts = state.power_watts().unwrap();
        assert!((watts - 1000.1).abs() < 0.5, "got {}", watts);
        let watts_8s = state.power_watts_8s().unwrap();
        assert!((watts_8s - 1000.1).abs() < 0.5, "got {}", watts_8s);
    }

    #[test]
    fn test_relay_acks() {
        let mut state = CircleState::default();
        state.apply(&Payload::Ack {
            code: AckCode::RelayOn,
            size: crate::packets::AckSize::Large,
        });
        assert!(state.relay_state);
        state.apply(&Payload::Ack {
            code: AckCode::RelayOff,
            size: crate::packets::AckSize::Large,
        });
        assert!(!state.relay_state);
    }

    #[test]
    fn test_info_then_buffer() {
        let mut state = CircleState {
            buffer_after_info: true,
            ..Default::default()
        };
        let info = Payload::NodeInfo {
            node_type: crate::packets::NodeType::Circle,
            relay_state: true,
            last_log_address: 0x00044020,
            frequency: 0x85,
            hardware: "000000470000".to_string(),
            firmware: 0,
        };
        assert_eq!(state.apply(&info), FollowUp::PowerBuffer);
        assert_eq!(state.apply(&info), FollowUp::None);
        assert!(!state.last_log_collected);

        state.apply(&Payload::PowerBuffer {
            pulses: [1, 2, 3, 4],
            log_address: 0x00044020,
        });
        assert!(state.last_log_collected);
        assert_eq!(state.log_buffer, vec![1, 2, 3, 4]);
    }
}
