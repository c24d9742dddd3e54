//! Error types for the stick controller

use thiserror::Error;

/// Failures surfaced by the public API; message-level errors inside the worker
/// loops are logged instead
#[derive(Error, Debug)]
pub enum Error {
    /// The link to the stick could not be opened or used
    #[error("Stick link error: {0}")]
    Connection(String),

    #[cfg(feature = "serial")]
    #[error("Serial port: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or field
    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("No answer for {0}")]
    Timeout(String),

    /// The stick did not answer the initialization request
    #[error("Stick initialization failed")]
    StickInit,

    /// The stick answered but reports the Zigbee network as offline
    #[error("Zigbee network is down")]
    NetworkDown,

    /// The Circle+ coordinator could not be discovered
    #[error("Circle+ coordinator not found: {0}")]
    CirclePlus(String),

    /// MAC address is not 16 hexadecimal characters
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Stick is not connected")]
    NotConnected,
}

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Error::Timeout(what.into())
    }

    pub fn invalid_mac(mac: impl Into<String>) -> Self {
        Error::InvalidMac(mac.into())
    }

    /// True for the failures `initialize` reports synchronously
    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            Error::StickInit | Error::NetworkDown | Error::CirclePlus(_)
        )
    }
}
