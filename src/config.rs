//! Session configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::serial::Data;

/// The baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// The payload sent periodically when none is configured (ASCII `0`).
pub const DEFAULT_PAYLOAD: &[u8] = &[0x30];

/// The delay between periodic sends when none is configured.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(500);

/// The configuration of a [`SerialSession`][crate::SerialSession].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// The path of the serial device.
    pub port: String,
    /// The baud rate to open the device with.
    pub baud_rate: u32,
    /// The data written on every cycle of periodic sending.
    pub payload: Data,
    /// How long to wait after each periodic send.
    pub send_delay: Duration,
}

impl SessionConfig {
    /// Returns the default configuration for the device at `port`.
    pub fn new(port: impl Into<String>) -> Self {
        SessionConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Checks that the configuration can be used to open a port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_port(&self.port)?;
        validate_baud_rate(self.baud_rate)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            payload: DEFAULT_PAYLOAD.to_vec(),
            send_delay: DEFAULT_SEND_DELAY,
        }
    }
}

pub(crate) fn validate_port(port: &str) -> Result<(), ConfigError> {
    if port.is_empty() {
        Err(ConfigError::EmptyPort)
    } else {
        Ok(())
    }
}

pub(crate) fn validate_baud_rate(baud_rate: u32) -> Result<(), ConfigError> {
    if baud_rate == 0 {
        Err(ConfigError::InvalidBaudRate(baud_rate.to_string()))
    } else {
        Ok(())
    }
}

/// Parses a decimal baud rate.
pub(crate) fn parse_baud_rate(s: &str) -> Result<u32, ConfigError> {
    let baud_rate = s
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidBaudRate(s.to_string()))?;
    validate_baud_rate(baud_rate)?;
    Ok(baud_rate)
}
