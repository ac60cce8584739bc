//! Client and serial line configuration.

use pulselink_core::constants::{
    BAUD_RATE, DATA_BITS, DISPOSE_TIMEOUT_MS, ERROR_BACKOFF_MS, READ_CHUNK_SIZE, READ_TIMEOUT_MS,
    RESTART_SETTLE_DELAY_MS, STOP_BITS, STOP_TIMEOUT_MS,
};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Timing and buffer settings for a [`PulseClient`](crate::PulseClient).
///
/// Durations deserialize from integer milliseconds so hosts can embed this
/// struct in their own configuration files:
///
/// ```
/// use pulselink_hardware::PulseClientConfig;
/// use std::time::Duration;
///
/// let config: PulseClientConfig = serde_json::from_str(r#"{ "stop_timeout": 500 }"#).unwrap();
/// assert_eq!(config.stop_timeout, Duration::from_millis(500));
/// assert_eq!(config.read_timeout, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PulseClientConfig {
    /// Timeout of a single blocking read. Bounds how quickly the read loop
    /// observes cancellation.
    #[serde(deserialize_with = "millis")]
    pub read_timeout: Duration,

    /// Pause after a failed read before the next attempt.
    #[serde(deserialize_with = "millis")]
    pub error_backoff: Duration,

    /// Delay between closing and reopening a port when `start` heals a
    /// connection with the error flag set.
    #[serde(deserialize_with = "millis")]
    pub restart_settle_delay: Duration,

    /// Upper bound on how long `stop` waits for the read loop to exit.
    #[serde(deserialize_with = "millis")]
    pub stop_timeout: Duration,

    /// Upper bound on how long `dispose` waits for the read loop to exit.
    #[serde(deserialize_with = "millis")]
    pub dispose_timeout: Duration,

    /// Size of the scratch buffer handed to each read.
    pub read_chunk_size: usize,
}

impl Default for PulseClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            error_backoff: Duration::from_millis(ERROR_BACKOFF_MS),
            restart_settle_delay: Duration::from_millis(RESTART_SETTLE_DELAY_MS),
            stop_timeout: Duration::from_millis(STOP_TIMEOUT_MS),
            dispose_timeout: Duration::from_millis(DISPOSE_TIMEOUT_MS),
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Serial line parameters.
///
/// The acceptor controller uses one fixed line: 115200 baud, 8N1, no flow
/// control, DTR and RTS asserted. [`LineSettings::pulse_device`] builds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// Assert DTR and RTS right after the port opens.
    pub assert_control_lines: bool,
    pub timeout: Duration,
}

impl LineSettings {
    /// Line settings of the pulse-device controller.
    pub fn pulse_device() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            data_bits: DATA_BITS,
            stop_bits: STOP_BITS,
            assert_control_lines: true,
            timeout: Duration::from_millis(READ_TIMEOUT_MS),
        }
    }

    /// Same line with a different read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::pulse_device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PulseClientConfig::default();

        assert_eq!(config.read_timeout, Duration::from_millis(100));
        assert_eq!(config.error_backoff, Duration::from_millis(500));
        assert_eq!(config.restart_settle_delay, Duration::from_millis(250));
        assert_eq!(config.stop_timeout, Duration::from_secs(2));
        assert_eq!(config.dispose_timeout, Duration::from_secs(2));
        assert_eq!(config.read_chunk_size, 256);
    }

    #[test]
    fn test_config_deserialize_millis() {
        let json = r#"{
            "read_timeout": 20,
            "error_backoff": 50,
            "restart_settle_delay": 10,
            "stop_timeout": 1000,
            "dispose_timeout": 1500,
            "read_chunk_size": 64
        }"#;

        let config: PulseClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.read_timeout, Duration::from_millis(20));
        assert_eq!(config.error_backoff, Duration::from_millis(50));
        assert_eq!(config.restart_settle_delay, Duration::from_millis(10));
        assert_eq!(config.stop_timeout, Duration::from_millis(1000));
        assert_eq!(config.dispose_timeout, Duration::from_millis(1500));
        assert_eq!(config.read_chunk_size, 64);
    }

    #[test]
    fn test_config_deserialize_empty_uses_defaults() {
        let config: PulseClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PulseClientConfig::default());
    }

    #[test]
    fn test_line_settings() {
        let line = LineSettings::pulse_device();

        assert_eq!(line.baud_rate, 115_200);
        assert_eq!(line.data_bits, 8);
        assert_eq!(line.stop_bits, 1);
        assert!(line.assert_control_lines);
        assert_eq!(line.timeout, Duration::from_millis(100));

        let fast = line.with_timeout(Duration::from_millis(10));
        assert_eq!(fast.timeout, Duration::from_millis(10));
        assert_eq!(fast.baud_rate, line.baud_rate);
    }
}
