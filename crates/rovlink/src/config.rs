//! Bridge configuration.
//!
//! One immutable [`BridgeConfig`] is built at startup (defaults, then environment,
//! then command-line overrides in the binary) and passed to the bridge. Nothing
//! reads configuration globally after that.

use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::protocol::{ACK_BYTE, HANDSHAKE_BYTE};

pub const DEFAULT_CONTROL_PORT: u16 = 8088;
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyAMA0";
pub const DEFAULT_BAUD_RATE: u32 = 2_000_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Baud rates the serial transport knows how to configure.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 500_000, 576_000, 921_600,
    1_000_000, 1_152_000, 1_500_000, 2_000_000, 2_500_000, 3_000_000, 3_500_000, 4_000_000,
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("shutdown timeout must be non-zero")]
    ZeroShutdownTimeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Local address the control socket binds to.
    pub bind_host: String,
    /// UDP port the client sends control datagrams to.
    pub control_port: u16,
    /// Destination port for telemetry. `None` replies to the client's source port.
    pub telemetry_port: Option<u16>,
    pub serial_device: PathBuf,
    pub baud_rate: u32,
    /// Hardware flow control on the serial link.
    pub rtscts: bool,
    pub handshake_byte: u8,
    pub ack_byte: u8,
    /// Give up on the vehicle if no handshake arrives in time. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Per-queue capacity. `None` is unbounded.
    pub queue_capacity: Option<usize>,
    /// Upper bound on draining the loops at shutdown before they are aborted.
    pub shutdown_timeout: Duration,
    /// Drop control datagrams that queued up while waiting for the handshake.
    pub discard_stale_control: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            telemetry_port: None,
            serial_device: PathBuf::from(DEFAULT_SERIAL_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            rtscts: true,
            handshake_byte: HANDSHAKE_BYTE,
            ack_byte: ACK_BYTE,
            handshake_timeout: None,
            queue_capacity: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            discard_stale_control: true,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ROVLINK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `ROVLINK_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        for key in ENV_KEYS {
            if let Some(value) = lookup(key) {
                config.set(key, &value)?;
            }
        }
        Ok(config)
    }

    /// Apply one setting by its environment key (e.g. `ROVLINK_CONTROL_PORT`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "ROVLINK_BIND_HOST" => self.bind_host = value.to_string(),
            "ROVLINK_CONTROL_PORT" => self.control_port = parse(key, value)?,
            "ROVLINK_TELEMETRY_PORT" => self.telemetry_port = parse_optional(key, value)?,
            "ROVLINK_SERIAL_DEVICE" => self.serial_device = PathBuf::from(value),
            "ROVLINK_BAUD_RATE" => self.baud_rate = parse(key, value)?,
            "ROVLINK_RTSCTS" => self.rtscts = parse_bool(key, value)?,
            "ROVLINK_HANDSHAKE_BYTE" => self.handshake_byte = parse_byte(key, value)?,
            "ROVLINK_ACK_BYTE" => self.ack_byte = parse_byte(key, value)?,
            "ROVLINK_HANDSHAKE_TIMEOUT_MS" => {
                self.handshake_timeout =
                    parse_optional::<u64>(key, value)?.map(Duration::from_millis)
            }
            "ROVLINK_QUEUE_CAPACITY" => self.queue_capacity = parse_optional(key, value)?,
            "ROVLINK_SHUTDOWN_TIMEOUT_MS" => {
                self.shutdown_timeout = Duration::from_millis(parse(key, value)?)
            }
            "ROVLINK_DISCARD_STALE_CONTROL" => {
                self.discard_stale_control = parse_bool(key, value)?
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: other.to_string(),
                    value: value.to_string(),
                    reason: "unknown setting".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ConfigError::UnsupportedBaudRate(self.baud_rate));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        Ok(())
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    pub fn with_telemetry_port(mut self, port: Option<u16>) -> Self {
        self.telemetry_port = port;
        self
    }

    pub fn with_serial_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.serial_device = path.into();
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_rtscts(mut self, rtscts: bool) -> Self {
        self.rtscts = rtscts;
        self
    }

    pub fn with_handshake_byte(mut self, byte: u8) -> Self {
        self.handshake_byte = byte;
        self
    }

    pub fn with_ack_byte(mut self, byte: u8) -> Self {
        self.ack_byte = byte;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_discard_stale_control(mut self, discard: bool) -> Self {
        self.discard_stale_control = discard;
        self
    }
}

/// Environment keys understood by [`BridgeConfig::from_env`].
pub const ENV_KEYS: [&str; 12] = [
    "ROVLINK_BIND_HOST",
    "ROVLINK_CONTROL_PORT",
    "ROVLINK_TELEMETRY_PORT",
    "ROVLINK_SERIAL_DEVICE",
    "ROVLINK_BAUD_RATE",
    "ROVLINK_RTSCTS",
    "ROVLINK_HANDSHAKE_BYTE",
    "ROVLINK_ACK_BYTE",
    "ROVLINK_HANDSHAKE_TIMEOUT_MS",
    "ROVLINK_QUEUE_CAPACITY",
    "ROVLINK_SHUTDOWN_TIMEOUT_MS",
    "ROVLINK_DISCARD_STALE_CONTROL",
];

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

/// Empty, `none` and `off` clear an optional setting.
fn parse_optional<T>(key: &str, value: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "off" => Ok(None),
        _ => parse(key, value).map(Some),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

/// Accepts decimal (`170`) or hex (`0xAA`).
fn parse_byte(key: &str, value: &str) -> Result<u8, ConfigError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|e| invalid(key, value, e))
}
