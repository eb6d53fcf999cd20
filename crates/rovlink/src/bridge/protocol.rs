//! Wire types for the ICU protocol.
//!
//! Two directions:
//! - **Control** (client → vehicle): JSON datagram → 8-byte [`ControlFrame`] on serial
//! - **Telemetry** (vehicle → client): 32-byte [`TelemetryFrame`] → JSON [`TelemetryRecord`]
//!
//! The serial peer announces readiness with a single [`HANDSHAKE_BYTE`] and the bridge
//! answers with [`ACK_BYTE`] before the first control frame.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Readiness byte sent once by the embedded peer.
pub const HANDSHAKE_BYTE: u8 = 0xAA;

/// Acknowledgement byte written back on serial after the handshake.
pub const ACK_BYTE: u8 = 0xAA;

/// Length of an encoded control frame.
pub const CONTROL_FRAME_LEN: usize = 8;

/// Length of a telemetry frame (8 little-endian f32).
pub const TELEMETRY_FRAME_LEN: usize = 32;

/// RollG is parsed from the client but has no bit slot in the control frame.
///
/// The 64 frame bits are fully used by the other six channels. The value is
/// accepted and silently dropped; decoding a frame always yields `roll_g == 0`.
pub const ROLL_G_TRANSMITTED: bool = false;

/// Logical control channels, named as they appear in client JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Pitch,
    Roll,
    Yaw,
    Power,
    PitchG,
    RollG,
    YawG,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Pitch,
        Channel::Roll,
        Channel::Yaw,
        Channel::Power,
        Channel::PitchG,
        Channel::RollG,
        Channel::YawG,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Pitch => "Pitch",
            Channel::Roll => "Roll",
            Channel::Yaw => "Yaw",
            Channel::Power => "Power",
            Channel::PitchG => "PitchG",
            Channel::RollG => "RollG",
            Channel::YawG => "YawG",
        }
    }

    /// Bit slot of this channel in the control frame, if it is transmitted.
    pub fn slot(&self) -> Option<&'static ChannelSlot> {
        FRAME_LAYOUT.iter().find(|slot| slot.channel == *self)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of one channel inside the 64-bit little-endian frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSlot {
    pub channel: Channel,
    /// First stream bit (bit 0 is the LSB of byte 0).
    pub offset: u32,
    /// Number of transmitted bits; higher bits of the value are lost.
    pub width: u32,
}

impl ChannelSlot {
    pub const fn mask(&self) -> u64 {
        (1u64 << self.width) - 1
    }
}

/// Control frame layout, in stream order. Widths sum to exactly 64.
pub const FRAME_LAYOUT: [ChannelSlot; 6] = [
    ChannelSlot {
        channel: Channel::Power,
        offset: 0,
        width: 11,
    },
    ChannelSlot {
        channel: Channel::Yaw,
        offset: 11,
        width: 11,
    },
    ChannelSlot {
        channel: Channel::Pitch,
        offset: 22,
        width: 11,
    },
    ChannelSlot {
        channel: Channel::Roll,
        offset: 33,
        width: 11,
    },
    ChannelSlot {
        channel: Channel::YawG,
        offset: 44,
        width: 10,
    },
    ChannelSlot {
        channel: Channel::PitchG,
        offset: 54,
        width: 10,
    },
];

/// A control command as sent by the client.
///
/// Channel values are JSON numbers truncated toward zero on decode. All seven keys
/// are required; unknown keys are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(rename = "Pitch", deserialize_with = "truncated")]
    pub pitch: i64,
    #[serde(rename = "Roll", deserialize_with = "truncated")]
    pub roll: i64,
    #[serde(rename = "Yaw", deserialize_with = "truncated")]
    pub yaw: i64,
    #[serde(rename = "Power", deserialize_with = "truncated")]
    pub power: i64,
    #[serde(rename = "PitchG", deserialize_with = "truncated")]
    pub pitch_g: i64,
    #[serde(rename = "RollG", deserialize_with = "truncated")]
    pub roll_g: i64,
    #[serde(rename = "YawG", deserialize_with = "truncated")]
    pub yaw_g: i64,
}

impl ControlCommand {
    pub fn channel(&self, channel: Channel) -> i64 {
        match channel {
            Channel::Pitch => self.pitch,
            Channel::Roll => self.roll,
            Channel::Yaw => self.yaw,
            Channel::Power => self.power,
            Channel::PitchG => self.pitch_g,
            Channel::RollG => self.roll_g,
            Channel::YawG => self.yaw_g,
        }
    }

    pub fn set_channel(&mut self, channel: Channel, value: i64) {
        let field = match channel {
            Channel::Pitch => &mut self.pitch,
            Channel::Roll => &mut self.roll,
            Channel::Yaw => &mut self.yaw,
            Channel::Power => &mut self.power,
            Channel::PitchG => &mut self.pitch_g,
            Channel::RollG => &mut self.roll_g,
            Channel::YawG => &mut self.yaw_g,
        };
        *field = value;
    }
}

fn truncated<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(D::Error::custom("channel value must be finite"));
    }
    // `as` saturates out-of-range values; the encoder masks them to the slot width.
    Ok(value.trunc() as i64)
}

/// Encoded control frame, exactly [`CONTROL_FRAME_LEN`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlFrame([u8; CONTROL_FRAME_LEN]);

impl ControlFrame {
    pub const fn from_bytes(bytes: [u8; CONTROL_FRAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTROL_FRAME_LEN] {
        &self.0
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        Self(bits.to_le_bytes())
    }

    pub(crate) fn bits(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }
}

/// Telemetry channel names in wire order.
pub const TELEMETRY_CHANNELS: [&str; 8] = [
    "BATT_AMP",
    "BATT_VOLT",
    "BOARD_AMP",
    "HYDRO",
    "TEMP",
    "PRESSURE",
    "LONGITUDE",
    "LATITUDE",
];

/// Raw telemetry values as reported by the vehicle. No sanity checks are applied;
/// NaN and infinities pass through.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryFrame {
    /// Battery current (A).
    pub batt_amp: f32,
    /// Battery voltage (V).
    pub batt_volt: f32,
    /// Board current (A).
    pub board_amp: f32,
    /// Hydrogen sensor (%).
    pub hydro: f32,
    /// Temperature (°C).
    pub temp: f32,
    pub pressure: f32,
    pub longitude: f32,
    pub latitude: f32,
}

impl TelemetryFrame {
    pub fn from_values(values: [f32; 8]) -> Self {
        let [
            batt_amp,
            batt_volt,
            board_amp,
            hydro,
            temp,
            pressure,
            longitude,
            latitude,
        ] = values;
        Self {
            batt_amp,
            batt_volt,
            board_amp,
            hydro,
            temp,
            pressure,
            longitude,
            latitude,
        }
    }

    /// Values in wire order (see [`TELEMETRY_CHANNELS`]).
    pub fn values(&self) -> [f32; 8] {
        [
            self.batt_amp,
            self.batt_volt,
            self.board_amp,
            self.hydro,
            self.temp,
            self.pressure,
            self.longitude,
            self.latitude,
        ]
    }
}

/// A telemetry frame stamped by the bridge, ready to send to the client.
///
/// Serializes as a flat object: `TIMESTAMP` first, then the channels in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TelemetryRecord {
    /// Seconds since the Unix epoch, taken when the frame was decoded.
    pub timestamp: f64,
    pub batt_amp: f64,
    pub batt_volt: f64,
    pub board_amp: f64,
    pub hydro: f64,
    pub temp: f64,
    pub pressure: f64,
    pub longitude: f64,
    pub latitude: f64,
}

impl TelemetryRecord {
    /// Stamp a frame, rounding every channel to 6 decimal digits.
    pub fn from_frame(frame: &TelemetryFrame, timestamp: f64) -> Self {
        Self {
            timestamp,
            batt_amp: round6(frame.batt_amp),
            batt_volt: round6(frame.batt_volt),
            board_amp: round6(frame.board_amp),
            hydro: round6(frame.hydro),
            temp: round6(frame.temp),
            pressure: round6(frame.pressure),
            longitude: round6(frame.longitude),
            latitude: round6(frame.latitude),
        }
    }

    /// Compact JSON, no trailing newline. Non-finite channels become `null`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Exact ties go to the even digit, so `0.0078125` becomes `0.007812`.
fn round6(value: f32) -> f64 {
    let value = f64::from(value);
    if !value.is_finite() {
        return value;
    }
    (value * 1_000_000.0).round_ties_even() / 1_000_000.0
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
