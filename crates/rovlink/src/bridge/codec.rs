//! Frame codecs for the ICU protocol.
//!
//! - Control frames: pure bit packing over [`FRAME_LAYOUT`], never fails
//! - Telemetry frames: fixed 32-byte decode, rejects any other length
//! - [`SerialCodec`]: tokio-util framing for the bridge → vehicle byte stream

use std::io;

use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{
    CONTROL_FRAME_LEN, ControlCommand, ControlFrame, FRAME_LAYOUT, TELEMETRY_FRAME_LEN,
    TelemetryFrame,
};

/// Telemetry buffer could not be interpreted as a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("telemetry frame must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Control datagram was not valid JSON or lacked a channel.
#[derive(Debug, thiserror::Error)]
#[error("invalid control datagram: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// Parse a client datagram payload.
pub fn parse_control(payload: &[u8]) -> Result<ControlCommand, ParseError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Pack a command into a frame.
///
/// Each transmitted channel keeps only its low `width` bits (two's complement for
/// negative values), so the wire value is `value mod 2^width`. RollG is dropped.
pub fn encode_control(command: &ControlCommand) -> ControlFrame {
    let bits = FRAME_LAYOUT.iter().fold(0u64, |bits, slot| {
        let value = command.channel(slot.channel) as u64 & slot.mask();
        bits | (value << slot.offset)
    });
    ControlFrame::from_bits(bits)
}

/// Unpack a frame. RollG is never transmitted and reads back as 0.
pub fn decode_control(frame: &ControlFrame) -> ControlCommand {
    let bits = frame.bits();
    let mut command = ControlCommand::default();
    for slot in FRAME_LAYOUT {
        command.set_channel(slot.channel, ((bits >> slot.offset) & slot.mask()) as i64);
    }
    command
}

pub fn decode_telemetry(bytes: &[u8]) -> Result<TelemetryFrame, FrameError> {
    if bytes.len() != TELEMETRY_FRAME_LEN {
        return Err(FrameError::WrongLength {
            expected: TELEMETRY_FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let mut values = [0f32; 8];
    for (value, raw) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    }
    Ok(TelemetryFrame::from_values(values))
}

/// Inverse of [`decode_telemetry`]; what the vehicle puts on the wire.
pub fn encode_telemetry(frame: &TelemetryFrame) -> [u8; TELEMETRY_FRAME_LEN] {
    let mut bytes = [0u8; TELEMETRY_FRAME_LEN];
    for (raw, value) in bytes.chunks_exact_mut(4).zip(frame.values()) {
        raw.copy_from_slice(&value.to_le_bytes());
    }
    bytes
}

impl ControlCommand {
    /// See [`parse_control`].
    pub fn from_json(payload: &[u8]) -> Result<Self, ParseError> {
        parse_control(payload)
    }

    pub fn encode(&self) -> ControlFrame {
        encode_control(self)
    }
}

impl ControlFrame {
    pub fn decode(&self) -> ControlCommand {
        decode_control(self)
    }
}

impl TelemetryFrame {
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode_telemetry(bytes)
    }

    pub fn encode(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        encode_telemetry(self)
    }
}

/// Item written to the vehicle on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFrame {
    /// Single handshake acknowledgement byte.
    Ack(u8),
    Control(ControlFrame),
}

/// Codec for the bridge → vehicle stream.
///
/// Encoding writes frames verbatim with no delimiter. Decoding mirrors what the
/// vehicle sees: one acknowledgement byte, then back-to-back 8-byte frames.
#[derive(Debug)]
pub struct SerialCodec {
    ack_pending: bool,
}

impl Default for SerialCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCodec {
    pub fn new() -> Self {
        Self { ack_pending: true }
    }
}

impl Encoder<SerialFrame> for SerialCodec {
    type Error = io::Error;

    fn encode(&mut self, item: SerialFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            SerialFrame::Ack(byte) => dst.extend_from_slice(&[byte]),
            SerialFrame::Control(frame) => dst.extend_from_slice(frame.as_bytes()),
        }
        tracing::trace!(buffered = dst.len(), "Encoded serial frame");
        Ok(())
    }
}

impl Decoder for SerialCodec {
    type Item = SerialFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.ack_pending {
            if src.is_empty() {
                return Ok(None);
            }
            self.ack_pending = false;
            return Ok(Some(SerialFrame::Ack(src.get_u8())));
        }

        if src.len() < CONTROL_FRAME_LEN {
            src.reserve(CONTROL_FRAME_LEN - src.len());
            return Ok(None);
        }

        let mut bytes = [0u8; CONTROL_FRAME_LEN];
        src.copy_to_slice(&mut bytes);
        Ok(Some(SerialFrame::Control(ControlFrame::from_bytes(bytes))))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::bridge::protocol::{ACK_BYTE, Channel};

    fn command(
        pitch: i64,
        roll: i64,
        yaw: i64,
        power: i64,
        pitch_g: i64,
        roll_g: i64,
        yaw_g: i64,
    ) -> ControlCommand {
        ControlCommand {
            pitch,
            roll,
            yaw,
            power,
            pitch_g,
            roll_g,
            yaw_g,
        }
    }

    #[test]
    fn reference_command_encodes_to_known_bytes() {
        let cmd = command(999, 555, 888, 666, 777, 766, 944);
        let frame = encode_control(&cmd);

        assert_eq!(
            frame.as_bytes(),
            &[0x9A, 0xC2, 0xDB, 0xF9, 0x56, 0x04, 0x7B, 0xC2]
        );
        assert_eq!(encode_control(&cmd), frame, "encoding must be deterministic");
    }

    #[test]
    fn reference_datagram_parses_and_encodes() {
        let cmd = parse_control(
            br#"{"Pitch":999,"Roll":555,"Yaw":888,"Power":666,"PitchG":777,"RollG":766,"YawG":944}"#,
        )
        .unwrap();
        assert_eq!(encode_control(&cmd).as_bytes()[0], 0x9A);
    }

    #[test]
    fn power_occupies_low_bits() {
        let frame = encode_control(&command(0, 0, 0, 1, 0, 0, 0));
        assert_eq!(frame.as_bytes(), &[1, 0, 0, 0, 0, 0, 0, 0]);

        let frame = encode_control(&command(0, 0, 0, 0x7FF, 0, 0, 0));
        assert_eq!(frame.as_bytes(), &[0xFF, 0x07, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn pitch_g_occupies_top_bits() {
        let frame = encode_control(&command(0, 0, 0, 0, 0x3FF, 0, 0));
        assert_eq!(frame.as_bytes(), &[0, 0, 0, 0, 0, 0, 0xC0, 0xFF]);
    }

    #[test]
    fn roll_high_bits_sit_below_yaw_g() {
        // Roll bits 8..=10 land in byte5 bits 1..=3, YawG bits 0..=3 in byte5 bits 4..=7.
        let frame = encode_control(&command(0, 0x700, 0, 0, 0, 0, 0));
        assert_eq!(frame.as_bytes()[5], 0b0000_1110);

        let frame = encode_control(&command(0, 0, 0, 0, 0, 0, 0x00F));
        assert_eq!(frame.as_bytes()[5], 0b1111_0000);
    }

    #[test]
    fn all_channels_at_max_fill_the_frame() {
        let frame = encode_control(&command(2047, 2047, 2047, 2047, 1023, 0, 1023));
        assert_eq!(frame.as_bytes(), &[0xFF; 8]);
    }

    fn in_range_command() -> impl Strategy<Value = ControlCommand> {
        (
            0..2048i64,
            0..2048i64,
            0..2048i64,
            0..2048i64,
            0..1024i64,
            any::<i64>(),
            0..1024i64,
        )
            .prop_map(|(pitch, roll, yaw, power, pitch_g, roll_g, yaw_g)| {
                command(pitch, roll, yaw, power, pitch_g, roll_g, yaw_g)
            })
    }

    proptest! {
        #[test]
        fn decode_recovers_every_in_range_command(cmd in in_range_command()) {
            let decoded = decode_control(&encode_control(&cmd));
            prop_assert_eq!(decoded, ControlCommand { roll_g: 0, ..cmd });
        }

        #[test]
        fn channels_transmit_value_mod_width(values in prop::array::uniform7(any::<i64>())) {
            let mut cmd = ControlCommand::default();
            for (channel, value) in Channel::ALL.into_iter().zip(values) {
                cmd.set_channel(channel, value);
            }
            let decoded = decode_control(&encode_control(&cmd));

            for channel in Channel::ALL {
                let expected = match channel.slot() {
                    Some(slot) => cmd.channel(channel).rem_euclid(1 << slot.width),
                    None => 0,
                };
                prop_assert_eq!(decoded.channel(channel), expected, "{}", channel);
            }
        }
    }

    #[test]
    fn in_range_values_survive_decode() {
        let samples = [
            command(0, 0, 0, 0, 0, 0, 0),
            command(999, 555, 888, 666, 777, 0, 944),
            command(2047, 1, 1024, 2046, 1023, 0, 512),
            command(1, 2, 3, 4, 5, 0, 6),
        ];
        for cmd in samples {
            assert_eq!(decode_control(&encode_control(&cmd)), cmd);
        }
    }

    #[test]
    fn roll_g_is_not_transmitted() {
        let with = command(10, 20, 30, 40, 50, 766, 60);
        let without = ControlCommand { roll_g: 0, ..with };

        assert_eq!(encode_control(&with), encode_control(&without));
        assert_eq!(decode_control(&encode_control(&with)).roll_g, 0);
    }

    #[test]
    fn over_wide_values_wrap_to_slot_width() {
        let cmd = command(2048 + 7, 4095, 65535, 2048, 1024 + 3, 0, 70000);
        let decoded = decode_control(&encode_control(&cmd));

        for channel in Channel::ALL {
            let Some(slot) = channel.slot() else {
                continue;
            };
            let expected = cmd.channel(channel).rem_euclid(1 << slot.width);
            assert_eq!(decoded.channel(channel), expected, "{channel}");
        }
        assert_eq!(decoded.pitch, 7);
        assert_eq!(decoded.power, 0);
        assert_eq!(decoded.pitch_g, 3);
    }

    #[test]
    fn negative_values_wrap_modulo_width() {
        let decoded = decode_control(&encode_control(&command(-1, -2048, 0, 0, -1, 0, 0)));
        assert_eq!(decoded.pitch, 2047);
        assert_eq!(decoded.roll, 0);
        assert_eq!(decoded.pitch_g, 1023);
    }

    #[test]
    fn zero_telemetry_frame_decodes_to_zeros() {
        let frame = decode_telemetry(&[0u8; 32]).unwrap();
        assert_eq!(frame.values(), [0.0; 8]);
    }

    #[test]
    fn telemetry_wrong_length_is_rejected() {
        assert_eq!(
            decode_telemetry(&[0u8; 31]),
            Err(FrameError::WrongLength {
                expected: 32,
                actual: 31
            })
        );
        assert!(decode_telemetry(&[0u8; 33]).is_err());
        assert!(decode_telemetry(&[0xAA]).is_err());
        assert!(decode_telemetry(&[]).is_err());
    }

    #[test]
    fn telemetry_channels_are_little_endian_in_order() {
        let mut bytes = [0u8; 32];
        bytes[4..8].copy_from_slice(&12.5f32.to_le_bytes());
        bytes[28..32].copy_from_slice(&(-33.25f32).to_le_bytes());

        let frame = decode_telemetry(&bytes).unwrap();
        assert_eq!(frame.batt_amp, 0.0);
        assert_eq!(frame.batt_volt, 12.5);
        assert_eq!(frame.latitude, -33.25);
        assert_eq!(encode_telemetry(&frame), bytes);
    }

    #[test]
    fn telemetry_does_not_validate_values() {
        let frame = TelemetryFrame {
            pressure: f32::NAN,
            longitude: f32::NEG_INFINITY,
            ..Default::default()
        };
        let decoded = decode_telemetry(&encode_telemetry(&frame)).unwrap();
        assert!(decoded.pressure.is_nan());
        assert_eq!(decoded.longitude, f32::NEG_INFINITY);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_control(b"not json").is_err());
        assert!(parse_control(b"").is_err());
        assert!(parse_control(&[0xFF, 0xFE]).is_err());
        assert!(parse_control(br#"{"Pitch":1}"#).is_err());
    }

    #[test]
    fn method_forms_match_free_functions() {
        let cmd = ControlCommand::from_json(
            br#"{"Pitch":1.9,"Roll":-0.5,"Yaw":3,"Power":4,"PitchG":5,"RollG":6,"YawG":7}"#,
        )
        .unwrap();
        assert_eq!(cmd.pitch, 1);
        assert_eq!(cmd.roll, 0);
        assert_eq!(cmd.encode(), encode_control(&cmd));
        assert_eq!(cmd.encode().decode(), ControlCommand { roll_g: 0, ..cmd });

        let frame = TelemetryFrame::from_values([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(TelemetryFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn serial_codec_writes_frames_verbatim() {
        let mut codec = SerialCodec::new();
        let mut buf = BytesMut::new();
        let frame = encode_control(&command(999, 555, 888, 666, 777, 766, 944));

        codec.encode(SerialFrame::Ack(ACK_BYTE), &mut buf).unwrap();
        codec.encode(SerialFrame::Control(frame), &mut buf).unwrap();

        assert_eq!(buf.len(), 1 + CONTROL_FRAME_LEN);
        assert_eq!(buf[0], 0xAA);
        assert_eq!(&buf[1..], frame.as_bytes());
    }

    #[test]
    fn serial_codec_decodes_ack_then_frames() {
        let mut codec = SerialCodec::new();
        let mut buf = BytesMut::from(&[0xAA, 1, 2, 3][..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(SerialFrame::Ack(0xAA))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(SerialFrame::Control(ControlFrame::from_bytes([
                1, 2, 3, 4, 5, 6, 7, 8
            ])))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], &[9u8]);
    }
}
