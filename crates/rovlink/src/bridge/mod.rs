//! ICU wire protocol between the bridge and the vehicle controller.

pub mod codec;
pub mod protocol;

pub use codec::{
    FrameError, ParseError, SerialCodec, SerialFrame, decode_control, decode_telemetry,
    encode_control, encode_telemetry, parse_control,
};
pub use protocol::{
    ACK_BYTE, CONTROL_FRAME_LEN, Channel, ChannelSlot, ControlCommand, ControlFrame,
    FRAME_LAYOUT, HANDSHAKE_BYTE, ROLL_G_TRANSMITTED, TELEMETRY_CHANNELS, TELEMETRY_FRAME_LEN,
    TelemetryFrame, TelemetryRecord,
};
