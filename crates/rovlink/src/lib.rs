//! rovlink: bridge between a UDP handheld controller and a serial vehicle controller.
//!
//! Control datagrams (JSON) are packed into 8-byte frames for the vehicle; 32-byte
//! telemetry frames from the vehicle are stamped and sent back to the latest client
//! as JSON. Nothing reaches the vehicle before it completes the serial handshake.

pub mod bridge;
pub mod config;
pub mod gate;
pub mod orchestrator;
pub mod queue;
#[cfg(unix)]
pub mod server;
pub mod stats;
pub mod transport;
mod version;

pub use config::{BridgeConfig, ConfigError};
pub use gate::{GateEvent, HandshakeGate, HandshakeState};
pub use orchestrator::{BridgeError, BridgeHandle, InboundDatagram, spawn_bridge};
#[cfg(unix)]
pub use server::serve;
pub use stats::{BridgeStats, StatsSnapshot};
pub use transport::DatagramSink;
pub use version::{ROVLINK_VERSION, VersionInfo};
