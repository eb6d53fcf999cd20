//! Transports at the edges of the bridge.
//!
//! - **udp**: control datagrams in, telemetry records out
//! - **serial**: raw-mode tty to the vehicle controller (unix only)

#[cfg(unix)]
pub mod serial;
pub mod udp;

#[cfg(unix)]
pub use serial::{SerialPort, SerialSettings};
pub use udp::{DatagramSink, MAX_DATAGRAM_LEN, run_datagram_ingress};
