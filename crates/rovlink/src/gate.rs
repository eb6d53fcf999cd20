//! Handshake gate on the serial ingress path.
//!
//! The vehicle controller announces readiness with a single handshake byte. Until
//! then nothing it sends is telemetry, and the bridge must not drive it with control
//! frames. The gate is a one-way latch: once Ready, it never re-arms for the lifetime
//! of the serial connection.

use serde::Serialize;

use crate::bridge::protocol::HANDSHAKE_BYTE;

/// Handshake state of one serial connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandshakeState {
    /// Waiting for the readiness byte.
    #[default]
    AwaitingPeer,
    /// Peer is ready; chunks are telemetry.
    Ready,
}

/// What the caller should do with a chunk it just fed to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// The readiness byte arrived. Emitted exactly once per gate.
    HandshakeComplete,
    /// Forward the chunk to the telemetry path.
    Telemetry,
    /// Pre-handshake noise; drop the chunk.
    Discarded,
}

#[derive(Debug)]
pub struct HandshakeGate {
    state: HandshakeState,
    handshake_byte: u8,
}

impl Default for HandshakeGate {
    fn default() -> Self {
        Self::new(HANDSHAKE_BYTE)
    }
}

impl HandshakeGate {
    pub fn new(handshake_byte: u8) -> Self {
        Self {
            state: HandshakeState::AwaitingPeer,
            handshake_byte,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    /// Classify one received chunk.
    ///
    /// While awaiting the peer, only a chunk that is exactly the handshake byte
    /// counts. Once ready, every chunk (including another handshake byte) is
    /// would-be telemetry and length checking happens downstream.
    pub fn accept(&mut self, chunk: &[u8]) -> GateEvent {
        match self.state {
            HandshakeState::Ready => GateEvent::Telemetry,
            HandshakeState::AwaitingPeer if chunk == [self.handshake_byte] => {
                self.state = HandshakeState::Ready;
                tracing::info!(
                    handshake_byte = self.handshake_byte,
                    "Serial peer handshake received"
                );
                GateEvent::HandshakeComplete
            }
            HandshakeState::AwaitingPeer => {
                tracing::debug!(len = chunk.len(), "Discarding serial data before handshake");
                GateEvent::Discarded
            }
        }
    }
}
