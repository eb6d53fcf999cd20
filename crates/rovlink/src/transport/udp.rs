//! UDP transport for the handheld client.
//!
//! One socket serves both directions: the ingress task receives control datagrams
//! on it, and the telemetry loop sends records from it through [`DatagramSink`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::bytes::Bytes;

use crate::orchestrator::{BridgeError, InboundDatagram, shutdown_requested};
use crate::queue::{QueueError, QueueSender};
use crate::stats::{BridgeStats, Counter};

/// Receive buffer size. Longer datagrams are truncated by the OS and then fail to
/// parse.
pub const MAX_DATAGRAM_LEN: usize = 4096;

/// Outbound side of the network transport.
///
/// Lets the telemetry loop be driven without a real socket in tests.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Send one payload as a single datagram.
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<()>;
}

#[async_trait]
impl DatagramSink for UdpSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<()> {
        let sent = UdpSocket::send_to(self, payload, target).await?;
        if sent != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, payload.len()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: DatagramSink + ?Sized> DatagramSink for Arc<T> {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<()> {
        (**self).send_to(payload, target).await
    }
}

/// Feed received datagrams into the inbound-control queue until shutdown.
pub async fn run_datagram_ingress(
    socket: Arc<UdpSocket>,
    control_tx: QueueSender<InboundDatagram>,
    stats: Arc<BridgeStats>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        let received = tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => {
                tracing::debug!("Datagram ingress stopping");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, source)) => {
                let datagram = InboundDatagram {
                    payload: Bytes::copy_from_slice(&buf[..len]),
                    source,
                };
                match control_tx.push(datagram) {
                    Ok(()) => tracing::trace!(%source, len, "Queued control datagram"),
                    Err(QueueError::Full) => {
                        stats.record(Counter::ControlOverflow);
                        tracing::warn!(%source, "Control queue full, dropping datagram");
                    }
                    Err(QueueError::Closed) => {
                        tracing::debug!("Control queue closed, datagram ingress stopping");
                        return Ok(());
                    }
                }
            }
            // An unreachable client makes Linux report ICMP errors on the next receive.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                ) =>
            {
                tracing::debug!(error = %e, "Ignoring ICMP error on control socket");
            }
            Err(e) => {
                tracing::error!(error = %e, "Control socket receive failed");
                return Err(BridgeError::Network(e));
            }
        }
    }
}
