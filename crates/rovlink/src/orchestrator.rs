//! Bridge orchestrator: owns the serial link and the two forwarding loops.
//!
//! Flow:
//! 1. Serial ingress feeds every read chunk through the [`HandshakeGate`]
//! 2. Control-forward waits for the handshake, writes the acknowledgement byte once,
//!    then drains the inbound-control queue into 8-byte frames
//! 3. Telemetry-forward waits for a client address, then drains the inbound-telemetry
//!    queue into JSON records sent to the latest client
//! 4. Shutdown is broadcast over a watch channel; every task stops at its next
//!    suspension point and a bounded wait aborts whatever is left

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};

use crate::bridge::codec::{
    SerialCodec, SerialFrame, decode_telemetry, encode_control, parse_control,
};
use crate::bridge::protocol::{TelemetryRecord, unix_timestamp};
use crate::config::BridgeConfig;
use crate::gate::{GateEvent, HandshakeGate, HandshakeState};
use crate::queue::{self, QueueError, QueueReceiver, QueueSender};
use crate::stats::{BridgeStats, Counter, StatsSnapshot};
use crate::transport::udp::{DatagramSink, run_datagram_ingress};

/// A control datagram as received from the network, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDatagram {
    pub payload: Bytes,
    pub source: SocketAddr,
}

impl InboundDatagram {
    pub fn new(payload: impl Into<Bytes>, source: SocketAddr) -> Self {
        Self {
            payload: payload.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("serial link failed: {0}")]
    Serial(#[source] io::Error),

    #[error("network transport failed: {0}")]
    Network(#[source] io::Error),

    #[error("serial peer did not complete the handshake within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("serial link closed by peer")]
    SerialClosed,

    #[error("bridge tasks did not stop within the shutdown timeout")]
    ShutdownTimeout,

    #[error("bridge task failed: {0}")]
    Task(#[from] JoinError),
}

type TaskResult = (&'static str, Result<(), BridgeError>);

/// Resolves once shutdown is requested. A dropped sender counts as a request.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Start the bridge tasks on the current runtime.
///
/// `serial_reader` and `serial_writer` are the two halves of the link to the vehicle;
/// `sink` carries telemetry back to the client. Control datagrams enter through
/// [`BridgeHandle::attach_datagram_source`] or [`BridgeHandle::control_sender`].
pub fn spawn_bridge<R, W, S>(
    config: &BridgeConfig,
    serial_reader: R,
    serial_writer: W,
    sink: S,
) -> BridgeHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    S: DatagramSink + 'static,
{
    let stats = Arc::new(BridgeStats::new());
    let (shutdown_tx, _) = watch::channel(false);
    let (handshake_tx, handshake_rx) = watch::channel(HandshakeState::AwaitingPeer);
    let (client_tx, client_rx) = watch::channel(None);
    let (control_tx, control_rx) = queue::channel(config.queue_capacity);
    let (telemetry_tx, telemetry_rx) = queue::channel(config.queue_capacity);

    let mut tasks = JoinSet::new();

    let ingress = SerialIngress {
        chunks: FramedRead::new(serial_reader, BytesCodec::new()),
        gate: HandshakeGate::new(config.handshake_byte),
        handshake_tx,
        telemetry_tx,
        stats: Arc::clone(&stats),
        shutdown: shutdown_tx.subscribe(),
    };
    tasks.spawn(async move { ("serial-ingress", ingress.run().await) });

    let control = ControlForward {
        serial: FramedWrite::new(serial_writer, SerialCodec::new()),
        control_rx,
        handshake_rx: handshake_rx.clone(),
        client_tx,
        ack_byte: config.ack_byte,
        handshake_timeout: config.handshake_timeout,
        discard_stale: config.discard_stale_control,
        stats: Arc::clone(&stats),
        shutdown: shutdown_tx.subscribe(),
    };
    tasks.spawn(async move { ("control-forward", control.run().await) });

    let telemetry = TelemetryForward {
        sink,
        telemetry_rx,
        client_rx: client_rx.clone(),
        telemetry_port: config.telemetry_port,
        stats: Arc::clone(&stats),
        shutdown: shutdown_tx.subscribe(),
    };
    tasks.spawn(async move { ("telemetry-forward", telemetry.run().await) });

    tracing::info!(
        handshake_byte = config.handshake_byte,
        ack_byte = config.ack_byte,
        handshake_timeout = ?config.handshake_timeout,
        queue_capacity = ?config.queue_capacity,
        telemetry_port = ?config.telemetry_port,
        discard_stale_control = config.discard_stale_control,
        "Bridge started"
    );

    BridgeHandle {
        control_tx,
        client_rx,
        handshake_rx,
        stats,
        shutdown_tx,
        shutdown_timeout: config.shutdown_timeout,
        tasks,
    }
}

/// Control surface of a running bridge. Dropping it aborts every task.
pub struct BridgeHandle {
    control_tx: QueueSender<InboundDatagram>,
    client_rx: watch::Receiver<Option<SocketAddr>>,
    handshake_rx: watch::Receiver<HandshakeState>,
    stats: Arc<BridgeStats>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Duration,
    tasks: JoinSet<TaskResult>,
}

impl BridgeHandle {
    /// Sender into the inbound-control queue, for callers that receive datagrams
    /// themselves.
    pub fn control_sender(&self) -> QueueSender<InboundDatagram> {
        self.control_tx.clone()
    }

    /// Receive control datagrams from `socket` until shutdown.
    pub fn attach_datagram_source(&mut self, socket: Arc<UdpSocket>) {
        let ingress = run_datagram_ingress(
            socket,
            self.control_tx.clone(),
            Arc::clone(&self.stats),
            self.shutdown_tx.subscribe(),
        );
        self.tasks
            .spawn(async move { ("datagram-ingress", ingress.await) });
    }

    pub fn handshake_state(&self) -> HandshakeState {
        *self.handshake_rx.borrow()
    }

    /// Most recent client address, if any control datagram has parsed yet.
    pub fn client_address(&self) -> Option<SocketAddr> {
        *self.client_rx.borrow()
    }

    pub fn subscribe_client_address(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.client_rx.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask every task to stop without waiting for them.
    pub fn trigger_shutdown(&self) {
        tracing::info!("Bridge shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for the first task to exit and return its outcome.
    ///
    /// Any exit is the end of the bridge: callers are expected to follow up with
    /// [`shutdown`](Self::shutdown).
    pub async fn wait_for_exit(&mut self) -> Result<(), BridgeError> {
        match self.tasks.join_next().await {
            Some(Ok((task, Ok(())))) => {
                tracing::info!(task, "Bridge task exited");
                Ok(())
            }
            Some(Ok((task, Err(e)))) => {
                tracing::error!(task, error = %e, "Bridge task failed");
                Err(e)
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Bridge task panicked or was cancelled");
                Err(BridgeError::Task(e))
            }
            None => Ok(()),
        }
    }

    /// Stop every task, waiting at most the configured shutdown timeout.
    ///
    /// Errors raised while tasks wind down are logged and swallowed. Tasks still
    /// running at the deadline are aborted.
    pub async fn shutdown(mut self) -> Result<(), BridgeError> {
        self.trigger_shutdown();

        let limit = self.shutdown_timeout;
        match tokio::time::timeout(limit, drain_tasks(&mut self.tasks)).await {
            Ok(()) => {
                tracing::info!("Bridge stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?limit,
                    remaining = self.tasks.len(),
                    "Bridge tasks did not stop in time, aborting"
                );
                self.tasks.abort_all();
                Err(BridgeError::ShutdownTimeout)
            }
        }
    }
}

async fn drain_tasks(tasks: &mut JoinSet<TaskResult>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((task, Ok(()))) => tracing::debug!(task, "Bridge task stopped"),
            Ok((task, Err(e))) => {
                tracing::debug!(task, error = %e, "Ignoring bridge task error during shutdown")
            }
            Err(e) => tracing::warn!(error = %e, "Bridge task panicked during shutdown"),
        }
    }
}

/// Reads the serial link and routes chunks through the handshake gate.
struct SerialIngress<R> {
    chunks: FramedRead<R, BytesCodec>,
    gate: HandshakeGate,
    handshake_tx: watch::Sender<HandshakeState>,
    telemetry_tx: QueueSender<Bytes>,
    stats: Arc<BridgeStats>,
    shutdown: watch::Receiver<bool>,
}

impl<R: AsyncRead + Unpin> SerialIngress<R> {
    async fn run(mut self) -> Result<(), BridgeError> {
        loop {
            let chunk = tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => {
                    tracing::debug!("Serial ingress stopping");
                    return Ok(());
                }
                chunk = self.chunks.next() => chunk,
            };

            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Serial read failed");
                    return Err(BridgeError::Serial(e));
                }
                None => {
                    tracing::warn!("Serial link reached end of stream");
                    return Err(BridgeError::SerialClosed);
                }
            };

            match self.gate.accept(&chunk) {
                GateEvent::HandshakeComplete => {
                    self.handshake_tx.send_replace(HandshakeState::Ready);
                }
                GateEvent::Discarded => self.stats.record(Counter::SerialIgnored),
                GateEvent::Telemetry => match self.telemetry_tx.push(chunk.freeze()) {
                    Ok(()) => {}
                    Err(QueueError::Full) => {
                        self.stats.record(Counter::TelemetryOverflow);
                        tracing::warn!("Telemetry queue full, dropping frame");
                    }
                    Err(QueueError::Closed) => {
                        tracing::debug!("Telemetry queue closed, serial ingress stopping");
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Sole writer of the serial link.
struct ControlForward<W> {
    serial: FramedWrite<W, SerialCodec>,
    control_rx: QueueReceiver<InboundDatagram>,
    handshake_rx: watch::Receiver<HandshakeState>,
    client_tx: watch::Sender<Option<SocketAddr>>,
    ack_byte: u8,
    handshake_timeout: Option<Duration>,
    discard_stale: bool,
    stats: Arc<BridgeStats>,
    shutdown: watch::Receiver<bool>,
}

impl<W: AsyncWrite + Unpin> ControlForward<W> {
    async fn run(mut self) -> Result<(), BridgeError> {
        let result = self.forward().await;

        self.control_rx.close();
        if let Err(e) = self.serial.close().await {
            tracing::debug!(error = %e, "Ignoring error while closing serial writer");
        }
        result
    }

    async fn forward(&mut self) -> Result<(), BridgeError> {
        if !self.await_handshake().await? {
            return Ok(());
        }

        self.serial
            .send(SerialFrame::Ack(self.ack_byte))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to write handshake acknowledgement");
                BridgeError::Serial(e)
            })?;
        tracing::info!(ack_byte = self.ack_byte, "Acknowledged serial handshake");

        if self.discard_stale {
            self.discard_queued();
        }

        loop {
            let datagram = tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => {
                    tracing::debug!("Control forwarding stopping");
                    return Ok(());
                }
                datagram = self.control_rx.recv() => match datagram {
                    Some(datagram) => datagram,
                    None => {
                        tracing::debug!("Control queue closed");
                        return Ok(());
                    }
                },
            };

            let command = match parse_control(&datagram.payload) {
                Ok(command) => command,
                Err(e) => {
                    self.stats.record(Counter::ControlRejected);
                    tracing::warn!(
                        source = %datagram.source,
                        error = %e,
                        "Dropping malformed control datagram"
                    );
                    continue;
                }
            };

            publish_client(&self.client_tx, datagram.source);

            let frame = encode_control(&command);
            self.serial
                .send(SerialFrame::Control(frame))
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Serial write failed");
                    BridgeError::Serial(e)
                })?;
            self.stats.record(Counter::ControlForwarded);
            tracing::trace!(
                source = %datagram.source,
                frame = ?frame.as_bytes(),
                "Forwarded control frame"
            );
        }
    }

    /// `Ok(false)` when shutdown or the end of serial ingress came first.
    async fn await_handshake(&mut self) -> Result<bool, BridgeError> {
        let timeout = self.handshake_timeout;
        let handshake_rx = &mut self.handshake_rx;
        let bounded = async move {
            let ready = async {
                handshake_rx
                    .wait_for(|state| *state == HandshakeState::Ready)
                    .await
                    .is_ok()
            };
            match timeout {
                Some(limit) => tokio::time::timeout(limit, ready).await.map_err(|_| {
                    tracing::error!(timeout = ?limit, "Serial peer handshake timed out");
                    BridgeError::HandshakeTimeout(limit)
                }),
                None => Ok(ready.await),
            }
        };

        tokio::select! {
            biased;

            _ = shutdown_requested(&mut self.shutdown) => Ok(false),
            ready = bounded => match ready? {
                true => Ok(true),
                false => {
                    tracing::debug!("Serial ingress ended before handshake");
                    Err(BridgeError::SerialClosed)
                }
            },
        }
    }

    /// Drop datagrams that queued up while waiting for the peer, keeping the
    /// address of the last parseable one.
    fn discard_queued(&mut self) {
        let mut discarded = 0u64;
        while let Some(datagram) = self.control_rx.try_recv() {
            if parse_control(&datagram.payload).is_ok() {
                publish_client(&self.client_tx, datagram.source);
            }
            self.stats.record(Counter::ControlDiscarded);
            discarded += 1;
        }
        if discarded > 0 {
            tracing::info!(discarded, "Discarded control datagrams queued before handshake");
        }
    }
}

fn publish_client(client_tx: &watch::Sender<Option<SocketAddr>>, source: SocketAddr) {
    client_tx.send_if_modified(|current| {
        if *current == Some(source) {
            return false;
        }
        tracing::info!(client = %source, previous = ?current, "Client address updated");
        *current = Some(source);
        true
    });
}

/// Sole user of the outbound datagram sink.
struct TelemetryForward<S> {
    sink: S,
    telemetry_rx: QueueReceiver<Bytes>,
    client_rx: watch::Receiver<Option<SocketAddr>>,
    telemetry_port: Option<u16>,
    stats: Arc<BridgeStats>,
    shutdown: watch::Receiver<bool>,
}

impl<S: DatagramSink> TelemetryForward<S> {
    async fn run(mut self) -> Result<(), BridgeError> {
        let result = self.forward().await;
        self.telemetry_rx.close();
        result
    }

    async fn forward(&mut self) -> Result<(), BridgeError> {
        let client_rx = &mut self.client_rx;
        let has_client = tokio::select! {
            biased;

            _ = shutdown_requested(&mut self.shutdown) => false,
            client = client_rx.wait_for(Option::is_some) => client.is_ok(),
        };
        if !has_client {
            return Ok(());
        }
        tracing::debug!("Client known, forwarding telemetry");

        loop {
            let chunk = tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => {
                    tracing::debug!("Telemetry forwarding stopping");
                    return Ok(());
                }
                chunk = self.telemetry_rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => {
                        tracing::debug!("Telemetry queue closed");
                        return Ok(());
                    }
                },
            };

            let frame = match decode_telemetry(&chunk) {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.record(Counter::TelemetryRejected);
                    tracing::warn!(error = %e, "Dropping malformed telemetry frame");
                    continue;
                }
            };

            let record = TelemetryRecord::from_frame(&frame, unix_timestamp());
            let payload = match record.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    self.stats.record(Counter::TelemetryRejected);
                    tracing::error!(error = %e, "Failed to serialize telemetry record");
                    continue;
                }
            };

            let client = *self.client_rx.borrow();
            let Some(client) = client else {
                continue;
            };
            let target = telemetry_target(client, self.telemetry_port);

            match self.sink.send_to(payload.as_bytes(), target).await {
                Ok(()) => {
                    self.stats.record(Counter::TelemetryForwarded);
                    tracing::trace!(%target, len = payload.len(), "Forwarded telemetry record");
                }
                Err(e) => {
                    self.stats.record(Counter::TelemetrySendFailures);
                    tracing::warn!(%target, error = %e, "Telemetry send failed");
                }
            }
        }
    }
}

fn telemetry_target(client: SocketAddr, port_override: Option<u16>) -> SocketAddr {
    match port_override {
        Some(port) => SocketAddr::new(client.ip(), port),
        None => client,
    }
}
