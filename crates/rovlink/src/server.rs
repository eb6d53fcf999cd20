//! Process entry point: bind the control socket, open the serial port, run the
//! bridge until a signal arrives or a task exits.
//!
//! Any task exit ends `serve` so a process supervisor can restart the bridge with a
//! fresh serial connection and handshake.

use std::io;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::signal::unix::{Signal, SignalKind, signal};

use crate::config::BridgeConfig;
use crate::orchestrator::spawn_bridge;
use crate::transport::serial::{SerialPort, SerialSettings};
use crate::version::VersionInfo;

/// Run the bridge with real transports until SIGINT/SIGTERM or the first task exit.
pub async fn serve(config: BridgeConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;

    let socket = UdpSocket::bind((config.bind_host.as_str(), config.control_port))
        .await
        .with_context(|| {
            format!(
                "failed to bind control socket on {}:{}",
                config.bind_host, config.control_port
            )
        })?;
    let socket = Arc::new(socket);
    let local_addr = socket.local_addr().context("control socket has no address")?;

    let port = SerialPort::open(&config.serial_device, &SerialSettings::from_config(&config))
        .with_context(|| {
            format!(
                "failed to open serial device {}",
                config.serial_device.display()
            )
        })?;
    let (serial_reader, serial_writer) = tokio::io::split(port);

    let mut bridge = spawn_bridge(&config, serial_reader, serial_writer, Arc::clone(&socket));
    bridge.attach_datagram_source(socket);

    let version = VersionInfo::new();
    tracing::info!(
        version = version.rovlink,
        control = %local_addr,
        serial = %config.serial_device.display(),
        baud_rate = config.baud_rate,
        "rovlink bridge running"
    );

    let exit = tokio::select! {
        name = signals.recv() => {
            tracing::info!(signal = name, "Shutdown signal received");
            Ok(())
        }
        exit = bridge.wait_for_exit() => exit,
    };

    let stats = bridge.stats();
    let stopped = bridge.shutdown().await;
    tracing::info!(?stats, "Bridge counters at exit");

    exit.context("bridge stopped")?;
    stopped.context("bridge did not shut down cleanly")?;
    Ok(())
}

/// SIGTERM and SIGINT listeners, registered before any transport is opened.
struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    fn install() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}
