//! Forwarding counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    ControlForwarded,
    ControlRejected,
    ControlDiscarded,
    ControlOverflow,
    TelemetryForwarded,
    TelemetryRejected,
    TelemetryOverflow,
    TelemetrySendFailures,
    SerialIgnored,
}

/// Monotonic counters shared by the bridge tasks.
#[derive(Debug, Default)]
pub struct BridgeStats {
    control_forwarded: AtomicU64,
    control_rejected: AtomicU64,
    control_discarded: AtomicU64,
    control_overflow: AtomicU64,
    telemetry_forwarded: AtomicU64,
    telemetry_rejected: AtomicU64,
    telemetry_overflow: AtomicU64,
    telemetry_send_failures: AtomicU64,
    serial_ignored: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Control frames written to serial.
    pub control_forwarded: u64,
    /// Datagrams that failed to parse.
    pub control_rejected: u64,
    /// Datagrams dropped because they queued up before the handshake.
    pub control_discarded: u64,
    /// Datagrams dropped on a full queue.
    pub control_overflow: u64,
    /// Telemetry records sent to the client.
    pub telemetry_forwarded: u64,
    /// Serial chunks that were not a valid telemetry frame.
    pub telemetry_rejected: u64,
    pub telemetry_overflow: u64,
    pub telemetry_send_failures: u64,
    /// Serial chunks received before the handshake.
    pub serial_ignored: u64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::ControlForwarded => &self.control_forwarded,
            Counter::ControlRejected => &self.control_rejected,
            Counter::ControlDiscarded => &self.control_discarded,
            Counter::ControlOverflow => &self.control_overflow,
            Counter::TelemetryForwarded => &self.telemetry_forwarded,
            Counter::TelemetryRejected => &self.telemetry_rejected,
            Counter::TelemetryOverflow => &self.telemetry_overflow,
            Counter::TelemetrySendFailures => &self.telemetry_send_failures,
            Counter::SerialIgnored => &self.serial_ignored,
        }
    }

    pub(crate) fn record(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter| self.counter(counter).load(Ordering::Relaxed);
        StatsSnapshot {
            control_forwarded: load(Counter::ControlForwarded),
            control_rejected: load(Counter::ControlRejected),
            control_discarded: load(Counter::ControlDiscarded),
            control_overflow: load(Counter::ControlOverflow),
            telemetry_forwarded: load(Counter::TelemetryForwarded),
            telemetry_rejected: load(Counter::TelemetryRejected),
            telemetry_overflow: load(Counter::TelemetryOverflow),
            telemetry_send_failures: load(Counter::TelemetrySendFailures),
            serial_ignored: load(Counter::SerialIgnored),
        }
    }
}
