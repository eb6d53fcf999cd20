//! End-to-end bridge over real loopback UDP sockets, with an in-memory serial link
//! standing in for the vehicle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rovlink::bridge::{TelemetryFrame, encode_telemetry};
use rovlink::{BridgeConfig, BridgeHandle, spawn_bridge};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::UdpSocket;

const REFERENCE: &str =
    r#"{"Pitch":999,"Roll":555,"Yaw":888,"Power":666,"PitchG":777,"RollG":766,"YawG":944}"#;
const REFERENCE_FRAME: [u8; 8] = [0x9A, 0xC2, 0xDB, 0xF9, 0x56, 0x04, 0x7B, 0xC2];
const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    bridge: BridgeHandle,
    bridge_addr: SocketAddr,
    vehicle: DuplexStream,
}

async fn start(config: BridgeConfig) -> Rig {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let bridge_addr = socket.local_addr().unwrap();

    let (bridge_side, vehicle) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(bridge_side);
    let mut bridge = spawn_bridge(&config, reader, writer, Arc::clone(&socket));
    bridge.attach_datagram_source(socket);

    let mut rig = Rig {
        bridge,
        bridge_addr,
        vehicle,
    };
    rig.vehicle.write_all(&[0xAA]).await.unwrap();
    assert_eq!(rig.read_serial::<1>().await, [0xAA]);
    rig
}

impl Rig {
    async fn read_serial<const N: usize>(&mut self) -> [u8; N] {
        let mut buf = [0u8; N];
        tokio::time::timeout(WAIT, self.vehicle.read_exact(&mut buf))
            .await
            .expect("timed out waiting for serial output")
            .unwrap();
        buf
    }

    async fn send_telemetry(&mut self, values: [f32; 8]) {
        let bytes = encode_telemetry(&TelemetryFrame::from_values(values));
        self.vehicle.write_all(&bytes).await.unwrap();
    }
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_record(socket: &UdpSocket) -> (serde_json::Value, SocketAddr) {
    let mut buf = [0u8; 1024];
    let (len, from) = tokio::time::timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for telemetry")
        .unwrap();
    (serde_json::from_slice(&buf[..len]).unwrap(), from)
}

#[tokio::test]
async fn control_and_telemetry_round_trip() {
    let mut rig = start(BridgeConfig::default()).await;
    let handheld = client().await;

    handheld
        .send_to(REFERENCE.as_bytes(), rig.bridge_addr)
        .await
        .unwrap();
    assert_eq!(rig.read_serial::<8>().await, REFERENCE_FRAME);
    assert_eq!(
        rig.bridge.client_address(),
        Some(handheld.local_addr().unwrap())
    );

    rig.send_telemetry([1.5, 12.25, 0.5, 42.0, 21.75, 1013.25, 8.5, 49.25])
        .await;
    let (record, from) = recv_record(&handheld).await;

    assert_eq!(from, rig.bridge_addr);
    let fields = record.as_object().unwrap();
    assert_eq!(fields.len(), 9);
    assert_eq!(record["BATT_AMP"], 1.5);
    assert_eq!(record["PRESSURE"], 1013.25);
    assert_eq!(record["LONGITUDE"], 8.5);
    assert!(record["TIMESTAMP"].is_f64());

    let stats = rig.bridge.stats();
    assert_eq!(stats.control_forwarded, 1);
    assert_eq!(stats.telemetry_forwarded, 1);

    rig.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn telemetry_follows_the_latest_client() {
    let mut rig = start(BridgeConfig::default()).await;
    let first = client().await;
    let second = client().await;

    first
        .send_to(REFERENCE.as_bytes(), rig.bridge_addr)
        .await
        .unwrap();
    rig.read_serial::<8>().await;
    second
        .send_to(REFERENCE.as_bytes(), rig.bridge_addr)
        .await
        .unwrap();
    rig.read_serial::<8>().await;

    rig.send_telemetry([0.0; 8]).await;
    let (record, _) = recv_record(&second).await;
    assert_eq!(record["TEMP"], 0.0);

    let mut buf = [0u8; 64];
    let stray = tokio::time::timeout(Duration::from_millis(100), first.recv_from(&mut buf)).await;
    assert!(stray.is_err(), "previous client still received telemetry");

    rig.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_datagrams_are_skipped() {
    let mut rig = start(BridgeConfig::default()).await;
    let handheld = client().await;

    handheld.send_to(b"{\"Pitch\":", rig.bridge_addr).await.unwrap();
    handheld
        .send_to(
            br#"{"Pitch":"up","Roll":0,"Yaw":0,"Power":0,"PitchG":0,"RollG":0,"YawG":0}"#,
            rig.bridge_addr,
        )
        .await
        .unwrap();
    handheld
        .send_to(REFERENCE.as_bytes(), rig.bridge_addr)
        .await
        .unwrap();

    assert_eq!(rig.read_serial::<8>().await, REFERENCE_FRAME);
    assert_eq!(rig.bridge.stats().control_rejected, 2);

    rig.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn telemetry_port_override_targets_fixed_port() {
    let listener = client().await;
    let telemetry_port = listener.local_addr().unwrap().port();
    let mut rig = start(BridgeConfig::default().with_telemetry_port(Some(telemetry_port))).await;
    let handheld = client().await;

    handheld
        .send_to(REFERENCE.as_bytes(), rig.bridge_addr)
        .await
        .unwrap();
    rig.read_serial::<8>().await;

    rig.send_telemetry([3.0; 8]).await;
    let (record, from) = recv_record(&listener).await;
    assert_eq!(from, rig.bridge_addr);
    assert_eq!(record["HYDRO"], 3.0);

    rig.bridge.shutdown().await.unwrap();
}
