//! End-to-end session tests against a scripted in-memory probe.

use async_trait::async_trait;
use bric5_ble::ble::uuids::*;
use bric5_ble::{
    Advertisement, BricClient, CharacteristicInfo, ClientConfig, ClientEvent, DeviceTimestamp,
    Error, GattTransport, Measurement, Result, SessionEvent, SessionState, Transports, WriteMode,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

const PROBE_ID: &str = "probe-1";

/// In-memory probe answering every GATT operation immediately.
struct FakeProbe {
    events: mpsc::UnboundedSender<SessionEvent>,
    advertisements: Vec<Advertisement>,
    subscribed: Mutex<Vec<Uuid>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>, WriteMode)>>,
    connects: Mutex<Vec<String>>,
}

impl FakeProbe {
    fn new(events: mpsc::UnboundedSender<SessionEvent>, advertisements: Vec<Advertisement>) -> Self {
        Self {
            events,
            advertisements,
            subscribed: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
        }
    }

    fn send(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl GattTransport for FakeProbe {
    async fn start_scan(&self, _timeout: Duration) -> Result<()> {
        for advertisement in &self.advertisements {
            self.send(SessionEvent::DeviceFound(advertisement.clone()));
        }
        self.send(SessionEvent::ScanDone);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, identifier: &str) -> Result<()> {
        self.connects.lock().push(identifier.to_string());
        self.send(SessionEvent::Connected);
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        for service in [
            DEVICE_INFO_SERVICE_UUID,
            BATTERY_SERVICE_UUID,
            MEASUREMENT_SYNC_SERVICE_UUID,
            DEVICE_CONTROL_SERVICE_UUID,
        ] {
            self.send(SessionEvent::ServiceFound(service));
        }
        self.send(SessionEvent::ServicesDone);
        Ok(())
    }

    async fn discover_details(&self, service: Uuid) -> Result<()> {
        let characteristics = if service == MEASUREMENT_SYNC_SERVICE_UUID {
            vec![
                CharacteristicInfo::new(MEASUREMENT_PRIMARY_UUID, vec![CCCD_UUID]),
                CharacteristicInfo::new(MEASUREMENT_METADATA_UUID, vec![CCCD_UUID]),
                CharacteristicInfo::new(MEASUREMENT_ERRORS_UUID, vec![CCCD_UUID]),
                CharacteristicInfo::new(LAST_TIME_UUID, Vec::new()),
            ]
        } else if service == DEVICE_CONTROL_SERVICE_UUID {
            vec![CharacteristicInfo::new(DEVICE_CONTROL_UUID, Vec::new())]
        } else {
            return Err(Error::ServiceNotFound {
                uuid: service.to_string(),
            });
        };

        self.send(SessionEvent::ServiceResolved {
            service,
            characteristics,
        });
        Ok(())
    }

    async fn write_descriptor(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        assert_eq!(descriptor, CCCD_UUID);
        assert_eq!(value, &ENABLE_INDICATION_VALUE[..]);
        self.subscribed.lock().push(characteristic);
        Ok(())
    }

    async fn write_characteristic(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.writes
            .lock()
            .push((characteristic, value.to_vec(), mode));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.send(SessionEvent::Disconnected);
        Ok(())
    }
}

struct Harness {
    client: BricClient,
    probe: Arc<FakeProbe>,
    inbound: mpsc::UnboundedSender<SessionEvent>,
    events: broadcast::Receiver<ClientEvent>,
}

fn harness(advertisements: Vec<Advertisement>, config: ClientConfig) -> Harness {
    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let probe = Arc::new(FakeProbe::new(inbound.clone(), advertisements));
    let client = BricClient::with_transport(probe.clone(), inbound_rx, config);
    let events = client.subscribe();

    Harness {
        client,
        probe,
        inbound,
        events,
    }
}

fn bric_advertisements() -> Vec<Advertisement> {
    vec![
        Advertisement::low_energy("phone", "Pixel 8"),
        Advertisement {
            identifier: "classic".to_string(),
            name: Some("BRIC5_CLASSIC".to_string()),
            transports: Transports::CLASSIC,
            rssi: Some(-40),
        },
        Advertisement::low_energy(PROBE_ID, "BRIC5_0042"),
    ]
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<ClientEvent>, mut wanted: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_state(rx: &mut broadcast::Receiver<ClientEvent>, state: SessionState) {
    next_matching(rx, |e| *e == ClientEvent::StateChanged(state.clone())).await;
}

fn primary_payload(distance: f32) -> Vec<u8> {
    let mut value = vec![0xE8, 0x07, 3, 15, 9, 30, 0, 50];
    value.extend_from_slice(&distance.to_le_bytes());
    value.extend_from_slice(&180.0f32.to_le_bytes());
    value.extend_from_slice(&(-60.0f32).to_le_bytes());
    value
}

fn metadata_payload(reference_index: u32) -> Vec<u8> {
    let mut value = reference_index.to_le_bytes().to_vec();
    value.extend_from_slice(&65.0f32.to_le_bytes());
    value.extend_from_slice(&12.0f32.to_le_bytes());
    value.extend_from_slice(&18.5f32.to_le_bytes());
    value.extend_from_slice(&[8, 0, 1]);
    value
}

fn errors_payload() -> Vec<u8> {
    let mut value = vec![7];
    value.extend_from_slice(&0.5f32.to_le_bytes());
    value.extend_from_slice(&1.5f32.to_le_bytes());
    value.extend_from_slice(&[0; 9]);
    value
}

fn indicate(inbound: &mpsc::UnboundedSender<SessionEvent>, characteristic: Uuid, value: Vec<u8>) {
    inbound
        .send(SessionEvent::CharacteristicChanged {
            characteristic,
            value,
        })
        .unwrap();
}

async fn next_measurement(rx: &mut broadcast::Receiver<ClientEvent>) -> Measurement {
    match next_matching(rx, |e| matches!(e, ClientEvent::Measurement(_))).await {
        ClientEvent::Measurement(measurement) => measurement,
        other => panic!("unexpected event {:?}", other),
    }
}

/// Start a session and write as soon as `trigger` is observed, many times
/// over on a multi-threaded runtime.
async fn write_immediately_after(trigger: ClientEvent) {
    for _ in 0..50 {
        let mut h = harness(bric_advertisements(), ClientConfig::default());

        assert_ok!(h.client.start_scan().await);
        next_matching(&mut h.events, |e| *e == trigger).await;

        assert_ok!(
            h.client
                .write_device_time(DeviceTimestamp::new(2024, 1, 2, 3, 4, 5, 6))
                .await
        );
        assert_ok!(h.client.send_command([0x01]).await);

        let written: Vec<Uuid> = h.probe.writes.lock().iter().map(|w| w.0).collect();
        assert_eq!(written, vec![LAST_TIME_UUID, DEVICE_CONTROL_UUID]);

        assert_ok!(h.client.shutdown().await);
    }
}

#[tokio::test]
async fn test_full_session() {
    let mut h = harness(bric_advertisements(), ClientConfig::default());

    assert_ok!(h.client.start_scan().await);
    wait_for_state(&mut h.events, SessionState::Streaming).await;
    assert_eq!(h.probe.connects.lock().clone(), vec![PROBE_ID.to_string()]);

    indicate(&h.inbound, MEASUREMENT_METADATA_UUID, metadata_payload(42));
    indicate(&h.inbound, MEASUREMENT_PRIMARY_UUID, primary_payload(37.25));
    indicate(&h.inbound, MEASUREMENT_ERRORS_UUID, errors_payload());

    let measurement = next_measurement(&mut h.events).await;
    assert_eq!(measurement.metadata.reference_index, 42);
    assert_eq!(measurement.metadata.samples_averaged, 8);
    assert_eq!(measurement.metadata.measurement_type, 1);
    assert_eq!(measurement.primary.distance_meters, 37.25);
    assert_eq!(measurement.primary.azimuth_degrees, 180.0);
    assert_eq!(measurement.primary.timestamp.to_string(), "2024-03-15 09:30:00.50");
    assert_eq!(measurement.errors.first.code, 7);
    assert_eq!(measurement.errors.first.data2, 1.5);

    let mut subscribed = h.probe.subscribed.lock().clone();
    subscribed.sort();
    let mut expected = vec![
        MEASUREMENT_PRIMARY_UUID,
        MEASUREMENT_METADATA_UUID,
        MEASUREMENT_ERRORS_UUID,
    ];
    expected.sort();
    assert_eq!(subscribed, expected);

    assert_ok!(
        h.client
            .write_device_time(DeviceTimestamp::new(2024, 12, 31, 23, 59, 58, 99))
            .await
    );
    assert_ok!(h.client.send_command([0xAA; 24]).await);

    {
        let writes = h.probe.writes.lock();
        assert_eq!(writes.len(), 2);

        let (characteristic, value, mode) = &writes[0];
        assert_eq!(*characteristic, LAST_TIME_UUID);
        assert_eq!(value.len(), 20);
        assert_eq!(&value[..8], &[0xE8, 0x07, 12, 31, 23, 59, 58, 99]);
        assert!(value[8..].iter().all(|b| *b == 0));
        assert_eq!(*mode, WriteMode::WithResponse);

        let (characteristic, value, _) = &writes[1];
        assert_eq!(*characteristic, DEVICE_CONTROL_UUID);
        assert_eq!(value, &vec![0xAA; 20]);
    }

    assert_ok!(h.client.disconnect().await);
    next_matching(&mut h.events, |e| *e == ClientEvent::Disconnected).await;
    wait_for_state(&mut h.events, SessionState::Disconnected).await;

    assert!(matches!(
        h.client.send_command([0x01]).await,
        Err(Error::NotConnected)
    ));

    assert_ok!(h.client.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_writes_accepted_on_connected() {
    write_immediately_after(ClientEvent::Connected).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_writes_accepted_on_streaming() {
    write_immediately_after(ClientEvent::StateChanged(SessionState::Streaming)).await;
}

#[tokio::test]
async fn test_scan_without_probe_returns_idle() {
    let adverts = vec![Advertisement::low_energy("phone", "Pixel 8")];
    let mut h = harness(adverts, ClientConfig::default());

    assert_ok!(h.client.start_scan().await);

    let info = next_matching(&mut h.events, |e| matches!(e, ClientEvent::Info(_))).await;
    assert_eq!(info, ClientEvent::Info("Scan finished".to_string()));
    wait_for_state(&mut h.events, SessionState::Idle).await;
    assert!(h.probe.connects.lock().is_empty());

    assert_ok!(h.client.shutdown().await);
}

#[tokio::test]
async fn test_custom_prefix_and_unacknowledged_writes() {
    let adverts = vec![
        Advertisement::low_energy(PROBE_ID, "BRIC5_0042"),
        Advertisement::low_energy("lab-unit", "LAB_0001"),
    ];
    let config = ClientConfig::default()
        .with_name_prefix("LAB_")
        .with_write_response(false);
    let mut h = harness(adverts, config);

    assert_ok!(h.client.start_scan().await);
    wait_for_state(&mut h.events, SessionState::Streaming).await;
    assert_eq!(h.probe.connects.lock().clone(), vec!["lab-unit".to_string()]);

    assert_ok!(h.client.send_command([0x05]).await);
    let writes = h.probe.writes.lock().clone();
    assert_eq!(writes, vec![(DEVICE_CONTROL_UUID, vec![0x05], WriteMode::WithoutResponse)]);

    assert_ok!(h.client.shutdown().await);
}

#[tokio::test]
async fn test_link_loss_discards_partial_measurement() {
    let mut h = harness(bric_advertisements(), ClientConfig::default());

    assert_ok!(h.client.start_scan().await);
    wait_for_state(&mut h.events, SessionState::Streaming).await;

    indicate(&h.inbound, MEASUREMENT_PRIMARY_UUID, primary_payload(1.0));
    h.inbound.send(SessionEvent::Disconnected).unwrap();
    wait_for_state(&mut h.events, SessionState::Disconnected).await;

    // A new scan is allowed after link loss
    assert_ok!(h.client.start_scan().await);
    wait_for_state(&mut h.events, SessionState::Streaming).await;

    indicate(&h.inbound, MEASUREMENT_METADATA_UUID, metadata_payload(2));
    indicate(&h.inbound, MEASUREMENT_ERRORS_UUID, errors_payload());
    indicate(&h.inbound, MEASUREMENT_PRIMARY_UUID, primary_payload(2.0));

    let measurement = next_measurement(&mut h.events).await;
    assert_eq!(measurement.primary.distance_meters, 2.0);
    assert_eq!(measurement.metadata.reference_index, 2);

    assert_ok!(h.client.shutdown().await);
}

#[tokio::test]
async fn test_truncated_fragment_reported() {
    let mut h = harness(bric_advertisements(), ClientConfig::default());

    assert_ok!(h.client.start_scan().await);
    wait_for_state(&mut h.events, SessionState::Streaming).await;

    indicate(&h.inbound, MEASUREMENT_ERRORS_UUID, vec![1, 2, 3]);

    let info = next_matching(&mut h.events, |e| {
        matches!(e, ClientEvent::Info(m) if m.contains("errors"))
    })
    .await;
    assert!(matches!(info, ClientEvent::Info(m) if m.contains("expected 18 bytes, got 3")));
    assert_eq!(h.client.state(), SessionState::Streaming);

    assert_err!(h.client.start_scan().await);
    assert_ok!(h.client.shutdown().await);
}
