use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tracing::{debug, instrument};

use super::assigned_numbers::{characteristic_name, service_name};
use super::model::{
    Advertisement, AdvertisementData, Capability, CapabilitySet, CharacteristicInfo, ServiceInfo,
};
use super::transport::{
    AdvertisementFeed, BleTransport, Notification, NotificationFeed, TransportLink, WriteKind,
};
use crate::error::{FixtureError, TransportError};
use crate::gatt_uuid::normalize_uuid;

const ABSENT: &str = "-";
const NOTIFICATION_CAPACITY: usize = 64;

const VENDOR_SERVICE: &str = "d44bc439-abfd-45a2-b575-925416129600";
const VENDOR_COMMAND: &str = "d44bc439-abfd-45a2-b575-92541612960a";

/// Parsed fake scan fixture records.
///
/// Records are `address|name|service_uuids|rssi` separated by `;`. Service
/// UUIDs are comma separated and `-` marks an absent field.
#[derive(Debug, Clone, Default)]
pub struct ScanFixture {
    advertisements: Vec<Advertisement>,
}

impl ScanFixture {
    #[must_use]
    pub fn advertisements(&self) -> &[Advertisement] {
        &self.advertisements
    }
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }

        let advertisements = value
            .split(';')
            .filter(|record| !record.trim().is_empty())
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { advertisements })
    }
}

/// Notifications emitted by the fake link as soon as their characteristic is
/// subscribed. Written as `uuid=hex` pairs separated by `,`.
#[derive(Debug, Clone, Default)]
pub struct NotificationFixture {
    notifications: Vec<Notification>,
}

impl FromStr for NotificationFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }

        let notifications = value
            .split(',')
            .map(|record| {
                let (uuid, payload) = record
                    .split_once('=')
                    .ok_or(FixtureError::InvalidNotificationRecord)?;
                let uuid = uuid.trim();
                if uuid.is_empty() {
                    return Err(FixtureError::InvalidNotificationRecord);
                }
                let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
                Ok(Notification::new(normalize_uuid(uuid), hex::decode(cleaned)?))
            })
            .collect::<Result<Vec<_>, FixtureError>>()?;
        Ok(Self { notifications })
    }
}

/// Settings for constructing a fake transport.
#[derive(Debug, Builder)]
pub struct FakeTransportConfig {
    #[builder(default)]
    scan_fixture: ScanFixture,
    #[builder(default)]
    notifications: NotificationFixture,
    /// Characteristics whose reads fail with a transport error.
    #[builder(default)]
    failing_reads: Vec<String>,
    #[builder(default)]
    fail_connect: bool,
    /// Replaces the built-in GATT table.
    services: Option<Vec<ServiceInfo>>,
    /// Delay before each fixture advertisement is delivered.
    #[builder(default)]
    advertisement_interval: Duration,
    /// Time each read or write spends on the link before completing.
    operation_delay: Option<Duration>,
}

/// In-memory transport used in tests and hardware-free runs.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

#[derive(Debug)]
struct FakeState {
    advertisements: Vec<Advertisement>,
    services: Vec<ServiceInfo>,
    fixture_notifications: Vec<Notification>,
    failing_reads: HashSet<String>,
    fail_connect: bool,
    advertisement_interval: Duration,
    operation_delay: Option<Duration>,
    notifications: broadcast::Sender<Notification>,
    runtime: Mutex<FakeRuntime>,
}

#[derive(Debug, Default)]
struct FakeRuntime {
    scanning: bool,
    connected: bool,
    values: HashMap<String, Vec<u8>>,
    writes: Vec<RecordedWrite>,
    subscriptions: BTreeSet<String>,
}

/// A write observed by the fake link.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordedWrite {
    pub uuid: String,
    pub payload: Vec<u8>,
    pub kind: WriteKind,
}

impl FakeState {
    fn runtime(&self) -> MutexGuard<'_, FakeRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.runtime().connected {
            Ok(())
        } else {
            Err(TransportError::LinkLost)
        }
    }

    async fn occupy_link(&self) {
        if let Some(delay) = self.operation_delay {
            sleep(delay).await;
        }
    }

    fn characteristic(&self, uuid: &str) -> Result<&CharacteristicInfo, TransportError> {
        self.services
            .iter()
            .flat_map(ServiceInfo::characteristics)
            .find(|characteristic| characteristic.uuid() == uuid)
            .ok_or_else(|| TransportError::UnknownCharacteristic {
                uuid: uuid.to_string(),
            })
    }
}

impl FakeTransport {
    /// Creates a fake transport from explicit settings.
    #[must_use]
    pub fn new(config: FakeTransportConfig) -> Self {
        let (services, values) = match config.services {
            Some(services) => (services, HashMap::new()),
            None => default_gatt(),
        };
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            state: Arc::new(FakeState {
                advertisements: config.scan_fixture.advertisements,
                services,
                fixture_notifications: config.notifications.notifications,
                failing_reads: config
                    .failing_reads
                    .iter()
                    .map(String::as_str)
                    .map(normalize_uuid)
                    .collect(),
                fail_connect: config.fail_connect,
                advertisement_interval: config.advertisement_interval,
                operation_delay: config.operation_delay,
                notifications,
                runtime: Mutex::new(FakeRuntime {
                    values,
                    ..FakeRuntime::default()
                }),
            }),
        }
    }

    /// Returns a handle for pushing values and dropping the link from tests.
    #[must_use]
    pub fn notifier(&self) -> FakeNotifier {
        FakeNotifier {
            state: Arc::clone(&self.state),
        }
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state.runtime().scanning
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.runtime().connected
    }

    /// Returns every write the link accepted, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.runtime().writes.clone()
    }

    /// Returns the characteristics currently registered for notifications.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.runtime().subscriptions.iter().cloned().collect()
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<AdvertisementFeed, TransportError> {
        self.state.runtime().scanning = true;

        let (sender, receiver) = mpsc::unbounded_channel();
        let advertisements = self.state.advertisements.clone();
        let interval = self.state.advertisement_interval;
        tokio::spawn(async move {
            for advertisement in advertisements {
                if !interval.is_zero() {
                    sleep(interval).await;
                }
                if sender.send(advertisement).is_err() {
                    break;
                }
            }
        });

        // A real adapter keeps listening after the last fixture record.
        let feed = UnboundedReceiverStream::new(receiver).chain(tokio_stream::pending());
        Ok(Box::pin(feed))
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.runtime().scanning = false;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, address: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        if self.state.fail_connect {
            return Err(TransportError::Fake {
                reason: format!("connection to {address} refused"),
            });
        }
        let Some(advertisement) = self
            .state
            .advertisements
            .iter()
            .find(|advertisement| advertisement.address().eq_ignore_ascii_case(address))
        else {
            return Err(TransportError::UnknownPeripheral {
                address: address.to_string(),
            });
        };

        {
            let mut runtime = self.state.runtime();
            runtime.connected = true;
            runtime.subscriptions.clear();
        }
        debug!(address = advertisement.address(), "fake link established");

        Ok(Box::new(FakeLink {
            address: advertisement.address().to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Debug)]
struct FakeLink {
    address: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl TransportLink for FakeLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.state.runtime().connected)
    }

    async fn list_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        self.state.ensure_connected()?;
        Ok(self.state.services.clone())
    }

    async fn read(&self, uuid: &str) -> Result<Vec<u8>, TransportError> {
        self.state.ensure_connected()?;
        self.state.characteristic(uuid)?;
        self.state.occupy_link().await;
        if self.state.failing_reads.contains(uuid) {
            return Err(TransportError::Fake {
                reason: format!("read of {uuid} rejected"),
            });
        }
        Ok(self
            .state
            .runtime()
            .values
            .get(uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(
        &self,
        uuid: &str,
        payload: &[u8],
        kind: WriteKind,
    ) -> Result<(), TransportError> {
        self.state.ensure_connected()?;
        self.state.characteristic(uuid)?;
        self.state.occupy_link().await;
        let mut runtime = self.state.runtime();
        runtime.values.insert(uuid.to_string(), payload.to_vec());
        runtime.writes.push(RecordedWrite {
            uuid: uuid.to_string(),
            payload: payload.to_vec(),
            kind,
        });
        Ok(())
    }

    async fn subscribe(&self, uuid: &str) -> Result<(), TransportError> {
        self.state.ensure_connected()?;
        self.state.characteristic(uuid)?;
        self.state.runtime().subscriptions.insert(uuid.to_string());

        for notification in &self.state.fixture_notifications {
            if notification.uuid() == uuid {
                // No receiver just means nobody listens yet.
                let _ = self.state.notifications.send(notification.clone());
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, uuid: &str) -> Result<(), TransportError> {
        self.state.ensure_connected()?;
        self.state.runtime().subscriptions.remove(uuid);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationFeed, TransportError> {
        let receiver = self.state.notifications.subscribe();
        Ok(Box::pin(
            BroadcastStream::new(receiver).filter_map(Result::ok),
        ))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut runtime = self.state.runtime();
        runtime.connected = false;
        runtime.subscriptions.clear();
        Ok(())
    }
}

/// Drives peripheral-side events on a [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct FakeNotifier {
    state: Arc<FakeState>,
}

impl FakeNotifier {
    /// Pushes a value from the peripheral.
    ///
    /// Returns `false` when the link is down or the characteristic has no
    /// active registration, in which case nothing is delivered.
    pub fn notify(&self, uuid: &str, value: &[u8]) -> bool {
        let uuid = normalize_uuid(uuid);
        {
            let runtime = self.state.runtime();
            if !runtime.connected || !runtime.subscriptions.contains(&uuid) {
                return false;
            }
        }
        self.state
            .notifications
            .send(Notification::new(uuid, value.to_vec()))
            .is_ok()
    }

    /// Simulates the peripheral going out of range.
    pub fn drop_link(&self) {
        let mut runtime = self.state.runtime();
        runtime.connected = false;
        runtime.subscriptions.clear();
    }
}

fn parse_scan_record(raw_record: &str) -> Result<Advertisement, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [address, name, services, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if address.is_empty() || *address == ABSENT {
        return Err(FixtureError::EmptyAddress);
    }

    let name = present(name).map(ToString::to_string);
    let service_uuids = present(services)
        .map(|services| {
            services
                .split(',')
                .map(str::trim)
                .filter(|uuid| !uuid.is_empty())
                .map(normalize_uuid)
                .collect()
        })
        .unwrap_or_default();
    let rssi = present(rssi).map(str::parse::<i16>).transpose()?;

    let data = AdvertisementData::new(name.clone(), rssi).with_service_uuids(service_uuids);
    Ok(Advertisement::new(*address, name, data))
}

fn present(field: &str) -> Option<&str> {
    (!field.is_empty() && field != ABSENT).then_some(field)
}

fn default_gatt() -> (Vec<ServiceInfo>, HashMap<String, Vec<u8>>) {
    let read = CapabilitySet::default().with(Capability::Read);
    let notify = CapabilitySet::default().with(Capability::Notify);
    let write = CapabilitySet::default().with(Capability::Write);

    let services = vec![
        sig_service(
            "180F",
            vec![sig_characteristic("2A19", read.with(Capability::Notify))],
        ),
        sig_service(
            "180D",
            vec![
                sig_characteristic("2A39", write),
                sig_characteristic("2A37", notify),
                sig_characteristic("2A38", read),
            ],
        ),
        sig_service("180A", vec![sig_characteristic("2A29", read)]),
        ServiceInfo::new(
            VENDOR_SERVICE,
            "Unknown",
            vec![CharacteristicInfo::new(
                VENDOR_COMMAND,
                "Unknown",
                CapabilitySet::default()
                    .with(Capability::WriteWithoutResponse)
                    .with(Capability::Indicate),
            )],
        ),
    ];

    let values = HashMap::from([
        (normalize_uuid("2A19"), vec![0x5A]),
        (normalize_uuid("2A38"), vec![0x01]),
        (normalize_uuid("2A29"), b"Acme".to_vec()),
    ]);
    (services, values)
}

fn sig_service(short: &str, characteristics: Vec<CharacteristicInfo>) -> ServiceInfo {
    let uuid = normalize_uuid(short);
    let description = service_name(&uuid);
    ServiceInfo::new(uuid, description, characteristics)
}

fn sig_characteristic(short: &str, capabilities: CapabilitySet) -> CharacteristicInfo {
    let uuid = normalize_uuid(short);
    let description = characteristic_name(&uuid);
    CharacteristicInfo::new(uuid, description, capabilities)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const HEART_RATE_MEASUREMENT: &str = "00002a37-0000-1000-8000-00805f9b34fb";

    fn transport() -> FakeTransport {
        let fixture = "AA:BB:CC:DD:EE:01|Polar H10|180D,180F|-61"
            .parse::<ScanFixture>()
            .expect("fixture should parse");
        FakeTransport::new(FakeTransportConfig::builder().scan_fixture(fixture).build())
    }

    #[rstest]
    #[case("AA:01|HR|180D|-43", 1)]
    #[case("AA:01|HR|180D|-43;AA:02|-|-|-", 2)]
    #[case("AA:01|HR|180D|-43;", 1)]
    fn scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let fixture = fixture.parse::<ScanFixture>().expect("fixture should parse");
        assert_eq!(expected_count, fixture.advertisements().len());
    }

    #[test]
    fn scan_fixture_marks_absent_fields() {
        let fixture = "AA:02|-|-|-".parse::<ScanFixture>().expect("fixture should parse");
        let advertisement = &fixture.advertisements()[0];
        assert_eq!(None, advertisement.name());
        assert_eq!(None, advertisement.data().rssi());
        assert!(advertisement.data().service_uuids().is_empty());
    }

    #[test]
    fn scan_fixture_normalises_service_uuids() {
        let fixture = "AA:01|HR|180D, 180F|-43"
            .parse::<ScanFixture>()
            .expect("fixture should parse");
        assert_eq!(
            vec![
                "0000180d-0000-1000-8000-00805f9b34fb".to_string(),
                "0000180f-0000-1000-8000-00805f9b34fb".to_string(),
            ],
            fixture.advertisements()[0].data().service_uuids().to_vec()
        );
    }

    #[rstest]
    #[case("AA:01|HR|180D")]
    #[case("AA:01|HR|180D|-43|extra")]
    fn scan_fixture_rejects_invalid_field_count(#[case] fixture: &str) {
        assert_matches!(
            fixture.parse::<ScanFixture>(),
            Err(FixtureError::InvalidRecordFieldCount)
        );
    }

    #[test]
    fn scan_fixture_rejects_bad_rssi() {
        assert_matches!(
            "AA:01|HR|180D|loud".parse::<ScanFixture>(),
            Err(FixtureError::InvalidRssi(_))
        );
    }

    #[test]
    fn notification_fixture_parses_uuid_payload_pairs() {
        let fixture = "2A37=0650,2a19=5a"
            .parse::<NotificationFixture>()
            .expect("fixture should parse");
        assert_eq!(
            vec![
                Notification::new(HEART_RATE_MEASUREMENT, vec![0x06, 0x50]),
                Notification::new("00002a19-0000-1000-8000-00805f9b34fb", vec![0x5A]),
            ],
            fixture.notifications
        );
    }

    #[rstest]
    #[case("2A37")]
    #[case("=0650")]
    fn notification_fixture_rejects_malformed_records(#[case] fixture: &str) {
        assert_matches!(
            fixture.parse::<NotificationFixture>(),
            Err(FixtureError::InvalidNotificationRecord)
        );
    }

    #[tokio::test]
    async fn connect_rejects_unknown_address() {
        let result = transport().connect("11:22:33:44:55:66").await;
        assert_matches!(result, Err(TransportError::UnknownPeripheral { .. }));
    }

    #[tokio::test]
    async fn connect_matches_address_case_insensitively() {
        let transport = transport();
        let link = transport
            .connect("aa:bb:cc:dd:ee:01")
            .await
            .expect("connect should succeed");
        assert_eq!("AA:BB:CC:DD:EE:01", link.address());
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn failing_reads_surface_transport_errors() {
        let fixture = "AA:01|HR|180D|-43".parse::<ScanFixture>().expect("fixture");
        let transport = FakeTransport::new(
            FakeTransportConfig::builder()
                .scan_fixture(fixture)
                .failing_reads(vec!["2A38".to_string()])
                .build(),
        );
        let link = transport.connect("AA:01").await.expect("connect");

        let result = link.read("00002a38-0000-1000-8000-00805f9b34fb").await;

        assert_matches!(result, Err(TransportError::Fake { .. }));
    }

    #[tokio::test]
    async fn notifier_only_delivers_to_active_registrations() {
        let transport = transport();
        let notifier = transport.notifier();
        let link = transport.connect("AA:BB:CC:DD:EE:01").await.expect("connect");
        let mut feed = link.notifications().await.expect("feed");

        assert!(!notifier.notify("2A37", &[0x06, 0x50]));
        link.subscribe(HEART_RATE_MEASUREMENT).await.expect("subscribe");
        assert!(notifier.notify("2A37", &[0x06, 0x50]));

        let notification = feed.next().await.expect("notification");
        assert_eq!(HEART_RATE_MEASUREMENT, notification.uuid());
        assert_eq!(&[0x06, 0x50], notification.value());
    }

    #[tokio::test]
    async fn dropped_link_reports_disconnected() {
        let transport = transport();
        let link = transport.connect("AA:BB:CC:DD:EE:01").await.expect("connect");

        transport.notifier().drop_link();

        assert!(!link.is_connected().await.expect("liveness"));
        assert_matches!(
            link.read("00002a38-0000-1000-8000-00805f9b34fb").await,
            Err(TransportError::LinkLost)
        );
    }
}
