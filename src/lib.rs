mod app;
mod cli;
mod error;
mod gatt_uuid;
mod hw;
mod payload;
mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    RunSettings, fake_transport, real_transport, run, run_with_clients, run_with_settings,
};
pub use cli::{Args, Command, ExploreArgs, FakeArgs, LogLevel, OutputFormat, ScanArgs};
pub use error::{
    ActiveResource, ConfigurationError, ErrorKind, FixtureError, Operation, SessionError,
    TransportError,
};
pub use gatt_uuid::{normalize_uuid, parse_service_filter};
pub use hw::{
    Advertisement, AdvertisementData, AdvertisementFeed, BleTransport, Capability, CapabilitySet,
    CharacteristicInfo, DeviceHandle, FakeNotifier, FakeTransport, FakeTransportConfig,
    Notification, NotificationFeed, NotificationFixture, RecordedWrite, ScanFixture, ServiceInfo,
    TransportLink, WriteKind,
};
pub use payload::{WriteEncoding, decode_payload};
pub use session::{
    CharacteristicDescriptor, CharacteristicIndex, ConnectionReport, ConnectionState,
    ControllerConfig, DEFAULT_GRACE_PERIOD, DEFAULT_POLL_INTERVAL, DEFAULT_SCAN_DURATION,
    DiscoveryOutcome, DiscoveryResult, EagerRead, EventSink, Partition, Pending, ScanFilter,
    ScanRequest, SessionController, SessionEvent, SessionState, Severity, StatusMessage,
    parse_scan_duration,
};
pub use terminal::TerminalClient;
