mod assigned_numbers;
mod btleplug_backend;
mod fake_backend;
mod model;
mod transport;

pub(crate) use self::btleplug_backend::BtleplugTransport;
pub use self::fake_backend::{
    FakeNotifier, FakeTransport, FakeTransportConfig, NotificationFixture, RecordedWrite,
    ScanFixture,
};
pub use self::model::{
    Advertisement, AdvertisementData, Capability, CapabilitySet, CharacteristicInfo,
    DeviceHandle, ServiceInfo,
};
pub use self::transport::{
    AdvertisementFeed, BleTransport, Notification, NotificationFeed, TransportLink, WriteKind,
};
