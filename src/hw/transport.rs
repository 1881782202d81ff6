use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use super::model::{Advertisement, ServiceInfo};
use crate::error::TransportError;

/// Stream of detection events produced while an adapter scan is running.
pub type AdvertisementFeed = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;

/// Stream of value pushes from subscribed characteristics on one link.
pub type NotificationFeed = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// A notification or indication received from a peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notification {
    uuid: String,
    value: Vec<u8>,
}

impl Notification {
    #[must_use]
    pub fn new(uuid: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            uuid: uuid.into(),
            value,
        }
    }

    /// Returns the source characteristic UUID as reported by the transport.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// How a write is acknowledged at the ATT layer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// A BLE adapter able to scan for and connect to peripherals.
#[async_trait]
pub trait BleTransport: Debug + Send + Sync {
    /// Starts an adapter scan and returns its detection feed.
    async fn start_scan(&self) -> Result<AdvertisementFeed, TransportError>;

    /// Stops a running adapter scan. Stopping an idle adapter succeeds.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Connects to the peripheral with the given address.
    async fn connect(&self, address: &str) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// A live connection to one peripheral.
///
/// Characteristic UUIDs passed in are normalised, dashed and lowercase.
#[async_trait]
pub trait TransportLink: Debug + Send + Sync {
    fn address(&self) -> &str;

    async fn is_connected(&self) -> Result<bool, TransportError>;

    /// Lists every service with its characteristics.
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    async fn read(&self, uuid: &str) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, uuid: &str, payload: &[u8], kind: WriteKind)
    -> Result<(), TransportError>;

    async fn subscribe(&self, uuid: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, uuid: &str) -> Result<(), TransportError>;

    /// Opens the notification stream shared by every subscription on this link.
    async fn notifications(&self) -> Result<NotificationFeed, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
