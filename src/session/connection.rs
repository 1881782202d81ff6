use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, instrument, trace, warn};

use super::index::{CharacteristicDescriptor, CharacteristicIndex, Partition, SubscriptionTable};
use super::sink::{EventSink, Severity};
use crate::error::{ActiveResource, Operation, SessionError};
use crate::gatt_uuid::normalize_uuid;
use crate::hw::{
    BleTransport, Capability, DeviceHandle, Notification, NotificationFeed, ServiceInfo,
    TransportLink, WriteKind,
};
use crate::utils::{
    describe_value, format_hex, notification_line, printable_text, timestamp_now,
};

/// Lifecycle of one peripheral connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Enumerating,
    Ready,
    Disconnecting,
}

/// Result of the eager read performed on a readable characteristic during
/// enumeration.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct EagerRead {
    uuid: String,
    value: Result<Vec<u8>, String>,
}

impl EagerRead {
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the value read, or the reason the read failed.
    #[must_use]
    pub fn value(&self) -> Result<&[u8], &str> {
        self.value.as_deref().map_err(String::as_str)
    }
}

/// Everything learned while bringing a connection to `Ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    device: DeviceHandle,
    services: Vec<ServiceInfo>,
    index: CharacteristicIndex,
    eager_reads: Vec<EagerRead>,
}

impl ConnectionReport {
    #[must_use]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Returns services sorted by UUID, each with characteristics sorted by
    /// UUID.
    #[must_use]
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    #[must_use]
    pub fn index(&self) -> &CharacteristicIndex {
        &self.index
    }

    #[must_use]
    pub fn eager_reads(&self) -> &[EagerRead] {
        &self.eager_reads
    }
}

/// Owns the live link to one peripheral together with its characteristic
/// index and subscription table.
#[derive(Debug)]
pub(crate) struct ConnectionSession {
    device: DeviceHandle,
    sink: EventSink,
    state: ConnectionState,
    link: Option<Box<dyn TransportLink>>,
    index: CharacteristicIndex,
    subscriptions: SubscriptionTable,
}

impl ConnectionSession {
    pub(crate) fn new(device: DeviceHandle, sink: EventSink) -> Self {
        Self {
            device,
            sink,
            state: ConnectionState::Disconnected,
            link: None,
            index: CharacteristicIndex::default(),
            subscriptions: SubscriptionTable::default(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Connects, enumerates, and indexes the peripheral.
    ///
    /// Any failure before `Ready` closes the link and leaves the session
    /// disconnected with an empty index.
    #[instrument(skip_all, level = "debug", fields(address = %self.device.address()))]
    pub(crate) async fn connect(
        &mut self,
        transport: &dyn BleTransport,
    ) -> Result<(ConnectionReport, NotificationFeed), SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyActive(ActiveResource::Connection));
        }

        self.state = ConnectionState::Connecting;
        self.sink.status(
            format!(
                "Connecting to {} ({})...",
                self.device.display_name(),
                self.device.address()
            ),
            Severity::Progress,
        );

        let link = match transport.connect(self.device.address()).await {
            Ok(link) => link,
            Err(error) => {
                self.reset();
                return Err(SessionError::transport(Operation::Connect, error));
            }
        };
        self.link = Some(link);
        self.state = ConnectionState::Enumerating;

        match self.enumerate().await {
            Ok(enumerated) => {
                self.state = ConnectionState::Ready;
                self.sink.status(
                    format!("Connected to {}", self.device.display_name()),
                    Severity::Info,
                );
                Ok(enumerated)
            }
            Err(error) => {
                self.close_link().await;
                self.reset();
                Err(error)
            }
        }
    }

    async fn enumerate(&mut self) -> Result<(ConnectionReport, NotificationFeed), SessionError> {
        let link = self.link()?;
        let mut services = link
            .list_services()
            .await
            .map_err(|error| SessionError::transport(Operation::Enumerate, error))?;
        let feed = link
            .notifications()
            .await
            .map_err(|error| SessionError::transport(Operation::Enumerate, error))?;

        services.sort_by(|left, right| left.uuid().cmp(right.uuid()));
        let mut sorted_services = Vec::with_capacity(services.len());
        let mut index = CharacteristicIndex::default();
        let mut eager_reads = Vec::new();

        self.sink.log(format!(
            "Connected to {} ({})",
            self.device.display_name(),
            self.device.address()
        ));
        for service in services {
            let (service_uuid, service_description, mut characteristics) = service.into_parts();
            characteristics.sort_by(|left, right| left.uuid().cmp(right.uuid()));

            self.sink.log(format!("Service: {service_uuid}"));
            self.sink.log(format!("  Description: {service_description}"));
            self.sink
                .log(format!("  Characteristics: {}", characteristics.len()));

            for characteristic in &characteristics {
                let uuid = normalize_uuid(characteristic.uuid());
                let capabilities = characteristic.capabilities();
                self.sink.log(format!("  Characteristic: {uuid}"));
                self.sink
                    .log(format!("    Description: {}", characteristic.description()));
                self.sink
                    .log(format!("    Properties: {}", capabilities.labels()));

                if capabilities.is_readable() {
                    let value = match link.read(&uuid).await {
                        Ok(value) => {
                            self.sink
                                .log(format!("    Value (hex): {}", format_hex(&value)));
                            if let Some(text) = printable_text(&value) {
                                self.sink.log(format!("    Value (string): {text}"));
                            }
                            Ok(value)
                        }
                        Err(error) => {
                            debug!(%uuid, ?error, "eager read failed");
                            self.sink.log(format!("    Read error: {error}"));
                            Err(error.to_string())
                        }
                    };
                    eager_reads.push(EagerRead {
                        uuid: uuid.clone(),
                        value,
                    });
                }

                index.insert(CharacteristicDescriptor::new(
                    uuid,
                    service_uuid.clone(),
                    characteristic.description(),
                    capabilities,
                ));
            }
            sorted_services.push(ServiceInfo::new(
                service_uuid,
                service_description,
                characteristics,
            ));
        }

        self.sink.log(format!(
            "Readable: {}, Writable: {}, Notifiable: {}",
            index.partition(Partition::Read).len(),
            index.partition(Partition::Write).len(),
            index.partition(Partition::Notify).len(),
        ));

        self.index = index.clone();
        self.subscriptions.clear();
        let report = ConnectionReport {
            device: self.device.clone(),
            services: sorted_services,
            index,
            eager_reads,
        };
        Ok((report, feed))
    }

    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn read(&self, uuid: &str) -> Result<Vec<u8>, SessionError> {
        let link = self.link()?;
        self.index.require(Partition::Read, uuid)?;
        let value = link
            .read(uuid)
            .await
            .map_err(|error| SessionError::transport_for(Operation::Read, uuid, error))?;

        self.sink.log(format!("Read {uuid}:"));
        for line in describe_value(&value) {
            self.sink.log(format!("  {line}"));
        }
        Ok(value)
    }

    #[instrument(skip(self, payload), level = "debug", fields(payload_len = payload.len()))]
    pub(crate) async fn write(&self, uuid: &str, payload: &[u8]) -> Result<(), SessionError> {
        let link = self.link()?;
        let descriptor = self.index.require(Partition::Write, uuid)?;
        let kind = if descriptor.capabilities().contains(Capability::Write) {
            WriteKind::WithResponse
        } else {
            WriteKind::WithoutResponse
        };
        link.write(uuid, payload, kind)
            .await
            .map_err(|error| SessionError::transport_for(Operation::Write, uuid, error))?;

        self.sink.log(format!(
            "Wrote {} byte(s) to {uuid}: {}",
            payload.len(),
            format_hex(payload)
        ));
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn subscribe(&mut self, uuid: &str) -> Result<(), SessionError> {
        let link = self.link()?;
        self.index.require(Partition::Notify, uuid)?;
        if self.subscriptions.contains(uuid) {
            return Err(SessionError::AlreadyActive(ActiveResource::Subscription(
                uuid.to_string(),
            )));
        }
        link.subscribe(uuid)
            .await
            .map_err(|error| SessionError::transport_for(Operation::Subscribe, uuid, error))?;

        self.subscriptions.insert(uuid);
        self.sink.log(format!("Notifications enabled for {uuid}"));
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn unsubscribe(&mut self, uuid: &str) -> Result<(), SessionError> {
        if !self.subscriptions.contains(uuid) {
            return Err(SessionError::NotSubscribed {
                uuid: uuid.to_string(),
            });
        }
        let link = self.link()?;
        link.unsubscribe(uuid)
            .await
            .map_err(|error| SessionError::transport_for(Operation::Unsubscribe, uuid, error))?;

        self.subscriptions.remove(uuid);
        self.sink.log(format!("Notifications disabled for {uuid}"));
        Ok(())
    }

    /// Logs a value pushed by the peripheral if its characteristic is
    /// subscribed.
    pub(crate) fn handle_notification(&self, notification: &Notification) {
        let uuid = normalize_uuid(notification.uuid());
        if !self.subscriptions.contains(&uuid) {
            trace!(%uuid, "dropping notification for inactive registration");
            return;
        }
        self.sink.log(notification_line(
            &timestamp_now(),
            &uuid,
            notification.value(),
        ));
    }

    /// Returns whether the transport still reports the link as up.
    pub(crate) async fn is_alive(&self) -> bool {
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        match link.is_connected().await {
            Ok(connected) => connected,
            Err(error) => {
                debug!(?error, "liveness check failed");
                false
            }
        }
    }

    /// Closes the link and clears all per-connection state. Idempotent.
    #[instrument(skip_all, level = "debug", fields(address = %self.device.address()))]
    pub(crate) async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnecting;
        self.sink.status("Disconnecting...", Severity::Progress);
        self.close_link().await;
        self.reset();
        self.sink.log(format!(
            "Disconnected from {} ({})",
            self.device.display_name(),
            self.device.address()
        ));
        self.sink.status("Disconnected", Severity::Info);
    }

    /// Cleans up after the transport reported the link gone.
    pub(crate) fn handle_link_lost(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        warn!(address = self.device.address(), "connection lost");
        self.link = None;
        self.reset();
        self.sink.log(format!(
            "Connection to {} ({}) lost",
            self.device.display_name(),
            self.device.address()
        ));
        self.sink.status("Connection lost", Severity::Error);
    }

    /// Drops the link without talking to the transport.
    pub(crate) fn abandon(&mut self) {
        self.link = None;
        self.reset();
    }

    fn link(&self) -> Result<&dyn TransportLink, SessionError> {
        self.link.as_deref().ok_or(SessionError::NotConnected)
    }

    async fn close_link(&mut self) {
        if let Some(link) = self.link.take()
            && let Err(error) = link.disconnect().await
        {
            warn!(?error, "failed to close link cleanly");
        }
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.index.clear();
        self.subscriptions.clear();
    }
}
