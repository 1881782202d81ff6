use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::assigned_numbers::{characteristic_name, service_name};
use super::model::{
    Advertisement, AdvertisementData, Capability, CapabilitySet, CharacteristicInfo, ServiceInfo,
};
use super::transport::{
    AdvertisementFeed, BleTransport, Notification, NotificationFeed, TransportLink, WriteKind,
};
use crate::error::TransportError;

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Adapter transport backed by `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugTransport {
    manager: Manager,
    scan: Mutex<Option<ActiveScan>>,
}

#[derive(Debug)]
struct ActiveScan {
    adapters: Vec<Adapter>,
    cancel: CancellationToken,
}

impl BtleplugTransport {
    /// Creates the real BLE transport.
    pub(crate) async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        Ok(Self {
            manager,
            scan: Mutex::new(None),
        })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, TransportError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapters);
        }
        Ok(adapters)
    }

    fn take_active_scan(&self) -> Option<ActiveScan> {
        self.scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<AdvertisementFeed, TransportError> {
        if let Some(previous) = self.take_active_scan() {
            stop_adapters(previous).await;
        }

        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        for adapter in &adapters {
            let events = adapter.events().await?;
            adapter.start_scan(ScanFilter::default()).await?;
            tokio::spawn(pump_advertisements(
                adapter.clone(),
                events,
                sender.clone(),
                cancel.clone(),
            ));
        }

        *self.scan.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ActiveScan { adapters, cancel });
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(active) = self.take_active_scan() {
            stop_adapters(active).await;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, address: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        let adapters = self.adapters().await?;
        for adapter in &adapters {
            for peripheral in adapter.peripherals().await? {
                if !peripheral.id().to_string().eq_ignore_ascii_case(address) {
                    continue;
                }

                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                if let Err(error) = peripheral.discover_services().await {
                    if let Err(disconnect_error) = peripheral.disconnect().await {
                        debug!(
                            ?disconnect_error,
                            "failed to disconnect after service discovery error"
                        );
                    }
                    return Err(error.into());
                }

                info!(address, "connected to peripheral");
                let characteristics = characteristics_by_uuid(&peripheral);
                return Ok(Box::new(BtleplugLink {
                    address: address.to_string(),
                    peripheral,
                    characteristics,
                }));
            }
        }

        Err(TransportError::UnknownPeripheral {
            address: address.to_string(),
        })
    }
}

async fn stop_adapters(active: ActiveScan) {
    active.cancel.cancel();
    for adapter in &active.adapters {
        if let Err(error) = adapter.stop_scan().await {
            debug!(?error, "failed to stop adapter scan cleanly");
        }
    }
}

async fn pump_advertisements(
    adapter: Adapter,
    mut events: CentralEvents,
    sender: mpsc::UnboundedSender<Advertisement>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(id) = advertised_peripheral(&event) else {
            continue;
        };

        let peripheral = match adapter.peripheral(id).await {
            Ok(peripheral) => peripheral,
            Err(error) => {
                trace!(?error, "advertising peripheral vanished before lookup");
                continue;
            }
        };
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => continue,
            Err(error) => {
                trace!(?error, "failed to read advertisement properties");
                continue;
            }
        };

        if sender
            .send(advertisement_from_properties(id.to_string(), properties))
            .is_err()
        {
            break;
        }
    }
}

fn advertised_peripheral(event: &CentralEvent) -> Option<&PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

fn advertisement_from_properties(address: String, properties: PeripheralProperties) -> Advertisement {
    let service_uuids = properties
        .services
        .iter()
        .map(|uuid| uuid.to_string().to_lowercase())
        .collect();
    let service_data: BTreeMap<String, Vec<u8>> = properties
        .service_data
        .into_iter()
        .map(|(uuid, payload)| (uuid.to_string().to_lowercase(), payload))
        .collect();
    let manufacturer_data: BTreeMap<u16, Vec<u8>> =
        properties.manufacturer_data.into_iter().collect();

    let data = AdvertisementData::new(properties.local_name.clone(), properties.rssi)
        .with_tx_power(properties.tx_power_level)
        .with_service_uuids(service_uuids)
        .with_service_data(service_data)
        .with_manufacturer_data(manufacturer_data);
    Advertisement::new(address, properties.local_name, data)
}

fn capabilities_from_flags(flags: CharPropFlags) -> CapabilitySet {
    [
        (CharPropFlags::READ, Capability::Read),
        (CharPropFlags::WRITE, Capability::Write),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            Capability::WriteWithoutResponse,
        ),
        (CharPropFlags::NOTIFY, Capability::Notify),
        (CharPropFlags::INDICATE, Capability::Indicate),
    ]
    .into_iter()
    .filter(|(flag, _capability)| flags.contains(*flag))
    .map(|(_flag, capability)| capability)
    .collect()
}

fn write_type_for(kind: WriteKind) -> WriteType {
    match kind {
        WriteKind::WithResponse => WriteType::WithResponse,
        WriteKind::WithoutResponse => WriteType::WithoutResponse,
    }
}

fn characteristics_by_uuid(peripheral: &Peripheral) -> HashMap<String, Characteristic> {
    let mut characteristics = HashMap::new();
    for service in peripheral.services() {
        for characteristic in &service.characteristics {
            characteristics
                .entry(characteristic.uuid.to_string().to_lowercase())
                .or_insert_with(|| characteristic.clone());
        }
    }
    characteristics
}

/// Live link to a `btleplug` peripheral.
#[derive(Debug)]
struct BtleplugLink {
    address: String,
    peripheral: Peripheral,
    characteristics: HashMap<String, Characteristic>,
}

impl BtleplugLink {
    fn characteristic_for(&self, uuid: &str) -> Result<&Characteristic, TransportError> {
        self.characteristics
            .get(uuid)
            .ok_or_else(|| TransportError::UnknownCharacteristic {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl TransportLink for BtleplugLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.peripheral.is_connected().await?)
    }

    #[instrument(skip(self), level = "debug", fields(address = %self.address))]
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        let services = self
            .peripheral
            .services()
            .into_iter()
            .map(|service| {
                let service_uuid = service.uuid.to_string().to_lowercase();
                let characteristics = service
                    .characteristics
                    .iter()
                    .map(|characteristic| {
                        let uuid = characteristic.uuid.to_string().to_lowercase();
                        let description = characteristic_name(&uuid);
                        CharacteristicInfo::new(
                            uuid,
                            description,
                            capabilities_from_flags(characteristic.properties),
                        )
                    })
                    .collect();
                let description = service_name(&service_uuid);
                ServiceInfo::new(service_uuid, description, characteristics)
            })
            .collect();
        Ok(services)
    }

    #[instrument(skip(self), level = "trace")]
    async fn read(&self, uuid: &str) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic_for(uuid)?;
        Ok(self.peripheral.read(characteristic).await?)
    }

    #[instrument(skip(self, payload), level = "trace", fields(?kind, payload_len = payload.len()))]
    async fn write(
        &self,
        uuid: &str,
        payload: &[u8],
        kind: WriteKind,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(uuid)?;
        self.peripheral
            .write(characteristic, payload, write_type_for(kind))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn subscribe(&self, uuid: &str) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(uuid)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn unsubscribe(&self, uuid: &str) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(uuid)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationFeed, TransportError> {
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.map(|notification| {
            Notification::new(
                notification.uuid.to_string().to_lowercase(),
                notification.value,
            )
        })))
    }

    #[instrument(skip(self), level = "debug", fields(address = %self.address))]
    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use btleplug::api::bleuuid::uuid_from_u16;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::READ, vec![Capability::Read])]
    #[case(
        CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
        vec![Capability::Write, Capability::WriteWithoutResponse]
    )]
    #[case(
        CharPropFlags::READ | CharPropFlags::NOTIFY | CharPropFlags::BROADCAST,
        vec![Capability::Read, Capability::Notify]
    )]
    #[case(CharPropFlags::INDICATE, vec![Capability::Indicate])]
    #[case(CharPropFlags::BROADCAST, vec![])]
    fn capabilities_from_flags_keeps_exploration_properties(
        #[case] flags: CharPropFlags,
        #[case] expected: Vec<Capability>,
    ) {
        assert_eq!(expected, capabilities_from_flags(flags).to_vec());
    }

    #[test]
    fn advertisement_from_properties_preserves_raw_fields() {
        let mut properties = PeripheralProperties {
            local_name: Some("Polar H10".to_string()),
            rssi: Some(-61),
            tx_power_level: Some(4),
            ..PeripheralProperties::default()
        };
        properties
            .manufacturer_data
            .insert(0x006B, vec![0x01, 0x02]);
        properties
            .service_data
            .insert(uuid_from_u16(0xFEEE), vec![0xAA]);
        properties.services = vec![uuid_from_u16(0x180D), uuid_from_u16(0x180F)];

        let advertisement =
            advertisement_from_properties("AA:BB:CC:DD:EE:FF".to_string(), properties);

        assert_eq!("AA:BB:CC:DD:EE:FF", advertisement.address());
        assert_eq!(Some("Polar H10"), advertisement.name());
        let data = advertisement.data();
        assert_eq!(Some(-61), data.rssi());
        assert_eq!(Some(4), data.tx_power());
        assert_eq!(
            vec![
                "0000180d-0000-1000-8000-00805f9b34fb".to_string(),
                "0000180f-0000-1000-8000-00805f9b34fb".to_string(),
            ],
            data.service_uuids().to_vec()
        );
        assert_eq!(
            Some(&vec![0xAA]),
            data.service_data().get("0000feee-0000-1000-8000-00805f9b34fb")
        );
        assert_eq!(Some(&vec![0x01, 0x02]), data.manufacturer_data().get(&0x006B));
    }

    #[rstest]
    #[case(WriteKind::WithResponse, WriteType::WithResponse)]
    #[case(WriteKind::WithoutResponse, WriteType::WithoutResponse)]
    fn write_kind_maps_to_btleplug_write_type(
        #[case] kind: WriteKind,
        #[case] expected: WriteType,
    ) {
        assert_eq!(expected, write_type_for(kind));
    }
}
