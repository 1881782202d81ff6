use std::fmt::{self, Display, Formatter};

use crate::hw::{AdvertisementData, DeviceHandle};
use crate::session::DiscoveryResult;
use crate::utils::{format_hex, format_rssi};

use super::painter::Painter;
use super::table::Table;

/// Renders discovered devices as a numbered table.
pub(crate) struct DeviceListView<'a> {
    result: &'a DiscoveryResult,
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(result: &'a DiscoveryResult, painter: &'a Painter) -> Self {
        Self { result, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.result.is_empty() {
            return write!(f, "{}", self.painter.warning("No devices discovered."));
        }

        let rows = self
            .result
            .devices()
            .iter()
            .enumerate()
            .map(|(index, device)| {
                vec![
                    (index + 1).to_string(),
                    self.painter.value(device.display_name()),
                    device.address().to_string(),
                    format_rssi(device.advertisement().rssi()),
                    device.advertisement().service_uuids().join(", "),
                ]
            })
            .collect();
        let table = Table::grid(["#", "name", "address", "rssi", "services"], rows);
        write!(f, "{table}")
    }
}

/// Renders everything known from the advertisement a device was found with.
pub(crate) struct AdvertisementView<'a> {
    device: &'a DeviceHandle,
    advertisement: &'a AdvertisementData,
    painter: &'a Painter,
}

impl<'a> AdvertisementView<'a> {
    pub(crate) fn new(
        device: &'a DeviceHandle,
        advertisement: &'a AdvertisementData,
        painter: &'a Painter,
    ) -> Self {
        Self {
            device,
            advertisement,
            painter,
        }
    }
}

impl Display for AdvertisementView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let ad = self.advertisement;
        let painter = self.painter;
        let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

        let mut rows = vec![
            ("address", painter.value(self.device.address())),
            ("name", painter.value(self.device.display_name())),
            ("rssi", format_rssi(ad.rssi())),
            ("tx power", optional(ad.tx_power().map(|power| format!("{power} dBm")))),
            ("appearance", optional(ad.appearance().map(|value| format!("0x{value:04x}")))),
            ("flags", optional(ad.flags().map(|flags| format!("0x{flags:02x}")))),
        ];
        if ad.service_uuids().is_empty() {
            rows.push(("service", "-".to_string()));
        }
        for uuid in ad.service_uuids() {
            rows.push(("service", uuid.clone()));
        }
        for (uuid, data) in ad.service_data() {
            rows.push(("service data", format!("{uuid}: {}", format_hex(data))));
        }
        for (company, data) in ad.manufacturer_data() {
            rows.push((
                "manufacturer",
                format!("0x{company:04x}: {}", format_hex(data)),
            ));
        }

        write!(f, "{}", Table::key_value(painter, rows))
    }
}
