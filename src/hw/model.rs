use std::collections::BTreeMap;

use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// One advertisement observed during a scan.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct AdvertisementData {
    local_name: Option<String>,
    rssi: Option<i16>,
    tx_power: Option<i16>,
    service_uuids: Vec<String>,
    service_data: BTreeMap<String, Vec<u8>>,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    appearance: Option<u16>,
    flags: Option<u8>,
}

impl AdvertisementData {
    /// Creates an advertisement snapshot from its raw fields.
    #[must_use]
    pub fn new(local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            local_name,
            rssi,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tx_power(mut self, tx_power: Option<i16>) -> Self {
        self.tx_power = tx_power;
        self
    }

    #[must_use]
    pub fn with_service_uuids(mut self, service_uuids: Vec<String>) -> Self {
        self.service_uuids = service_uuids;
        self
    }

    #[must_use]
    pub fn with_service_data(mut self, service_data: BTreeMap<String, Vec<u8>>) -> Self {
        self.service_data = service_data;
        self
    }

    #[must_use]
    pub fn with_manufacturer_data(mut self, manufacturer_data: BTreeMap<u16, Vec<u8>>) -> Self {
        self.manufacturer_data = manufacturer_data;
        self
    }

    #[must_use]
    pub fn with_appearance(mut self, appearance: Option<u16>) -> Self {
        self.appearance = appearance;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: Option<u8>) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    #[must_use]
    pub fn tx_power(&self) -> Option<i16> {
        self.tx_power
    }

    /// Returns advertised service UUIDs in the order they were advertised.
    #[must_use]
    pub fn service_uuids(&self) -> &[String] {
        &self.service_uuids
    }

    #[must_use]
    pub fn service_data(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.service_data
    }

    #[must_use]
    pub fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    #[must_use]
    pub fn appearance(&self) -> Option<u16> {
        self.appearance
    }

    #[must_use]
    pub fn flags(&self) -> Option<u8> {
        self.flags
    }
}

/// A detection event delivered by an advertisement feed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Advertisement {
    address: String,
    name: Option<String>,
    data: AdvertisementData,
}

impl Advertisement {
    #[must_use]
    pub fn new(address: impl Into<String>, name: Option<String>, data: AdvertisementData) -> Self {
        Self {
            address: address.into(),
            name,
            data,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the device name reported alongside the advertisement.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &AdvertisementData {
        &self.data
    }

    pub(crate) fn into_device(self) -> DeviceHandle {
        DeviceHandle {
            address: self.address,
            name: self.name,
            advertisement: self.data,
        }
    }
}

/// A peripheral that matched a discovery filter.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceHandle {
    address: String,
    name: Option<String>,
    advertisement: AdvertisementData,
}

impl DeviceHandle {
    /// Returns the transport-assigned address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the advertised name, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the name for display, falling back to `Unknown`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or("Unknown")
    }

    /// Returns the advertisement that first matched for this address.
    #[must_use]
    pub fn advertisement(&self) -> &AdvertisementData {
        &self.advertisement
    }
}

/// A single GATT characteristic property relevant to exploration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Read,
    Write,
    WriteWithoutResponse,
    Notify,
    Indicate,
}

/// The fixed capability set of one characteristic.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[serde(into = "Vec<Capability>")]
pub struct CapabilitySet {
    bits: u8,
}

impl CapabilitySet {
    #[must_use]
    pub fn contains(self, capability: Capability) -> bool {
        self.bits & Self::bit(capability) != 0
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.bits |= Self::bit(capability);
        self
    }

    #[must_use]
    pub fn is_readable(self) -> bool {
        self.contains(Capability::Read)
    }

    #[must_use]
    pub fn is_writable(self) -> bool {
        self.contains(Capability::Write) || self.contains(Capability::WriteWithoutResponse)
    }

    #[must_use]
    pub fn is_notifiable(self) -> bool {
        self.contains(Capability::Notify) || self.contains(Capability::Indicate)
    }

    /// Returns the contained capabilities in declaration order.
    #[must_use]
    pub fn to_vec(self) -> Vec<Capability> {
        use strum::IntoEnumIterator;

        Capability::iter()
            .filter(|capability| self.contains(*capability))
            .collect()
    }

    /// Returns a comma-separated property list, or `none`.
    #[must_use]
    pub fn labels(self) -> String {
        let labels: Vec<String> = self.to_vec().iter().map(ToString::to_string).collect();
        if labels.is_empty() {
            "none".to_string()
        } else {
            labels.join(", ")
        }
    }

    fn bit(capability: Capability) -> u8 {
        match capability {
            Capability::Read => 1,
            Capability::Write => 1 << 1,
            Capability::WriteWithoutResponse => 1 << 2,
            Capability::Notify => 1 << 3,
            Capability::Indicate => 1 << 4,
        }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::default(), |set, capability| set.with(capability))
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.to_vec()
    }
}

/// A characteristic as listed by the transport.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    uuid: String,
    description: String,
    capabilities: CapabilitySet,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        description: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            description: description.into(),
            capabilities,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }
}

/// A GATT service with its characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: String,
    description: String,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        description: impl Into<String>,
        characteristics: Vec<CharacteristicInfo>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            description: description.into(),
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    pub(crate) fn into_parts(self) -> (String, String, Vec<CharacteristicInfo>) {
        (self.uuid, self.description, self.characteristics)
    }
}
