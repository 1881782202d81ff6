use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::SessionError;
use crate::hw::CapabilitySet;

/// One characteristic as indexed for a live connection.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicDescriptor {
    uuid: String,
    service_uuid: String,
    description: String,
    capabilities: CapabilitySet,
}

impl CharacteristicDescriptor {
    pub(crate) fn new(
        uuid: impl Into<String>,
        service_uuid: impl Into<String>,
        description: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            service_uuid: service_uuid.into(),
            description: description.into(),
            capabilities,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
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

/// The capability partitions of a [`CharacteristicIndex`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Partition {
    Read,
    Write,
    Notify,
}

impl Partition {
    fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Notify => "notify",
        }
    }
}

/// Characteristics of one connection partitioned by what they support.
///
/// A characteristic appears in every partition its capabilities allow.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct CharacteristicIndex {
    read: BTreeMap<String, CharacteristicDescriptor>,
    write: BTreeMap<String, CharacteristicDescriptor>,
    notify: BTreeMap<String, CharacteristicDescriptor>,
}

impl CharacteristicIndex {
    pub(crate) fn insert(&mut self, descriptor: CharacteristicDescriptor) {
        let capabilities = descriptor.capabilities();
        let uuid = descriptor.uuid().to_string();
        if capabilities.is_readable() {
            self.read.insert(uuid.clone(), descriptor.clone());
        }
        if capabilities.is_writable() {
            self.write.insert(uuid.clone(), descriptor.clone());
        }
        if capabilities.is_notifiable() {
            self.notify.insert(uuid, descriptor);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
        self.notify.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.notify.is_empty()
    }

    /// Returns the descriptors in one partition, ordered by UUID.
    #[must_use]
    pub fn partition(&self, partition: Partition) -> &BTreeMap<String, CharacteristicDescriptor> {
        match partition {
            Partition::Read => &self.read,
            Partition::Write => &self.write,
            Partition::Notify => &self.notify,
        }
    }

    /// Looks up a normalised UUID in one partition.
    #[must_use]
    pub fn get(&self, partition: Partition, uuid: &str) -> Option<&CharacteristicDescriptor> {
        self.partition(partition).get(uuid)
    }

    pub(crate) fn require(
        &self,
        partition: Partition,
        uuid: &str,
    ) -> Result<&CharacteristicDescriptor, SessionError> {
        self.get(partition, uuid)
            .ok_or_else(|| SessionError::CharacteristicNotFound {
                uuid: uuid.to_string(),
                capability: partition.label(),
            })
    }
}

/// Normalised UUIDs with an active notify or indicate registration.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct SubscriptionTable {
    active: BTreeSet<String>,
}

impl SubscriptionTable {
    /// Records a registration. Returns `false` if it was already active.
    pub(crate) fn insert(&mut self, uuid: &str) -> bool {
        self.active.insert(uuid.to_string())
    }

    pub(crate) fn remove(&mut self, uuid: &str) -> bool {
        self.active.remove(uuid)
    }

    pub(crate) fn contains(&self, uuid: &str) -> bool {
        self.active.contains(uuid)
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn clear(&mut self) {
        self.active.clear();
    }
}
