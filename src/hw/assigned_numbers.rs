use crate::gatt_uuid::short_uuid;

const UNKNOWN: &str = "Unknown";

const SERVICE_NAMES: &[(u16, &str)] = &[
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1805, "Current Time Service"),
    (0x180A, "Device Information"),
    (0x180D, "Heart Rate"),
    (0x180F, "Battery Service"),
    (0x1810, "Blood Pressure"),
    (0x1812, "Human Interface Device"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x181A, "Environmental Sensing"),
    (0x181C, "User Data"),
    (0xFE59, "Nordic DFU"),
];

const CHARACTERISTIC_NAMES: &[(u16, &str)] = &[
    (0x2A00, "Device Name"),
    (0x2A01, "Appearance"),
    (0x2A04, "Peripheral Preferred Connection Parameters"),
    (0x2A05, "Service Changed"),
    (0x2A06, "Alert Level"),
    (0x2A07, "Tx Power Level"),
    (0x2A19, "Battery Level"),
    (0x2A23, "System ID"),
    (0x2A24, "Model Number String"),
    (0x2A25, "Serial Number String"),
    (0x2A26, "Firmware Revision String"),
    (0x2A27, "Hardware Revision String"),
    (0x2A28, "Software Revision String"),
    (0x2A29, "Manufacturer Name String"),
    (0x2A2B, "Current Time"),
    (0x2A35, "Blood Pressure Measurement"),
    (0x2A37, "Heart Rate Measurement"),
    (0x2A38, "Body Sensor Location"),
    (0x2A39, "Heart Rate Control Point"),
    (0x2A4D, "Report"),
    (0x2A50, "PnP ID"),
    (0x2A5B, "CSC Measurement"),
    (0x2A6E, "Temperature"),
    (0x2A6F, "Humidity"),
];

/// Returns the SIG-assigned name of a service, or `Unknown`.
pub(crate) fn service_name(normalized_uuid: &str) -> &'static str {
    lookup(SERVICE_NAMES, normalized_uuid)
}

/// Returns the SIG-assigned name of a characteristic, or `Unknown`.
pub(crate) fn characteristic_name(normalized_uuid: &str) -> &'static str {
    lookup(CHARACTERISTIC_NAMES, normalized_uuid)
}

fn lookup(table: &[(u16, &'static str)], normalized_uuid: &str) -> &'static str {
    let Some(short) = short_uuid(normalized_uuid) else {
        return UNKNOWN;
    };
    table
        .iter()
        .find_map(|(number, name)| (*number == short).then_some(*name))
        .unwrap_or(UNKNOWN)
}
