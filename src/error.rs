use derive_more::Display;
use thiserror::Error;

use crate::session::Severity;

/// Broad failure classes reported by the session controller.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ErrorKind {
    #[display("configuration")]
    Configuration,
    #[display("not_found")]
    NotFound,
    #[display("transport")]
    Transport,
    #[display("already_active")]
    AlreadyActive,
    #[display("cancelled")]
    Cancelled,
}

/// Operations that can fail against the adapter or a live link.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum Operation {
    #[display("scan")]
    Scan,
    #[display("connect")]
    Connect,
    #[display("enumerate")]
    Enumerate,
    #[display("disconnect")]
    Disconnect,
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display("subscribe")]
    Subscribe,
    #[display("unsubscribe")]
    Unsubscribe,
}

/// Resources of which only one may be active at a time.
#[derive(Debug, Clone, Eq, PartialEq, Display)]
pub enum ActiveResource {
    #[display("a scan is already running")]
    Scan,
    #[display("a connection is already live")]
    Connection,
    #[display("notifications are already enabled for {_0}")]
    Subscription(String),
}

/// Errors surfaced by the session controller to its caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("characteristic {uuid} does not support {capability} or was not found")]
    CharacteristicNotFound {
        uuid: String,
        capability: &'static str,
    },
    #[error("not connected to a device")]
    NotConnected,
    #[error("no device at position {index} in the discovered device list")]
    NoSuchDevice { index: usize },
    #[error("no active notifications for {uuid}")]
    NotSubscribed { uuid: String },
    #[error("{operation} failed{}", uuid_suffix(.uuid))]
    Transport {
        operation: Operation,
        uuid: Option<String>,
        #[source]
        source: TransportError,
    },
    #[error("{0}")]
    AlreadyActive(ActiveResource),
    #[error("the session was closed before the request completed")]
    SessionClosed,
}

impl SessionError {
    pub(crate) fn transport(operation: Operation, source: TransportError) -> Self {
        Self::Transport {
            operation,
            uuid: None,
            source,
        }
    }

    pub(crate) fn transport_for(
        operation: Operation,
        uuid: impl Into<String>,
        source: TransportError,
    ) -> Self {
        Self::Transport {
            operation,
            uuid: Some(uuid.into()),
            source,
        }
    }

    /// Returns the broad class of this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::CharacteristicNotFound { .. }
            | Self::NotConnected
            | Self::NoSuchDevice { .. }
            | Self::NotSubscribed { .. } => ErrorKind::NotFound,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::AlreadyActive(_) => ErrorKind::AlreadyActive,
            Self::SessionClosed => ErrorKind::Cancelled,
        }
    }

    /// Returns how loudly this failure should be surfaced.
    ///
    /// Duplicate activations and unsubscribing an inactive characteristic are
    /// notices rather than failures.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::AlreadyActive(_) | Self::NotSubscribed { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Returns whether the underlying transport reported the link as gone.
    pub(crate) fn is_link_lost(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                source: TransportError::LinkLost,
                ..
            }
        )
    }
}

fn uuid_suffix(uuid: &Option<String>) -> String {
    uuid.as_deref()
        .map(|uuid| format!(" for {uuid}"))
        .unwrap_or_default()
}

/// Invalid caller input, rejected before any I/O starts.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ConfigurationError {
    #[error("invalid hex UUID `{value}`")]
    InvalidUuidHex { value: String },
    #[error("UUID must be 4 hex digits (16-bit) or 32 hex digits (128-bit), got {length}")]
    InvalidUuidLength { length: usize },
    #[error("please enter a characteristic UUID")]
    EmptyUuid,
    #[error("scan duration must be a positive number of seconds, got `{value}`")]
    InvalidScanDuration { value: String },
    #[error("please enter a value to write")]
    EmptyPayload,
    #[error("hex string must have an even number of characters")]
    OddHexLength,
    #[error("invalid hex string `{value}`")]
    InvalidHex { value: String },
    #[error("invalid decimal value `{token}`")]
    InvalidDecimal { token: String },
    #[error("decimal values must be between 0 and 255, got {value}")]
    DecimalOutOfRange { value: i64 },
    #[error("unknown write encoding `{value}`")]
    UnknownEncoding { value: String },
}

/// Adapter and link level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no peripheral with address `{address}` is known to the adapter")]
    UnknownPeripheral { address: String },
    #[error("characteristic {uuid} is not present on the connected device")]
    UnknownCharacteristic { uuid: String },
    #[error("the connection to the peripheral was lost")]
    LinkLost,
    #[error("the operation did not finish within the disconnect grace period")]
    GracePeriodElapsed,
    #[error("fake transport failure: {reason}")]
    Fake { reason: String },
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain an empty address")]
    EmptyAddress,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("notification fixtures must use the form `uuid=hex`")]
    InvalidNotificationRecord,
    #[error("fixture payload is not valid hex")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SessionError::NotConnected, ErrorKind::NotFound, Severity::Error)]
    #[case(
        SessionError::NotSubscribed { uuid: "0000180d-0000-1000-8000-00805f9b34fb".into() },
        ErrorKind::NotFound,
        Severity::Warning
    )]
    #[case(
        SessionError::AlreadyActive(ActiveResource::Scan),
        ErrorKind::AlreadyActive,
        Severity::Warning
    )]
    #[case(
        SessionError::Configuration(ConfigurationError::OddHexLength),
        ErrorKind::Configuration,
        Severity::Error
    )]
    #[case(SessionError::SessionClosed, ErrorKind::Cancelled, Severity::Error)]
    fn errors_map_to_kind_and_severity(
        #[case] error: SessionError,
        #[case] expected_kind: ErrorKind,
        #[case] expected_severity: Severity,
    ) {
        assert_eq!(expected_kind, error.kind());
        assert_eq!(expected_severity, error.severity());
    }

    #[test]
    fn transport_error_message_names_operation_and_uuid() {
        let error = SessionError::transport_for(
            Operation::Read,
            "00002a38-0000-1000-8000-00805f9b34fb",
            TransportError::LinkLost,
        );
        assert_eq!(
            "read failed for 00002a38-0000-1000-8000-00805f9b34fb",
            error.to_string()
        );
        assert!(error.is_link_lost());
    }
}
