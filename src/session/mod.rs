mod connection;
mod discovery;
mod dispatcher;
mod filter;
mod index;
mod sink;

pub use self::connection::{ConnectionReport, ConnectionState, EagerRead};
pub use self::discovery::{
    DEFAULT_SCAN_DURATION, DiscoveryOutcome, DiscoveryResult, ScanRequest, parse_scan_duration,
};
pub use self::dispatcher::{
    ControllerConfig, DEFAULT_GRACE_PERIOD, DEFAULT_POLL_INTERVAL, Pending, SessionController,
    SessionState,
};
pub use self::filter::ScanFilter;
pub use self::index::{CharacteristicDescriptor, CharacteristicIndex, Partition};
pub use self::sink::{EventSink, SessionEvent, Severity, StatusMessage};
