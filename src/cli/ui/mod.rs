mod connection_view;
mod device_view;
mod event_view;
mod painter;
mod spinner;
mod table;

pub(crate) use self::connection_view::ConnectionReportView;
pub(crate) use self::device_view::{AdvertisementView, DeviceListView};
pub(crate) use self::event_view::SessionEventView;
pub(crate) use self::painter::Painter;
pub(crate) use self::spinner::Spinner;
