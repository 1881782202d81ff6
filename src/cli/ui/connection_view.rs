use std::fmt::{self, Display, Formatter};

use crate::session::{ConnectionReport, Partition};
use crate::utils::format_hex;

use super::painter::Painter;
use super::table::Table;

/// Renders the enumerated GATT layout of a fresh connection.
pub(crate) struct ConnectionReportView<'a> {
    report: &'a ConnectionReport,
    painter: &'a Painter,
}

impl<'a> ConnectionReportView<'a> {
    pub(crate) fn new(report: &'a ConnectionReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }

    fn eager_value(&self, uuid: &str) -> String {
        self.report
            .eager_reads()
            .iter()
            .find(|read| read.uuid() == uuid)
            .map_or_else(String::new, |read| match read.value() {
                Ok(value) => format_hex(value),
                Err(reason) => self.painter.warning(format!("read failed: {reason}")),
            })
    }
}

impl Display for ConnectionReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let device = self.report.device();
        writeln!(
            f,
            "{} {} ({})",
            self.painter.heading("Connected to"),
            self.painter.value(device.display_name()),
            device.address()
        )?;

        let rows = self
            .report
            .services()
            .iter()
            .flat_map(|service| {
                service.characteristics().iter().map(move |characteristic| {
                    (service, characteristic)
                })
            })
            .map(|(service, characteristic)| {
                vec![
                    service.description().to_string(),
                    characteristic.uuid().to_string(),
                    characteristic.description().to_string(),
                    characteristic.capabilities().labels(),
                    self.eager_value(characteristic.uuid()),
                ]
            })
            .collect();
        writeln!(
            f,
            "{}",
            Table::grid(
                ["service", "characteristic", "description", "properties", "value"],
                rows
            )
        )?;

        let index = self.report.index();
        write!(
            f,
            "{}",
            self.painter.muted(format!(
                "Readable: {}, Writable: {}, Notifiable: {}",
                index.partition(Partition::Read).len(),
                index.partition(Partition::Write).len(),
                index.partition(Partition::Notify).len(),
            ))
        )
    }
}
