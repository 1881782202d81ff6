use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style as TableStyle};

use super::painter::Painter;

/// A structured table that renders via `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Creates a two-column field/value table with muted field names.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self::grid(["field", "value"], records)
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_renders_headers_before_rows() {
        let table = Table::grid(
            ["address", "rssi"],
            vec![
                vec!["AA:BB:CC:DD:EE:01".into(), "-61 dBm".into()],
                vec!["AA:BB:CC:DD:EE:02".into(), "-".into()],
            ],
        )
        .to_string();

        let header = table.find("address").expect("header rendered");
        let first = table.find("AA:BB:CC:DD:EE:01").expect("first row rendered");
        let second = table.find("AA:BB:CC:DD:EE:02").expect("second row rendered");
        assert!(header < first && first < second);
        assert!(table.starts_with('╭'));
    }

    #[test]
    fn key_value_rows_share_a_line() {
        let painter = Painter::new(false);
        let table = Table::key_value(&painter, vec![("rssi", "-61 dBm".into())]).to_string();

        let row = table
            .lines()
            .find(|line| line.contains("rssi"))
            .expect("field row rendered");
        assert!(row.contains("-61 dBm"));
    }
}
