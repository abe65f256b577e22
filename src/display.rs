use std::fmt;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use prettytable::{format, row, Row, Table};

use crate::config::DiscoveryMode;
use crate::utils::format_time_as_elapsed;

pub struct WatcherRow {
    pub subnet: IpNetwork,
    pub discovery: DiscoveryMode,
    pub started: DateTime<Utc>,
}

impl WatcherRow {
    pub fn columns() -> Row {
        row!["Subnet", "Discovery", "Uptime"]
    }

    pub fn to_row(&self) -> Row {
        row![
            self.subnet.to_string(),
            self.discovery.to_string(),
            format_time_as_elapsed(self.started),
        ]
    }
}

pub struct WatcherTable {
    inner: Table,
}

impl WatcherTable {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.add_row(WatcherRow::columns());
        WatcherTable { inner: table }
    }

    pub fn add_row(&mut self, row: &WatcherRow) {
        self.inner.add_row(row.to_row());
    }

    /// Number of watchers, header excluded
    pub fn len(&self) -> usize {
        self.inner.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WatcherTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatcherTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}
