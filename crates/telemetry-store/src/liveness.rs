//! Connected/disconnected status derived from record age

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::TelemetryRecord;

/// Maximum record age for the device to count as connected.
pub const DEFAULT_CONNECTED_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn evaluate(record: &TelemetryRecord, now: DateTime<Utc>, threshold: Duration) -> Self {
        if connected_within(record, now, threshold) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `true` if the record was updated less than [`DEFAULT_CONNECTED_THRESHOLD`] ago.
pub fn connected(record: &TelemetryRecord, now: DateTime<Utc>) -> bool {
    connected_within(record, now, DEFAULT_CONNECTED_THRESHOLD)
}

/// A record that was never updated is disconnected.
pub fn connected_within(record: &TelemetryRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(last_update) = record.last_update_time() else {
        return false;
    };
    let Ok(threshold) = chrono::Duration::from_std(threshold) else {
        return true;
    };
    now.signed_duration_since(last_update) < threshold
}
