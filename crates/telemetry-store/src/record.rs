//! Telemetry record model
//!
//! A record is a JSON object holding the latest value of every device
//! measurement. The five known fields are always present; anything else a
//! writer sends is carried along untouched.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Measurement fields every record carries, defaulting to zero.
pub const KNOWN_FIELDS: [&str; 5] = ["heart_rate", "spo2", "temperature", "latitude", "longitude"];

/// Internal field stamped by every merge, in Unix epoch seconds.
pub const LAST_UPDATE_FIELD: &str = "last_update_time";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("No data provided")]
    Empty,

    #[error("Malformed JSON: {message}")]
    Malformed { message: String },

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Field '{field}' must be numeric")]
    NonNumericField { field: String },
}

/// Full merged telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct TelemetryRecord {
    fields: Map<String, Value>,
}

impl Default for TelemetryRecord {
    fn default() -> Self {
        Self::from(Map::new())
    }
}

impl From<Map<String, Value>> for TelemetryRecord {
    fn from(mut fields: Map<String, Value>) -> Self {
        for field in KNOWN_FIELDS {
            let numeric = fields.get(field).map(Value::is_number).unwrap_or(false);
            if !numeric {
                fields.insert(field.to_string(), Value::from(0));
            }
        }
        Self { fields }
    }
}

impl From<TelemetryRecord> for Map<String, Value> {
    fn from(record: TelemetryRecord) -> Self {
        record.fields
    }
}

impl TelemetryRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Numeric value of a field, if present and numeric.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Time of the last merge, or `None` if no sample has ever arrived.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        let secs = self.number(LAST_UPDATE_FIELD)?;
        if !secs.is_finite() {
            return None;
        }
        Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single()
    }

    /// Field-wise overwrite. `last_update_time` is owned by [`stamp`](Self::stamp)
    /// and is skipped here.
    pub fn apply(&mut self, partial: &PartialRecord) {
        for (key, value) in partial.fields() {
            if key == LAST_UPDATE_FIELD {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Record a mutation at `at`. A stored time that is not in the future is
    /// never moved backwards; a future one (clock step-back, foreign mirror)
    /// is overwritten so liveness can go stale again.
    pub fn stamp(&mut self, at: DateTime<Utc>) {
        self.stamp_with_clock(at, Utc::now());
    }

    fn stamp_with_clock(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(current) = self.last_update_time() {
            if current >= at && current <= now {
                return;
            }
        }
        let secs = at.timestamp_millis() as f64 / 1000.0;
        self.fields.insert(LAST_UPDATE_FIELD.to_string(), Value::from(secs));
    }
}

/// Validated merge input: a non-empty field/value mapping whose known
/// fields are numeric.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRecord {
    fields: Map<String, Value>,
}

impl PartialRecord {
    /// Decode a raw payload. Blank input counts as empty, not malformed.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(RecordError::Empty);
        }
        let value: Value = serde_json::from_slice(bytes).map_err(|e| RecordError::Malformed {
            message: e.to_string(),
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<Map<String, Value>> for PartialRecord {
    type Error = RecordError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        if fields.is_empty() {
            return Err(RecordError::Empty);
        }
        for field in KNOWN_FIELDS {
            if let Some(value) = fields.get(field) {
                if !value.is_number() {
                    return Err(RecordError::NonNumericField {
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(Self { fields })
    }
}
