//! Telemetry store - current device telemetry record with durable mirror
//!
//! Ingestion and push updates both funnel into [`TelemetryState::merge`];
//! queries read [`TelemetryState::snapshot`]. The record is mirrored to a JSON
//! file that is replaced atomically on every merge.

pub mod liveness;
pub mod record;
pub mod state;
pub mod store;

pub use liveness::{connected, connected_within, ConnectionStatus, DEFAULT_CONNECTED_THRESHOLD};
pub use record::{PartialRecord, RecordError, TelemetryRecord, KNOWN_FIELDS, LAST_UPDATE_FIELD};
pub use state::{StateError, TelemetryState};
pub use store::{RecordStore, StoreError};
