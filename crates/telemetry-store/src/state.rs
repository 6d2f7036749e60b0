//! Shared telemetry state
//!
//! Every read and write of the current record goes through one mutex. The
//! lock is held across the durable write so the file reflects mutations in
//! lock order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::record::{PartialRecord, TelemetryRecord};
use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum StateError {
    /// The merge is visible in memory but the durable mirror was not updated.
    #[error("Record merged but not persisted: {source}")]
    NotPersisted {
        record: Box<TelemetryRecord>,
        #[source]
        source: StoreError,
    },

    #[error("Persistence task failed: {message}")]
    Join { message: String },
}

impl StateError {
    /// The in-memory record after the merge, when the failure was durability only.
    pub fn merged_record(&self) -> Option<&TelemetryRecord> {
        match self {
            StateError::NotPersisted { record, .. } => Some(record),
            StateError::Join { .. } => None,
        }
    }
}

/// Single source of truth for the current telemetry record
#[derive(Debug)]
pub struct TelemetryState {
    record: Arc<Mutex<TelemetryRecord>>,
    store: Arc<RecordStore>,
}

impl TelemetryState {
    /// Load the mirror into memory. A mirror that cannot be read is logged and
    /// replaced by the default record in memory; the next merge overwrites it.
    pub fn open(store: RecordStore) -> Self {
        let record = match store.load() {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Failed to load telemetry record, starting from defaults"
                );
                TelemetryRecord::default()
            }
        };

        Self {
            record: Arc::new(Mutex::new(record)),
            store: Arc::new(store),
        }
    }

    /// Merge `partial` stamped with the current time.
    pub async fn merge(&self, partial: &PartialRecord) -> Result<TelemetryRecord, StateError> {
        self.merge_at(partial, Utc::now()).await
    }

    /// Merge `partial` stamped with `at`, then persist the result.
    ///
    /// The guard moves into the blocking write, so the lock is released only
    /// once the file is replaced, even if this future is dropped mid-write.
    pub async fn merge_at(
        &self,
        partial: &PartialRecord,
        at: DateTime<Utc>,
    ) -> Result<TelemetryRecord, StateError> {
        let mut guard = Arc::clone(&self.record).lock_owned().await;
        guard.apply(partial);
        guard.stamp(at);
        let merged = guard.clone();

        let store = Arc::clone(&self.store);
        let persisted = tokio::task::spawn_blocking(move || {
            let result = store.replace(&guard);
            drop(guard);
            result
        })
        .await;

        match persisted {
            Ok(Ok(())) => {
                debug!(fields = partial.len(), "Telemetry record merged");
                Ok(merged)
            }
            Ok(Err(source)) => {
                error!(
                    path = %self.store.path().display(),
                    error = %source,
                    "Telemetry record merged in memory but not persisted"
                );
                Err(StateError::NotPersisted {
                    record: Box::new(merged),
                    source,
                })
            }
            Err(e) => {
                error!(error = %e, "Persistence task failed");
                Err(StateError::Join {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Copy of the current record.
    pub async fn snapshot(&self) -> TelemetryRecord {
        self.record.lock().await.clone()
    }
}
