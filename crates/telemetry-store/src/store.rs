//! Durable JSON mirror of the telemetry record
//!
//! The file is always replaced through a temp file in the same directory and
//! an atomic rename, so a concurrent `load` sees either the old or the new
//! record and never a torn one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::record::TelemetryRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed record store
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record, creating it with defaults if absent.
    pub fn load(&self) -> Result<TelemetryRecord, StoreError> {
        if !self.path.exists() {
            info!(
                path = %self.path.display(),
                "Record file not found, initializing with defaults"
            );
            let record = TelemetryRecord::default();
            self.replace(&record)?;
            return Ok(record);
        }

        let content = fs::read(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_slice(&content).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically overwrite the persisted record.
    pub fn replace(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        let parent_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent_dir).map_err(|source| self.io_error(source))?;

        let json = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(|source| self.io_error(source))?;
        temp_file
            .write_all(&json)
            .map_err(|source| self.io_error(source))?;
        temp_file.flush().map_err(|source| self.io_error(source))?;

        temp_file
            .persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        debug!(path = %self.path.display(), "Record persisted");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
