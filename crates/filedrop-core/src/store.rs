//! Metadata store contract and an in-memory implementation.
//!
//! The store owns File Records. Only `update_status` may move a record out of
//! `PENDING`, and only once.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use filedrop_config::{log_store_debug, log_store_warn};
use serde::Serialize;
use thiserror::Error;

use crate::job::{FileStatus, ReportError, StatusReporter, TerminalStatus};

/// Store errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("file not found: {id}")]
    NotFound { id: String },

    #[error("file already registered: {id}")]
    AlreadyExists { id: String },

    #[error("file {id} already reached {status}")]
    AlreadyTerminal { id: String, status: FileStatus },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Registration payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    pub extension: String,
}

/// Metadata for one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    pub extension: String,
    /// Hex digest, empty until processing completes
    pub hash: String,
    pub status: FileStatus,
    pub registered_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    fn pending(file: NewFile) -> Self {
        Self {
            id: file.id,
            path: file.path,
            size: file.size,
            extension: file.extension,
            hash: String::new(),
            status: FileStatus::Pending,
            registered_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Durable metadata contract (narrow read/write surface)
pub trait MetadataStore: Send + Sync {
    /// Insert a new record in `PENDING`
    fn register_file(&self, file: NewFile) -> Result<(), StoreError>;

    /// Move a `PENDING` record to its terminal status
    fn update_status(&self, id: &str, hash: &str, status: TerminalStatus) -> Result<(), StoreError>;

    fn get_file(&self, id: &str) -> Result<FileRecord, StoreError>;
}

/// In-memory store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, FileRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, ordered by id
    pub fn records(&self) -> Vec<FileRecord> {
        let mut all: Vec<FileRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Ids still waiting for a terminal status
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.status == FileStatus::Pending)
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

impl MetadataStore for MemoryStore {
    fn register_file(&self, file: NewFile) -> Result<(), StoreError> {
        match self.records.entry(file.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { id: file.id }),
            Entry::Vacant(slot) => {
                log_store_debug!("file registered", file_id = file.id.as_str(), size = file.size);
                slot.insert(FileRecord::pending(file));
                Ok(())
            }
        }
    }

    fn update_status(
        &self,
        id: &str,
        hash: &str,
        status: TerminalStatus,
    ) -> Result<(), StoreError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        if record.status.is_terminal() {
            log_store_warn!(
                "rejected second status transition",
                file_id = id,
                current = record.status.as_str(),
                attempted = status.as_str(),
            );
            return Err(StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: record.status,
            });
        }

        record.hash = hash.to_string();
        record.status = status.into();
        record.finished_at = Some(Utc::now());
        log_store_debug!("status updated", file_id = id, status = status.as_str());
        Ok(())
    }

    fn get_file(&self, id: &str) -> Result<FileRecord, StoreError> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }
}

/// Adapts a [`MetadataStore`] into a [`StatusReporter`]
pub struct StoreReporter<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> StoreReporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: MetadataStore + ?Sized> StatusReporter for StoreReporter<S> {
    fn report_result(
        &self,
        file_id: &str,
        hash: &str,
        status: TerminalStatus,
    ) -> Result<(), ReportError> {
        self.store
            .update_status(file_id, hash, status)
            .map_err(|e| ReportError::new(file_id, e))
    }
}
