//! # filedrop-core
//!
//! Asynchronous ingestion pipeline for filedrop.
//!
//! Uploaded files are registered as `PENDING`, then a bounded pool of worker
//! threads computes each file's content digest off the request path and
//! reports `COMPLETED` or `FAILED` back to the metadata store.
//!
//! ```text
//! Ingestor ─→ IngestCoordinator ─→ WorkerPool ─→ ContentHasher
//!  (stage,      (job + token)      (N threads)        │
//!   register)                           └──→ StatusReporter ─→ MetadataStore
//! ```
//!
//! ## State machine (per file id)
//!
//! ```text
//! PENDING ──hash ok──→ COMPLETED
//! PENDING ──hash err─→ FAILED
//! PENDING ──cancelled / report lost / process exit──→ PENDING
//! ```
//!
//! Status delivery is at-most-once: a report the store rejects is logged and
//! dropped, and nothing re-queues stuck `PENDING` records.

pub mod cancel;
pub mod coordinator;
pub mod hasher;
pub mod job;
pub mod pool;
pub mod store;
pub mod upload;

pub use cancel::CancelToken;
pub use coordinator::IngestCoordinator;
pub use hasher::{ContentHasher, DigestAlgorithm, HashError, StreamHasher};
pub use job::{FileStatus, Job, ReportError, StatusReporter, TerminalStatus};
pub use pool::{PoolConfig, PoolError, PoolStatsSnapshot, SubmitError, WorkerPool};
pub use store::{FileRecord, MemoryStore, MetadataStore, NewFile, StoreError, StoreReporter};
pub use upload::{stage_upload, IngestReceipt, Ingestor, StagedFile, UploadError};
