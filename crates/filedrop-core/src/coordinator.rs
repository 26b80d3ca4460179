//! Bridge from "file stored and registered PENDING" to the worker pool.
//!
//! Every job gets its own cancellation token, created here rather than
//! inherited from whatever request triggered the upload. A client that
//! disconnects after registration therefore cannot stop hashing of a file
//! other readers may already be polling.

use std::path::PathBuf;
use std::sync::Arc;

use filedrop_config::log_coord_debug;

use crate::cancel::CancelToken;
use crate::job::{Job, StatusReporter};
use crate::pool::{SubmitError, WorkerPool};

/// Submits hashing jobs on behalf of the ingestion path
#[derive(Clone)]
pub struct IngestCoordinator {
    pool: Arc<WorkerPool>,
}

impl IngestCoordinator {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Build a job for `file_id` and hand it to the pool.
    ///
    /// Blocks while the pool has no capacity. The returned token is the only
    /// handle to the job; dropping it leaves the job running.
    pub fn submit_job(
        &self,
        file_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<CancelToken, SubmitError> {
        let cancel = CancelToken::new();
        let job = Job::new(file_id, file_path, reporter).with_cancel(cancel.clone());

        log_coord_debug!(
            "submitting job",
            file_id = job.file_id(),
            path = tracing::field::display(job.file_path().display()),
        );

        self.pool.submit(job)?;
        Ok(cancel)
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}
