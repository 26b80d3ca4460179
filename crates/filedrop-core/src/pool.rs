//! Bounded Hashing Worker Pool
//!
//! A fixed set of OS threads drains one shared job queue. Each worker hashes
//! the job's file and reports the outcome through the job's reporter.
//!
//! # Backpressure
//!
//! The queue is a crossbeam channel. With the default capacity of zero it is
//! a rendezvous channel: `submit` returns only once a worker has taken the
//! job, so a burst of uploads is throttled to the pool's absorption rate
//! instead of piling up hashing work.
//!
//! # Job lifecycle
//!
//! ```text
//! submit → queue → worker ─┬─ cancelled before start ──→ (no report)
//!                          ├─ hash ok ──────────────────→ report COMPLETED
//!                          ├─ hash error ───────────────→ report FAILED
//!                          └─ cancelled mid-hash ───────→ (no report)
//! ```
//!
//! Delivery failures are logged and counted, never retried. A panic in the
//! hasher or the reporter is caught at the job boundary: a hasher panic
//! reports FAILED, a reporter panic counts as an undelivered report, and the
//! worker moves on to the next job.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, SendError, Sender};
use filedrop_config::{log_worker_debug, log_worker_info, log_worker_warn};
use serde::Serialize;
use thiserror::Error;

use crate::hasher::{ContentHasher, HashError, StreamHasher};
use crate::job::{Job, TerminalStatus};

/// Upper bound for the CPU-derived default worker count
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// Default worker count: min(cpu_cores, MAX_DEFAULT_WORKERS)
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS)
}

/// Pool construction errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Submission errors
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("pool is shut down, job for {file_id} rejected")]
    ShutDown { file_id: String },

    #[error("no workers left to accept job for {file_id}")]
    Disconnected { file_id: String },
}

/// Pool configuration
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads (fixed for the pool's lifetime)
    pub workers: usize,
    /// Jobs that may wait in the queue (0 = rendezvous)
    pub queue_capacity: usize,
    /// Worker thread name prefix
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: 0,
            thread_name: "filedrop-hash".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

impl From<&filedrop_config::PoolSettings> for PoolConfig {
    fn from(settings: &filedrop_config::PoolSettings) -> Self {
        Self {
            workers: settings.workers,
            queue_capacity: settings.queue_capacity,
            ..Self::default()
        }
    }
}

/// Live counters, updated by workers
#[derive(Debug, Default)]
struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    report_failures: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl PoolStats {
    fn begin(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }

    fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            report_failures: self.report_failures.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Decrements `in_flight` when a job leaves the hashing stage
struct InFlight<'a>(&'a PoolStats);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Jobs accepted or currently being handed over by `submit`
    pub submitted: u64,
    /// Jobs that reported COMPLETED
    pub completed: u64,
    /// Jobs that reported FAILED
    pub failed: u64,
    /// Jobs abandoned through their cancellation token
    pub cancelled: u64,
    /// Reports the reporter rejected
    pub report_failures: u64,
    /// Jobs currently hashing or reporting
    pub in_flight: usize,
    /// Highest `in_flight` observed
    pub peak_in_flight: usize,
}

impl PoolStatsSnapshot {
    /// Jobs that reached a terminal outcome (reported or abandoned)
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

struct Shared {
    hasher: Arc<dyn ContentHasher>,
    stats: PoolStats,
}

/// Fixed-size pool of hashing workers
pub struct WorkerPool {
    sender: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    worker_count: usize,
}

impl WorkerPool {
    /// Start `workers` threads hashing with the default SHA-256 hasher.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        Self::with_hasher(
            PoolConfig::with_workers(workers),
            Arc::new(StreamHasher::default()),
        )
    }

    /// Start a pool with an explicit configuration and hasher.
    pub fn with_hasher(
        config: PoolConfig,
        hasher: Arc<dyn ContentHasher>,
    ) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::InvalidWorkerCount);
        }

        let (tx, rx) = bounded::<Job>(config.queue_capacity);
        let shared = Arc::new(Shared {
            hasher,
            stats: PoolStats::default(),
        });

        let mut handles = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let rx = rx.clone();
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .spawn(move || worker_loop(id, rx, worker_shared));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Close the queue so the workers already running exit.
                    drop(tx);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        log_worker_info!(
            "worker pool started",
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            hasher = shared.hasher.name(),
        );

        Ok(Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(handles),
            shared,
            worker_count: config.workers,
        })
    }

    /// Enqueue a job, blocking while the queue has no spare capacity.
    ///
    /// Returns [`SubmitError::ShutDown`] once [`shutdown`](Self::shutdown)
    /// has been called; the rejected job is dropped without reporting.
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        // Clone the sender so a blocked submit never holds the lock.
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(sender) = sender else {
            return Err(SubmitError::ShutDown {
                file_id: job.file_id().to_string(),
            });
        };

        // Counted before the hand-off so `submitted` never trails `finished()`.
        let submitted = &self.shared.stats.submitted;
        submitted.fetch_add(1, Ordering::SeqCst);
        sender.send(job).map_err(|SendError(job)| {
            submitted.fetch_sub(1, Ordering::SeqCst);
            SubmitError::Disconnected {
                file_id: job.file_id().to_string(),
            }
        })
    }

    /// Stop accepting jobs and wait until every accepted job has finished.
    ///
    /// Safe to call more than once; concurrent callers all return after the
    /// drain completes.
    pub fn shutdown(&self) {
        let was_open = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                log_worker_warn!("worker thread panicked during shutdown");
            }
        }

        if was_open {
            let stats = self.shared.stats.snapshot();
            log_worker_info!(
                "worker pool drained",
                submitted = stats.submitted,
                completed = stats.completed,
                failed = stats.failed,
                cancelled = stats.cancelled,
                report_failures = stats.report_failures,
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker: usize, rx: Receiver<Job>, shared: Arc<Shared>) {
    log_worker_debug!("worker started", worker = worker);
    for job in rx.iter() {
        process_job(worker, job, &shared);
    }
    log_worker_debug!("worker exiting", worker = worker);
}

fn process_job(worker: usize, job: Job, shared: &Shared) {
    let stats = &shared.stats;

    if job.is_cancelled() {
        stats.cancelled.fetch_add(1, Ordering::SeqCst);
        log_worker_warn!(
            "processing cancelled",
            file_id = job.file_id(),
            worker = worker,
            phase = "cancelled",
            stage = "queued",
        );
        return;
    }

    let _in_flight = stats.begin();
    let start = Instant::now();
    log_worker_info!(
        "processing started",
        file_id = job.file_id(),
        worker = worker,
        phase = "started",
        start_time = tracing::field::display(Utc::now()),
    );

    let digest = panic::catch_unwind(AssertUnwindSafe(|| {
        shared.hasher.digest(job.file_path(), job.cancel_token())
    }))
    .unwrap_or_else(|payload| Err(HashError::Panicked(panic_message(payload.as_ref()))));

    let (hash, status, hash_error) = match digest {
        Ok(hash) => (hash, TerminalStatus::Completed, None),
        Err(HashError::Cancelled) => {
            stats.cancelled.fetch_add(1, Ordering::SeqCst);
            log_worker_warn!(
                "processing cancelled",
                file_id = job.file_id(),
                worker = worker,
                phase = "cancelled",
                stage = "hashing",
                latency_ms = start.elapsed().as_millis() as u64,
            );
            return;
        }
        Err(e) => (String::new(), TerminalStatus::Failed, Some(e.to_string())),
    };

    let file_id = job.file_id().to_string();
    let report_error = match panic::catch_unwind(AssertUnwindSafe(|| job.report(&hash, status))) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!("reporter panicked: {}", panic_message(payload.as_ref()))),
    };

    match status {
        TerminalStatus::Completed => stats.completed.fetch_add(1, Ordering::SeqCst),
        TerminalStatus::Failed => stats.failed.fetch_add(1, Ordering::SeqCst),
    };

    if let Some(reason) = report_error.as_deref() {
        stats.report_failures.fetch_add(1, Ordering::SeqCst);
        log_worker_warn!(
            "status report not delivered",
            file_id = file_id.as_str(),
            status = status.as_str(),
            error = reason,
        );
    }

    log_worker_info!(
        "processing finished",
        file_id = file_id.as_str(),
        worker = worker,
        phase = "finished",
        end_time = tracing::field::display(Utc::now()),
        latency_ms = start.elapsed().as_millis() as u64,
        status = status.as_str(),
        error = hash_error.as_deref(),
        delivered = report_error.is_none(),
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
