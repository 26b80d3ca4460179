//! Worker lifecycle events: one `started` / `finished` / `cancelled` event
//! per phase, with the fields operators filter on.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use filedrop_core::{
    CancelToken, ContentHasher, HashError, IngestCoordinator, Job, PoolConfig, ReportError,
    StatusReporter, TerminalStatus, WorkerPool,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

type Fields = HashMap<String, String>;

/// Stores every event's fields as strings
struct CaptureLayer {
    events: Arc<Mutex<Vec<Fields>>>,
}

struct FieldVisitor<'a>(&'a mut Fields);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::new();
        event.record(&mut FieldVisitor(&mut fields));
        self.events.lock().unwrap().push(fields);
    }
}

/// Workers log from their own threads, so the capture has to be global.
fn captured() -> Arc<Mutex<Vec<Fields>>> {
    static EVENTS: OnceLock<Arc<Mutex<Vec<Fields>>>> = OnceLock::new();
    EVENTS
        .get_or_init(|| {
            let events = Arc::new(Mutex::new(Vec::new()));
            let subscriber = tracing_subscriber::registry().with(CaptureLayer {
                events: events.clone(),
            });
            tracing::subscriber::set_global_default(subscriber).unwrap();
            events
        })
        .clone()
}

fn events_for(events: &Mutex<Vec<Fields>>, file_id: &str) -> Vec<Fields> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.get("file_id").map(String::as_str) == Some(file_id))
        .cloned()
        .collect()
}

fn phases(events: &[Fields]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| e.get("phase").map(String::as_str))
        .collect()
}

/// Holds every job until released
#[derive(Default)]
struct HeldHasher {
    open: Mutex<bool>,
    cv: Condvar,
    entered: AtomicBool,
}

impl HeldHasher {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

impl ContentHasher for HeldHasher {
    fn digest(&self, path: &Path, cancel: &CancelToken) -> Result<String, HashError> {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
        if cancel.is_cancelled() {
            return Err(HashError::Cancelled);
        }
        Ok(format!("held:{}", path.display()))
    }

    fn name(&self) -> &'static str {
        "held"
    }
}

struct Accepting;

impl StatusReporter for Accepting {
    fn report_result(&self, _: &str, _: &str, _: TerminalStatus) -> Result<(), ReportError> {
        Ok(())
    }
}

struct Refusing;

impl StatusReporter for Refusing {
    fn report_result(&self, file_id: &str, _: &str, _: TerminalStatus) -> Result<(), ReportError> {
        Err(ReportError::new(file_id, "store offline"))
    }
}

#[test]
fn test_finished_event_after_successful_report() {
    let events = captured();
    let pool = WorkerPool::new(1).unwrap();

    pool.submit(Job::new("ev-ok", "/v/ev-ok-missing", Arc::new(Accepting)))
        .unwrap();
    pool.shutdown();

    let job_events = events_for(&events, "ev-ok");
    assert_eq!(phases(&job_events), vec!["started", "finished"]);

    let finished = &job_events[1];
    assert_eq!(finished["status"], "FAILED");
    assert_eq!(finished["delivered"], "true");
    assert_eq!(finished["component"], "WORKER");
    assert!(finished.contains_key("latency_ms"));
    assert!(finished.contains_key("end_time"));
    assert!(finished.contains_key("error"));
    assert!(job_events[0].contains_key("start_time"));
}

#[test]
fn test_finished_event_when_report_fails() {
    let events = captured();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload");
    std::fs::write(&path, b"payload").unwrap();

    let pool = WorkerPool::new(1).unwrap();
    pool.submit(Job::new("ev-undelivered", &path, Arc::new(Refusing)))
        .unwrap();
    pool.shutdown();

    let job_events = events_for(&events, "ev-undelivered");
    assert_eq!(phases(&job_events), vec!["started", "finished"]);

    let finished = job_events
        .iter()
        .find(|e| e.get("phase").map(String::as_str) == Some("finished"))
        .unwrap();
    assert_eq!(finished["delivered"], "false");
    assert_eq!(finished["status"], "COMPLETED");

    // Plus one warning naming the delivery failure
    let warnings: Vec<_> = job_events
        .iter()
        .filter(|e| e["message"] == "status report not delivered")
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0]["error"].contains("store offline"));
}

#[test]
fn test_single_cancelled_event_for_queued_job() {
    let events = captured();
    let hasher = Arc::new(HeldHasher::default());
    let config = PoolConfig {
        workers: 1,
        queue_capacity: 4,
        ..PoolConfig::default()
    };
    let pool = Arc::new(WorkerPool::with_hasher(config, hasher.clone()).unwrap());
    let coordinator = IngestCoordinator::new(pool.clone());

    coordinator
        .submit_job("ev-first", "/v/ev-first", Arc::new(Accepting))
        .unwrap();
    let queued = coordinator
        .submit_job("ev-queued", "/v/ev-queued", Arc::new(Accepting))
        .unwrap();
    queued.cancel();

    hasher.release();
    pool.shutdown();

    let job_events = events_for(&events, "ev-queued");
    assert_eq!(phases(&job_events), vec!["cancelled"]);
    assert_eq!(job_events[0]["stage"], "queued");

    assert_eq!(
        phases(&events_for(&events, "ev-first")),
        vec!["started", "finished"]
    );
}

#[test]
fn test_cancel_mid_hash_emits_started_then_cancelled() {
    let events = captured();
    let hasher = Arc::new(HeldHasher::default());
    let pool = Arc::new(
        WorkerPool::with_hasher(PoolConfig::with_workers(1), hasher.clone()).unwrap(),
    );
    let coordinator = IngestCoordinator::new(pool.clone());

    let token = coordinator
        .submit_job("ev-mid", "/v/ev-mid", Arc::new(Accepting))
        .unwrap();
    while !hasher.entered.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    token.cancel();
    hasher.release();
    pool.shutdown();

    let job_events = events_for(&events, "ev-mid");
    assert_eq!(phases(&job_events), vec!["started", "cancelled"]);
    assert_eq!(job_events[1]["stage"], "hashing");
    assert!(job_events[1].contains_key("latency_ms"));
}
