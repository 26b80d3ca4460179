//! Jobs and the status reporting capability.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;

/// Processing state of a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Pending,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "PENDING",
            FileStatus::Completed => "COMPLETED",
            FileStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FileStatus::Pending)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown file status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for FileStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FileStatus::Pending),
            "COMPLETED" => Ok(FileStatus::Completed),
            "FAILED" => Ok(FileStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// The two outcomes a job may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        FileStatus::from(*self).as_str()
    }
}

impl From<TerminalStatus> for FileStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => FileStatus::Completed,
            TerminalStatus::Failed => FileStatus::Failed,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status delivery failure
#[derive(Error, Debug)]
#[error("status report for {file_id} failed: {source}")]
pub struct ReportError {
    pub file_id: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ReportError {
    pub fn new<E>(file_id: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            file_id: file_id.into(),
            source: source.into(),
        }
    }
}

/// Records a job's terminal outcome against a file id.
///
/// Called by at most one worker per job, but concurrently across jobs, so
/// implementations must tolerate parallel writes to different ids.
pub trait StatusReporter: Send + Sync {
    fn report_result(
        &self,
        file_id: &str,
        hash: &str,
        status: TerminalStatus,
    ) -> Result<(), ReportError>;
}

/// One unit of work: hash `file_path`, report against `file_id`.
///
/// Reporting consumes the job, so a job can report at most once.
pub struct Job {
    file_id: String,
    file_path: PathBuf,
    cancel: CancelToken,
    reporter: Arc<dyn StatusReporter>,
}

impl Job {
    /// New job with a fresh cancellation token
    pub fn new(
        file_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_path: file_path.into(),
            cancel: CancelToken::new(),
            reporter,
        }
    }

    /// Bind the job to an existing token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver the outcome. Consumes the job.
    pub(crate) fn report(self, hash: &str, status: TerminalStatus) -> Result<(), ReportError> {
        self.reporter.report_result(&self.file_id, hash, status)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("file_id", &self.file_id)
            .field("file_path", &self.file_path)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, String, TerminalStatus)>>,
    }

    impl StatusReporter for Recorder {
        fn report_result(
            &self,
            file_id: &str,
            hash: &str,
            status: TerminalStatus,
        ) -> Result<(), ReportError> {
            self.calls
                .lock()
                .unwrap()
                .push((file_id.to_string(), hash.to_string(), status));
            Ok(())
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(FileStatus::Pending.to_string(), "PENDING");
        assert_eq!(TerminalStatus::Failed.to_string(), "FAILED");
        assert_eq!("COMPLETED".parse::<FileStatus>().unwrap(), FileStatus::Completed);
        assert!("done".parse::<FileStatus>().is_err());
        assert!(!FileStatus::Pending.is_terminal());
        assert!(FileStatus::from(TerminalStatus::Completed).is_terminal());
    }

    #[test]
    fn test_status_serde_uses_wire_names() {
        let json = serde_json::to_string(&FileStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
        let parsed: TerminalStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(parsed, TerminalStatus::Failed);
    }

    #[test]
    fn test_report_goes_to_reporter() {
        let recorder = Arc::new(Recorder::default());
        let job = Job::new("f-1", "/tmp/f-1", recorder.clone());
        assert_eq!(job.file_id(), "f-1");
        assert_eq!(job.file_path(), Path::new("/tmp/f-1"));

        job.report("abc", TerminalStatus::Completed).unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![("f-1".to_string(), "abc".to_string(), TerminalStatus::Completed)]
        );
    }

    #[test]
    fn test_with_cancel_shares_token() {
        let token = CancelToken::new();
        let job = Job::new("f-2", "/tmp/f-2", Arc::new(Recorder::default()))
            .with_cancel(token.clone());
        assert!(!job.is_cancelled());
        token.cancel();
        assert!(job.is_cancelled());
        assert!(job.cancel_token().is_cancelled());
    }

    #[test]
    fn test_report_error_display() {
        let err = ReportError::new("f-3", "store unreachable");
        assert_eq!(err.to_string(), "status report for f-3 failed: store unreachable");
    }
}
