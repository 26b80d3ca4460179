//! Upload staging and the full ingest path.
//!
//! Bytes are streamed into `data_dir/.tmp-<id>` and renamed to
//! `data_dir/<id>` once flushed, so the pool only ever sees complete files.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filedrop_config::log_coord_info;
use thiserror::Error;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::coordinator::IngestCoordinator;
use crate::pool::SubmitError;
use crate::store::{MetadataStore, NewFile, StoreError, StoreReporter};

/// Errors on the synchronous upload path
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("I/O error while staging upload: {0}")]
    Io(#[from] io::Error),

    #[error("registration failed: {0}")]
    Register(#[from] StoreError),

    #[error("job submission failed: {0}")]
    Submit(#[from] SubmitError),
}

/// A file that has been durably written to the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Write `reader` into `data_dir` under a fresh id.
///
/// The temp file is removed on any failure.
pub fn stage_upload<R: Read>(data_dir: &Path, reader: &mut R) -> Result<StagedFile, UploadError> {
    fs::create_dir_all(data_dir)?;

    let id = Uuid::new_v4().to_string();
    let temp_path = data_dir.join(format!(".tmp-{}", id));
    let final_path = data_dir.join(&id);

    let written = write_temp(&temp_path, reader).and_then(|size| {
        fs::rename(&temp_path, &final_path)?;
        Ok(size)
    });

    match written {
        Ok(size) => Ok(StagedFile {
            id,
            path: final_path,
            size,
        }),
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(UploadError::Io(e))
        }
    }
}

fn write_temp<R: Read>(temp_path: &Path, reader: &mut R) -> io::Result<u64> {
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(file);
    let size = io::copy(reader, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(size)
}

/// Extension of an uploaded file name, lowercased, without the dot
pub fn extension_of(name: &Path) -> String {
    name.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Result of a successful ingest
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    /// Abandons interest in the hashing result
    pub cancel: CancelToken,
}

/// Stage → register PENDING → submit
pub struct Ingestor<S: MetadataStore + 'static> {
    data_dir: PathBuf,
    store: Arc<S>,
    coordinator: IngestCoordinator,
}

impl<S: MetadataStore + 'static> Ingestor<S> {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        store: Arc<S>,
        coordinator: IngestCoordinator,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            store,
            coordinator,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Ingest one upload.
    ///
    /// If registration fails the staged bytes are removed and nothing is
    /// submitted. If submission fails the record stays `PENDING`.
    pub fn ingest<R: Read>(
        &self,
        reader: &mut R,
        extension: &str,
    ) -> Result<IngestReceipt, UploadError> {
        let staged = stage_upload(&self.data_dir, reader)?;

        if let Err(e) = self.store.register_file(NewFile {
            id: staged.id.clone(),
            path: staged.path.clone(),
            size: staged.size,
            extension: extension.to_string(),
        }) {
            let _ = fs::remove_file(&staged.path);
            return Err(UploadError::Register(e));
        }

        let reporter = Arc::new(StoreReporter::new(Arc::clone(&self.store)));
        let cancel = self
            .coordinator
            .submit_job(staged.id.clone(), staged.path.clone(), reporter)?;

        log_coord_info!(
            "upload accepted",
            file_id = staged.id.as_str(),
            size = staged.size,
            extension = extension,
        );

        Ok(IngestReceipt {
            id: staged.id,
            path: staged.path,
            size: staged.size,
            cancel,
        })
    }

    /// Ingest a file from the local filesystem, keeping its extension
    pub fn ingest_path(&self, source: &Path) -> Result<IngestReceipt, UploadError> {
        let mut file = File::open(source)?;
        self.ingest(&mut file, &extension_of(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileStatus;
    use crate::pool::WorkerPool;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("client disconnected"))
        }
    }

    #[test]
    fn test_stage_upload_writes_final_file() {
        let dir = TempDir::new().unwrap();
        let staged = stage_upload(dir.path(), &mut &b"hello"[..]).unwrap();

        assert_eq!(staged.size, 5);
        assert_eq!(staged.path, dir.path().join(&staged.id));
        assert_eq!(fs::read(&staged.path).unwrap(), b"hello");
        assert!(Uuid::parse_str(&staged.id).is_ok());
    }

    #[test]
    fn test_failed_stage_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let err = stage_upload(dir.path(), &mut BrokenReader).unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/b/Report.PDF")), "pdf");
        assert_eq!(extension_of(Path::new("noext")), "");
    }

    #[test]
    fn test_ingest_registers_and_completes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let ingestor = Ingestor::new(
            dir.path(),
            store.clone(),
            IngestCoordinator::new(pool.clone()),
        );

        let receipt = ingestor.ingest(&mut &b"abc"[..], "txt").unwrap();
        pool.shutdown();

        let record = store.get_file(&receipt.id).unwrap();
        assert_eq!(record.status, FileStatus::Completed);
        assert_eq!(record.extension, "txt");
        assert_eq!(record.size, 3);
        assert_eq!(
            record.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_submit_failure_leaves_record_pending() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        pool.shutdown();
        let ingestor = Ingestor::new(dir.path(), store.clone(), IngestCoordinator::new(pool));

        let err = ingestor.ingest(&mut &b"abc"[..], "").unwrap_err();
        assert!(matches!(err, UploadError::Submit(SubmitError::ShutDown { .. })));
        assert_eq!(store.pending_ids().len(), 1);
    }
}
