//! Content hashing.
//!
//! Files are digested in fixed-size chunks so memory stays bounded no matter
//! how large the upload is. The cancellation token is polled between chunks,
//! which lets an abandoned job release its file handle after at most one more
//! read instead of running to completion in the background.
//!
//! Digests are lowercase hex strings (64 chars for both algorithms).

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use thiserror::Error;

use crate::cancel::CancelToken;

/// Default read chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest read chunk a hasher will allocate (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced while hashing
#[derive(Error, Debug)]
pub enum HashError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stream read failed: {0}")]
    Stream(#[from] io::Error),

    #[error("hashing cancelled")]
    Cancelled,

    #[error("hasher panicked: {0}")]
    Panicked(String),
}

impl HashError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HashError::Cancelled)
    }
}

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, the format the metadata `sha256` column stores
    #[default]
    Sha256,
    /// BLAKE3, faster on large inputs
    Blake3,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown digest algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Computes the digest of a stored file.
///
/// Implementations must be deterministic over the file's bytes and must not
/// modify the file. Returning [`HashError::Cancelled`] tells the worker the
/// job was abandoned and no status should be reported.
pub trait ContentHasher: Send + Sync {
    fn digest(&self, path: &Path, cancel: &CancelToken) -> Result<String, HashError>;

    /// Name for logging
    fn name(&self) -> &'static str;
}

enum DigestState {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => DigestState::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Sha256(h) => h.update(data),
            DigestState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Sha256(h) => hex::encode(h.finalize()),
            DigestState::Blake3(h) => hex::encode(h.finalize().as_bytes()),
        }
    }
}

/// Chunked, cancellable file hasher
#[derive(Debug, Clone, Copy)]
pub struct StreamHasher {
    algorithm: DigestAlgorithm,
    chunk_size: usize,
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new(DigestAlgorithm::default())
    }
}

impl StreamHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the read chunk size (clamped to `1..=MAX_CHUNK_SIZE`)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Digest a stream, consuming it fully and in order.
    pub fn digest_reader<R: Read>(
        &self,
        mut reader: R,
        cancel: &CancelToken,
    ) -> Result<String, HashError> {
        let mut state = DigestState::new(self.algorithm);
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            if cancel.is_cancelled() {
                return Err(HashError::Cancelled);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(HashError::Stream(e)),
            };
            state.update(&buf[..n]);
        }

        Ok(state.finalize_hex())
    }

    /// Digest the file at `path`.
    pub fn digest_file(&self, path: &Path, cancel: &CancelToken) -> Result<String, HashError> {
        let file = File::open(path).map_err(|source| HashError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        self.digest_reader(file, cancel).map_err(|e| match e {
            HashError::Stream(source) => HashError::Read {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }
}

impl ContentHasher for StreamHasher {
    fn digest(&self, path: &Path, cancel: &CancelToken) -> Result<String, HashError> {
        self.digest_file(path, cancel)
    }

    fn name(&self) -> &'static str {
        self.algorithm.as_str()
    }
}
