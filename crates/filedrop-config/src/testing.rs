//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary upload data directory
//! - A scratch directory for source files
//! - A config file pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use filedrop_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let src = env.create_file("docs/readme.txt", b"hello")?;
//! // env.data_dir is where staged uploads land
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Where staged uploads are written
    pub data_dir: PathBuf,
    /// Where test source files are created
    pub source_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let data_dir = root.join("data");
        let source_dir = root.join("source");

        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&source_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            data_dir,
            source_dir,
            test_id,
        })
    }

    /// Create a source file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// A path inside the source dir that is guaranteed not to exist
    pub fn missing_path(&self, name: &str) -> PathBuf {
        self.source_dir.join(format!("missing-{}-{}", self.test_id, name))
    }

    /// Config rooted at this environment
    pub fn config(&self) -> crate::Config {
        let mut cfg = crate::Config::default();
        cfg.storage.data_dir = self.data_dir.clone();
        cfg
    }

    /// Write `config()` to a TOML file and return its path
    pub fn write_config(&self) -> anyhow::Result<PathBuf> {
        let path = self.source_dir.join("filedrop.toml");
        std::fs::write(&path, toml::to_string_pretty(&self.config())?)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
