//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary node data roots
//! - Isolated metadata store directories
//! - A [`Config`] pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use nodevault_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new().unwrap();
//! // env.data_path, env.store_path and env.config() are all isolated
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Node data root
    pub data_path: PathBuf,
    /// Metadata store directory
    pub store_path: PathBuf,
    /// Scratch area standing in for the upload temp directory
    pub upload_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let data_path = root.join("data");
        let store_path = root.join("meta.lmdb");
        let upload_dir = root.join("uploads");

        std::fs::create_dir_all(&data_path)?;
        std::fs::create_dir_all(&upload_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            data_path,
            store_path,
            upload_dir,
            test_id,
        })
    }

    /// Config rooted in this environment, with a small chunk size so
    /// index arithmetic is visible on tiny fixtures.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.data_path = self.data_path.clone();
        config.storage.chunk_size = 16;
        config.store.address = self.store_path.clone();
        config.store.map_size = 16 * 1024 * 1024;
        config
    }

    /// Write a file into the upload area, as an upload handler would.
    pub fn upload(&self, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.upload_dir.join(format!("{}-{}", self.test_id, name));
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Root of the temporary tree
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_isolated() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();

        assert_ne!(env1.test_id, env2.test_id);
        assert_ne!(env1.data_path, env2.data_path);
        assert!(env1.data_path.exists());
        assert!(env1.upload_dir.exists());
    }

    #[test]
    fn test_config_points_into_environment() {
        let env = TestEnvironment::new().unwrap();
        let config = env.config();
        assert!(config.storage.data_path.starts_with(env.root()));
        assert!(config.store.address.starts_with(env.root()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upload_writes_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.upload("a.txt", b"hello").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }
}
