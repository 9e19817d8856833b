//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated "home" holding the global `.vfault/config.toml`
//! - An isolated project root holding the project `.vfault/config.toml`
//! - Config loading that ignores the real process environment
//!
//! # Usage
//!
//! ```ignore
//! use vfault_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! env.write_project_config("[traceback]\nlevel = \"all\"\n")?;
//! let config = env.load_config(&[])?;
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, ConfigError};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with its own global and project config files
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Stand-in for the user's home directory
    pub home_dir: PathBuf,
    /// Project root for the test
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let home_dir = root.join("home");
        let project_root = root.join(format!("project-{}", test_id));

        std::fs::create_dir_all(home_dir.join(".vfault"))?;
        std::fs::create_dir_all(project_root.join(".vfault"))?;

        Ok(Self {
            _temp_dir: temp_dir,
            home_dir,
            project_root,
            test_id,
        })
    }

    /// Global config path inside the isolated home
    pub fn global_config_path(&self) -> PathBuf {
        self.home_dir.join(".vfault/config.toml")
    }

    /// Project config path inside the isolated project
    pub fn project_config_path(&self) -> PathBuf {
        self.project_root.join(".vfault/config.toml")
    }

    pub fn write_global_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.global_config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_project_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.project_config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Load config from this environment's files, with `vars` standing in
    /// for the process environment.
    pub fn load_config(&self, vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let global = self.global_config_path();
        Config::load_from(Some(&global), &self.project_config_path(), |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    /// Environment variables that reproduce `config` for a spawned process.
    pub fn env_for(config: &Config) -> Vec<(String, String)> {
        vec![
            (
                crate::ENV_TRACEBACK.to_string(),
                config.traceback.level.as_str().to_string(),
            ),
            (
                crate::ENV_TESTING_WER.to_string(),
                if config.testing.wer_passthrough { "1" } else { "0" }.to_string(),
            ),
        ]
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
