//! # vfault-config
//!
//! Configuration management for vfault.
//!
//! Loads configuration from:
//! 1. `~/.vfault/config.toml` (global)
//! 2. `.vfault/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a complete Config.
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

pub const ENV_TRACEBACK: &str = "VFAULT_TRACEBACK";
pub const ENV_TESTING_WER: &str = "VFAULT_TESTING_WER";
pub const ENV_BUILD_MODE: &str = "VFAULT_BUILD_MODE";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub traceback: TracebackConfig,
    pub runtime: RuntimeConfig,
    pub testing: TestingConfig,
    pub windows: WindowsConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        Self::load_from(
            global.as_deref(),
            Path::new(".vfault/config.toml"),
            |key| std::env::var(key).ok(),
        )
    }

    /// Load config from explicit locations with a custom environment lookup.
    ///
    /// Missing files are skipped. The project file is merged over the global
    /// one table by table, so a project file that only sets
    /// `traceback.level` keeps every other global setting.
    pub fn load_from<F>(global: Option<&Path>, project: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut table = toml::Table::new();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(global_path)?;
                table = contents.parse::<toml::Table>()?;
            }
        }

        if project.exists() {
            debug!("Loading project config from {:?}", project);
            let contents = std::fs::read_to_string(project)?;
            merge_tables(&mut table, contents.parse::<toml::Table>()?);
        }

        let mut config: Config = toml::Value::Table(table).try_into()?;
        config.apply_env_overrides(env)?;
        Ok(config)
    }

    /// Global config path: ~/.vfault/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vfault/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = env(ENV_TRACEBACK) {
            self.traceback.level = level.parse()?;
        }
        if let Some(flag) = env(ENV_TESTING_WER) {
            self.testing.wer_passthrough = parse_flag(ENV_TESTING_WER, &flag)?;
        }
        if let Some(mode) = env(ENV_BUILD_MODE) {
            self.runtime.build_mode = mode.parse()?;
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        // Config only holds plain enums, bools and strings; serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

// ============================================================================
// Traceback verbosity
// ============================================================================

/// How much the crash reporter prints before the process exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracebackLevel {
    /// Exception line only.
    None,
    /// Faulting task only.
    #[default]
    Single,
    /// Every live task.
    All,
    /// Every live task, including runtime-internal frames.
    System,
    /// Like `System`, then ask the OS for a native crash artifact.
    Crash,
}

impl TracebackLevel {
    pub fn level(self) -> u8 {
        match self {
            TracebackLevel::None => 0,
            TracebackLevel::Single | TracebackLevel::All => 1,
            TracebackLevel::System | TracebackLevel::Crash => 2,
        }
    }

    pub fn show_all(self) -> bool {
        matches!(
            self,
            TracebackLevel::All | TracebackLevel::System | TracebackLevel::Crash
        )
    }

    pub fn crash_dump(self) -> bool {
        self == TracebackLevel::Crash
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TracebackLevel::None => "none",
            TracebackLevel::Single => "single",
            TracebackLevel::All => "all",
            TracebackLevel::System => "system",
            TracebackLevel::Crash => "crash",
        }
    }
}

impl FromStr for TracebackLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(TracebackLevel::None),
            "single" | "" => Ok(TracebackLevel::Single),
            "all" | "1" => Ok(TracebackLevel::All),
            "system" | "2" => Ok(TracebackLevel::System),
            "crash" => Ok(TracebackLevel::Crash),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_TRACEBACK,
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TracebackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traceback configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracebackConfig {
    pub level: TracebackLevel,
}

// ============================================================================
// Runtime embedding
// ============================================================================

/// How the runtime was linked into the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Executable,
    /// Loaded as a shared library inside a foreign host process.
    Library,
    /// Linked as a static archive into a foreign host program.
    Archive,
}

impl BuildMode {
    /// The host, not the runtime, owns crashes in embedded modes.
    pub fn is_embedded(self) -> bool {
        matches!(self, BuildMode::Library | BuildMode::Archive)
    }
}

impl FromStr for BuildMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "executable" | "exe" => Ok(BuildMode::Executable),
            "library" | "c-shared" => Ok(BuildMode::Library),
            "archive" | "c-archive" => Ok(BuildMode::Archive),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_BUILD_MODE,
                value: s.to_string(),
            }),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub build_mode: BuildMode,
    /// Runtime calls into foreign (non-runtime) code on its own threads.
    pub foreign_interop: bool,
}

/// Test-only switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Leave unhandled faults to the OS default handler (Windows Error Reporting).
    pub wer_passthrough: bool,
}

/// Windows-specific switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// Suppress the Windows Error Reporting dialog at install time.
    pub disable_wer: bool,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self { disable_wer: true }
    }
}
