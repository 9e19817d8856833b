//! Integration tests for vfault-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use vfault_config::testing::TestEnvironment;
use vfault_config::{BuildMode, Config, ConfigError, TracebackLevel};

/// Test config loading from a real global config file
#[test]
fn test_load_global_config_from_file() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(
        r#"
[traceback]
level = "system"

[runtime]
build_mode = "library"
foreign_interop = true

[windows]
disable_wer = false
"#,
    )
    .unwrap();

    let config = env.load_config(&[]).unwrap();

    assert_eq!(config.traceback.level, TracebackLevel::System);
    assert_eq!(config.runtime.build_mode, BuildMode::Library);
    assert!(config.runtime.foreign_interop);
    assert!(!config.windows.disable_wer);
    assert!(!config.testing.wer_passthrough);
}

/// Test config hierarchy: project config overrides global key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(
        r#"
[traceback]
level = "all"

[runtime]
build_mode = "archive"
foreign_interop = true
"#,
    )
    .unwrap();
    env.write_project_config(
        r#"
[runtime]
build_mode = "executable"
"#,
    )
    .unwrap();

    let config = env.load_config(&[]).unwrap();

    // Overridden by project
    assert_eq!(config.runtime.build_mode, BuildMode::Executable);
    // Kept from global
    assert!(config.runtime.foreign_interop);
    assert_eq!(config.traceback.level, TracebackLevel::All);
}

/// Environment beats both files
#[test]
fn test_env_overrides_files() {
    let env = TestEnvironment::new().unwrap();
    env.write_project_config("[traceback]\nlevel = \"none\"\n")
        .unwrap();

    let config = env
        .load_config(&[("VFAULT_TRACEBACK", "crash"), ("VFAULT_TESTING_WER", "true")])
        .unwrap();

    assert_eq!(config.traceback.level, TracebackLevel::Crash);
    assert!(config.testing.wer_passthrough);
}

/// Unknown enum values surface as parse errors rather than silent defaults
#[test]
fn test_invalid_level_in_file_is_error() {
    let env = TestEnvironment::new().unwrap();
    env.write_project_config("[traceback]\nlevel = \"verbose\"\n")
        .unwrap();

    let err = env.load_config(&[]).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "got {err:?}");
}

/// Malformed TOML is reported, not ignored
#[test]
fn test_malformed_toml_is_error() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config("[traceback\nlevel = ").unwrap();

    assert!(matches!(env.load_config(&[]), Err(ConfigError::Toml(_))));
}

/// Generated default TOML loads back to the default config
#[test]
fn test_default_toml_loads_back() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(&Config::default_toml()).unwrap();

    let config = env.load_config(&[]).unwrap();
    assert_eq!(config, Config::default());
}
