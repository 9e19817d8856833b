//! Structured logging utilities for vfault components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! These macros go through `tracing` and may allocate. They are for install,
//! configuration and post-dispatch code only; nothing that runs before a
//! faulting thread has been redirected may use them.
//!
//! # Usage
//!
//! ```ignore
//! use vfault_config::logging::*;
//!
//! log_install_info!("Registered handler", kind = "exception");
//! log_fault_debug!("Dispatching pending fault", code = 0xc0000005u32);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const FAULT: &'static str = "FAULT";
    pub const INSTALL: &'static str = "INSTALL";
    pub const CONFIG: &'static str = "CONFIG";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// === FAULT logging macros ===

#[macro_export]
macro_rules! log_fault_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "FAULT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fault_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "FAULT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fault_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FAULT", $($key = $value,)* $msg)
    };
}

// === INSTALL logging macros ===

#[macro_export]
macro_rules! log_install_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "INSTALL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_install_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "INSTALL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_install_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "INSTALL", $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so they never mix with command output on stdout.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::FAULT, "FAULT");
        assert_eq!(Component::INSTALL, "INSTALL");
        assert_eq!(Component::CLI, "CLI");
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(LogLevel::Warn);
        init_logging(LogLevel::Debug);
        log_fault_debug!("still alive", attempt = 2);
    }
}
