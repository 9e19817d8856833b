//! OS binding.
//!
//! On Windows this registers the coordinator's handlers with the vectored
//! exception machinery. Other targets have no such machinery and `install`
//! reports [`FaultError::Unsupported`].

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::{install, panic_entry_address, NativeContext};

use crate::coordinator::FaultCoordinator;
use crate::task::TaskHost;
#[cfg(not(windows))]
use crate::FaultError;
use crate::Result;

/// `SetErrorMode` flags.
pub const SEM_FAILCRITICALERRORS: u32 = 0x0001;
pub const SEM_NOGPFAULTERRORBOX: u32 = 0x0002;
pub const SEM_NOOPENFILEERRORBOX: u32 = 0x8000;

/// Error mode that keeps the OS from showing crash dialogs, preserving the
/// bits already set in `previous`.
pub const fn quiet_error_mode(previous: u32) -> u32 {
    previous | SEM_FAILCRITICALERRORS | SEM_NOGPFAULTERRORBOX | SEM_NOOPENFILEERRORBOX
}

/// Everything `install` needs, fixed for the life of the process.
pub struct Installation {
    pub coordinator: FaultCoordinator,
    pub host: &'static (dyn TaskHost + Sync),
    /// Suppress the Windows Error Reporting dialog.
    pub disable_wer: bool,
}

#[cfg(not(windows))]
pub fn install(_installation: Installation) -> Result<()> {
    Err(FaultError::Unsupported)
}

/// Install with settings from the process-wide configuration.
pub fn install_with_config(
    coordinator: FaultCoordinator,
    host: &'static (dyn TaskHost + Sync),
) -> Result<()> {
    let disable_wer = vfault_config::config().windows.disable_wer;
    install(Installation {
        coordinator,
        host,
        disable_wer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_error_mode_preserves_previous_bits() {
        assert_eq!(quiet_error_mode(0), 0x8003);
        // SEM_NOALIGNMENTFAULTEXCEPT survives.
        assert_eq!(quiet_error_mode(0x0004), 0x8007);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_install_unsupported_off_windows() {
        use crate::module::ModuleTextRange;
        use crate::task::{Task, ThreadBinding};

        struct NoThreads;
        impl TaskHost for NoThreads {
            fn binding(&self) -> ThreadBinding<'_> {
                ThreadBinding::Foreign
            }
            fn can_panic(&self, _task: &Task) -> bool {
                false
            }
        }
        static HOST: NoThreads = NoThreads;

        let coordinator = FaultCoordinator::builder(ModuleTextRange::new(0x1000, 0x2000).unwrap())
            .panic_entry(0x1800)
            .build()
            .unwrap();
        let result = install(Installation {
            coordinator,
            host: &HOST,
            disable_wer: true,
        });
        assert!(matches!(result, Err(FaultError::Unsupported)));
    }
}
