//! # vfault-core
//!
//! Translates hardware faults delivered through the Windows vectored
//! exception chain into typed runtime panics, or into an orderly crash
//! report when the runtime cannot recover.
//!
//! ```text
//!  OS fault ──► exception handler ──► classify ──► abort? ──► crash report
//!                    │                    │
//!                    │ not ours           └─► rewrite context ──► resume
//!                    ▼                                              │
//!              frame handlers                               panic entry
//!                    │                                              │
//!                    ▼                                      RuntimePanic / fatal
//!          last continue handler ──► crash report
//! ```
//!
//! The decision logic is portable. [`sys`] binds it to the OS on Windows;
//! [`sim`] drives it from plain memory everywhere else.

pub mod arch;
pub mod badsignal;
pub mod chain;
pub mod console;
pub mod context;
pub mod coordinator;
pub mod crash;
pub mod dispatch;
pub mod exception;
pub mod module;
pub mod policy;
pub mod process;
pub mod registration;
pub mod restricted;
pub mod rewrite;
pub mod sim;
pub mod sys;
pub mod task;
pub mod traceback;

pub use arch::Arch;
pub use chain::{ChainOutcome, HandlerChain};
pub use context::{MachineContext, SyntheticContext};
pub use coordinator::{CrashPolicy, Disposition, FaultCoordinator, HandlerKind};
pub use dispatch::{dispatch_pending, FatalFault, RuntimePanic};
pub use exception::{ExceptionCode, ExceptionRecord};
pub use module::ModuleTextRange;
pub use registration::RegistrationPlan;
pub use task::{Machine, Task, TaskHost, TaskKind, ThreadBinding};

#[derive(Debug, thiserror::Error)]
pub enum FaultError {
    #[error("invalid text range {start:#x}..={end:#x}")]
    InvalidTextRange { start: usize, end: usize },
    #[error("panic entry address not set")]
    MissingPanicEntry,
    #[error("panic entry {actual:#x} does not match the installed trampoline {expected:#x}")]
    PanicEntryMismatch { expected: usize, actual: usize },
    #[error("fault handlers already installed")]
    AlreadyInstalled,
    #[error("failed to register {0} handler")]
    Registration(&'static str),
    #[error("vectored exception handling is not available on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, FaultError>;
