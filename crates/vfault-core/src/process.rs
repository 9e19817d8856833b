//! Process termination primitives.

/// How the fault layer ends the process.
pub trait ProcessControl: Send + Sync {
    /// Terminate with `code`. Never returns to the faulting code.
    fn exit(&self, code: i32) -> !;

    /// Produce a native crash artifact if the platform supports it. May
    /// return, in which case the caller exits normally.
    fn crash(&self);
}

/// The real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProcess;

impl ProcessControl for NativeProcess {
    fn exit(&self, code: i32) -> ! {
        std::process::exit(code)
    }

    #[cfg(windows)]
    fn crash(&self) {
        use windows_sys::Win32::System::Diagnostics::Debug::RaiseFailFastException;
        // Bypasses every remaining handler and lets WER write a dump.
        unsafe { RaiseFailFastException(std::ptr::null(), std::ptr::null(), 0) };
    }

    #[cfg(not(windows))]
    fn crash(&self) {
        std::process::abort()
    }
}
