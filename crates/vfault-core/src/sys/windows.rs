//! Windows vectored exception registration.

use std::fmt;
use std::sync::OnceLock;

use windows_sys::Win32::System::Diagnostics::Debug::{
    AddVectoredContinueHandler, AddVectoredExceptionHandler, SetErrorMode,
    SetUnhandledExceptionFilter, CONTEXT, EXCEPTION_POINTERS,
};

use super::{quiet_error_mode, Installation, SEM_NOGPFAULTERRORBOX};
use crate::arch::Arch;
use crate::context::MachineContext;
use crate::coordinator::{FaultCoordinator, HandlerKind, EXCEPTION_CONTINUE_SEARCH};
use crate::exception::{ExceptionCode, ExceptionRecord};
use crate::registration::{Registration, RegistrationPlan};
use crate::task::TaskHost;
use crate::{FaultError, Result};

struct Installed {
    coordinator: FaultCoordinator,
    host: &'static (dyn TaskHost + Sync),
}

static INSTALLED: OnceLock<Installed> = OnceLock::new();

/// Address the coordinator's panic entry must be built with.
pub fn panic_entry_address() -> usize {
    panic_entry as usize
}

/// Register the handlers. May be called once per process.
pub fn install(installation: Installation) -> Result<()> {
    let Installation {
        coordinator,
        host,
        disable_wer,
    } = installation;

    let actual = coordinator.site().entries.panic_entry;
    if actual != panic_entry_address() {
        return Err(FaultError::PanicEntryMismatch {
            expected: panic_entry_address(),
            actual,
        });
    }
    if INSTALLED.set(Installed { coordinator, host }).is_err() {
        return Err(FaultError::AlreadyInstalled);
    }

    if disable_wer {
        // SetErrorMode only returns the previous mode while setting a new one.
        unsafe {
            let previous = SetErrorMode(SEM_NOGPFAULTERRORBOX);
            SetErrorMode(quiet_error_mode(previous));
        }
        vfault_config::log_install_debug!("Windows Error Reporting dialog disabled");
    }

    let plan = RegistrationPlan::for_arch(Arch::HOST, true);
    for step in plan.steps() {
        let registered = unsafe {
            match step.via {
                Registration::VectoredException { first } => {
                    !AddVectoredExceptionHandler(first as u32, Some(vectored_tramp(step.kind)))
                        .is_null()
                }
                Registration::VectoredContinue { first } => {
                    !AddVectoredContinueHandler(first as u32, Some(vectored_tramp(step.kind)))
                        .is_null()
                }
                Registration::UnhandledFilter => {
                    // Returns the previous filter, which may legitimately be none.
                    SetUnhandledExceptionFilter(Some(last_continue_filter));
                    true
                }
            }
        };
        if !registered {
            vfault_config::log_install_error!("Handler registration failed", handler = step.kind.name());
            return Err(FaultError::Registration(step.kind.name()));
        }
        vfault_config::log_install_info!(
            "Registered handler",
            handler = step.kind.name(),
            via = tracing::field::debug(step.via),
        );
    }
    Ok(())
}

type VectoredHandler = unsafe extern "system" fn(*mut EXCEPTION_POINTERS) -> i32;

fn vectored_tramp(kind: HandlerKind) -> VectoredHandler {
    match kind {
        HandlerKind::Exception => exception_tramp,
        HandlerKind::FirstContinue => first_continue_tramp,
        HandlerKind::LastContinue => last_continue_tramp,
    }
}

unsafe extern "system" fn exception_tramp(info: *mut EXCEPTION_POINTERS) -> i32 {
    handle(HandlerKind::Exception, info)
}

unsafe extern "system" fn first_continue_tramp(info: *mut EXCEPTION_POINTERS) -> i32 {
    handle(HandlerKind::FirstContinue, info)
}

unsafe extern "system" fn last_continue_tramp(info: *mut EXCEPTION_POINTERS) -> i32 {
    handle(HandlerKind::LastContinue, info)
}

unsafe extern "system" fn last_continue_filter(info: *const EXCEPTION_POINTERS) -> i32 {
    handle(HandlerKind::LastContinue, info)
}

/// Shared body of every trampoline. Restricted zone: no allocation.
unsafe fn handle(kind: HandlerKind, info: *const EXCEPTION_POINTERS) -> i32 {
    let Some(installed) = INSTALLED.get() else {
        return EXCEPTION_CONTINUE_SEARCH;
    };
    // SAFETY: the OS passes valid record and context pointers for the
    // duration of the call.
    let info = unsafe { &*info };
    let raw = unsafe { &*info.ExceptionRecord };
    let record = ExceptionRecord::new(
        ExceptionCode(raw.ExceptionCode as u32),
        raw.ExceptionInformation[0],
        raw.ExceptionInformation[1],
    );
    let mut ctx = NativeContext(unsafe { &mut *info.ContextRecord });

    installed
        .coordinator
        .handle(kind, installed.host, &record, &mut ctx)
        .to_os()
}

/// Target of the redirected resume.
extern "C-unwind" fn panic_entry() -> ! {
    match INSTALLED.get() {
        Some(installed) => installed.coordinator.sigpanic(installed.host),
        None => std::process::abort(),
    }
}

// ============================================================================
// CONTEXT access
// ============================================================================

/// The OS-owned register snapshot of a faulting thread.
pub struct NativeContext<'a>(pub &'a mut CONTEXT);

macro_rules! dump_fields {
    ($out:expr, $ctx:expr, $($name:literal => $field:ident),* $(,)?) => {{
        $( writeln!($out, "{:<7} {:#x}", $name, $ctx.$field)?; )*
        Ok(())
    }};
}

#[cfg(target_arch = "x86_64")]
impl MachineContext for NativeContext<'_> {
    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn ip(&self) -> usize {
        self.0.Rip as usize
    }

    fn sp(&self) -> usize {
        self.0.Rsp as usize
    }

    fn lr(&self) -> usize {
        0
    }

    fn set_ip(&mut self, ip: usize) {
        self.0.Rip = ip as u64;
    }

    fn set_sp(&mut self, sp: usize) {
        self.0.Rsp = sp as u64;
    }

    fn set_lr(&mut self, _lr: usize) {}

    fn dump_registers(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        dump_fields!(out, self.0,
            "rax" => Rax, "rbx" => Rbx, "rcx" => Rcx, "rdx" => Rdx,
            "rdi" => Rdi, "rsi" => Rsi, "rbp" => Rbp, "rsp" => Rsp,
            "r8" => R8, "r9" => R9, "r10" => R10, "r11" => R11,
            "r12" => R12, "r13" => R13, "r14" => R14, "r15" => R15,
            "rip" => Rip, "rflags" => EFlags, "cs" => SegCs, "fs" => SegFs, "gs" => SegGs,
        )
    }
}

#[cfg(target_arch = "x86")]
impl MachineContext for NativeContext<'_> {
    fn arch(&self) -> Arch {
        Arch::X86
    }

    fn ip(&self) -> usize {
        self.0.Eip as usize
    }

    fn sp(&self) -> usize {
        self.0.Esp as usize
    }

    fn lr(&self) -> usize {
        0
    }

    fn set_ip(&mut self, ip: usize) {
        self.0.Eip = ip as u32;
    }

    fn set_sp(&mut self, sp: usize) {
        self.0.Esp = sp as u32;
    }

    fn set_lr(&mut self, _lr: usize) {}

    fn dump_registers(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        dump_fields!(out, self.0,
            "eax" => Eax, "ebx" => Ebx, "ecx" => Ecx, "edx" => Edx,
            "edi" => Edi, "esi" => Esi, "ebp" => Ebp, "esp" => Esp,
            "eip" => Eip, "eflags" => EFlags, "cs" => SegCs, "fs" => SegFs, "gs" => SegGs,
        )
    }
}

#[cfg(target_arch = "aarch64")]
impl MachineContext for NativeContext<'_> {
    fn arch(&self) -> Arch {
        Arch::Aarch64
    }

    fn ip(&self) -> usize {
        self.0.Pc as usize
    }

    fn sp(&self) -> usize {
        self.0.Sp as usize
    }

    fn lr(&self) -> usize {
        // SAFETY: both union views cover the same 31 general registers.
        unsafe { self.0.Anonymous.Anonymous.Lr as usize }
    }

    fn set_ip(&mut self, ip: usize) {
        self.0.Pc = ip as u64;
    }

    fn set_sp(&mut self, sp: usize) {
        self.0.Sp = sp as u64;
    }

    fn set_lr(&mut self, lr: usize) {
        // SAFETY: as in `lr`.
        unsafe { self.0.Anonymous.Anonymous.Lr = lr as u64 };
    }

    fn dump_registers(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        // SAFETY: as in `lr`.
        let regs = unsafe { self.0.Anonymous.X };
        for (i, value) in regs.iter().enumerate() {
            writeln!(out, "r{:<6} {:#x}", i, value)?;
        }
        dump_fields!(out, self.0, "sp" => Sp, "pc" => Pc)
    }
}
