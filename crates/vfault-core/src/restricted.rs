//! Pre-redirect view of a fault.
//!
//! Everything reachable from [`RestrictedFault`] runs before the faulting
//! thread is known to have stack to spare: fixed-size reads and compares
//! only, no allocation, no locks, no logging. The only way forward into
//! code that may allocate is [`RestrictedFault::redirect`], which consumes
//! the view and yields a [`Redirected`] token, or [`RestrictedFault::escalate`]
//! for paths that end the process.

use crate::context::MachineContext;
use crate::exception::{ExceptionCode, ExceptionRecord};
use crate::module::ModuleTextRange;
use crate::rewrite::{redirect_to_panic_entry, EntryPoints, Redirected};
use crate::task::Task;

/// Fixed facts about the running image, set once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSite {
    pub text: ModuleTextRange,
    /// Address of the runtime's deliberate abort trap instruction.
    pub abort_pc: usize,
    pub entries: EntryPoints,
}

pub struct RestrictedFault<'a, C: MachineContext + ?Sized> {
    record: &'a ExceptionRecord,
    ctx: &'a mut C,
    site: &'a FaultSite,
}

impl<'a, C: MachineContext + ?Sized> RestrictedFault<'a, C> {
    #[inline(always)]
    pub fn new(record: &'a ExceptionRecord, ctx: &'a mut C, site: &'a FaultSite) -> Self {
        Self { record, ctx, site }
    }

    #[inline(always)]
    pub fn code(&self) -> ExceptionCode {
        self.record.code
    }

    #[inline(always)]
    pub fn ip(&self) -> usize {
        self.ctx.ip()
    }

    #[inline(always)]
    pub fn in_runtime_text(&self) -> bool {
        self.site.text.contains(self.ctx.ip())
    }

    /// The fault happened in runtime code and is a kind the runtime turns
    /// into a panic or crash report.
    #[inline(always)]
    pub fn is_runtime_fault(&self) -> bool {
        self.in_runtime_text() && self.record.code.is_recognized()
    }

    /// The fault is the runtime's own abort trap.
    #[inline(always)]
    pub fn is_abort(&self) -> bool {
        let adjust = self.ctx.arch().abort_ip_adjust();
        self.ctx.ip().wrapping_sub(adjust) == self.site.abort_pc
    }

    /// Rewrite the context to resume in the panic entry.
    #[inline(always)]
    pub fn redirect(self, task: &Task) -> Redirected {
        redirect_to_panic_entry(task, self.record, self.ctx, &self.site.entries)
    }

    /// Give up on recovery and hand the raw fault to the crash path.
    pub fn escalate(self) -> (&'a ExceptionRecord, &'a mut C) {
        (self.record, self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::context::SyntheticContext;

    fn site() -> FaultSite {
        FaultSite {
            text: ModuleTextRange::new(0x40_0000, 0x4f_ffff).unwrap(),
            abort_pc: 0x40_5000,
            entries: EntryPoints {
                panic_entry: 0x40_9000,
                preempt_entry: 0x40_8000,
            },
        }
    }

    #[test]
    fn test_classifier_requires_text_and_known_code() {
        let site = site();
        let cases = [
            (0x40_1000, ExceptionCode::ACCESS_VIOLATION, true),
            (0x40_1000, ExceptionCode::FLT_UNDERFLOW, true),
            (0x40_1000, ExceptionCode::STACK_OVERFLOW, false),
            (0x40_1000, ExceptionCode(0xE06D_7363), false),
            (0x7ff0_1000, ExceptionCode::ACCESS_VIOLATION, false),
            (0x3f_ffff, ExceptionCode::INT_DIVIDE_BY_ZERO, false),
            (0x4f_ffff, ExceptionCode::INT_DIVIDE_BY_ZERO, true),
        ];
        for (ip, code, expected) in cases {
            let record = ExceptionRecord::new(code, 0, 0);
            let mut ctx = SyntheticContext::new(Arch::X86_64, ip);
            let fault = RestrictedFault::new(&record, &mut ctx, &site);
            assert_eq!(fault.is_runtime_fault(), expected, "{ip:#x} {code:?}");
        }
    }

    #[test]
    fn test_abort_adjusts_ip_per_arch() {
        let site = site();
        let record = ExceptionRecord::new(ExceptionCode::BREAKPOINT, 0, 0);
        let cases = [
            (Arch::X86_64, site.abort_pc + 1, true),
            (Arch::X86_64, site.abort_pc, false),
            (Arch::X86, site.abort_pc + 1, true),
            (Arch::Arm, site.abort_pc + 1, true),
            (Arch::Aarch64, site.abort_pc, true),
            (Arch::Aarch64, site.abort_pc + 1, false),
        ];
        for (arch, ip, expected) in cases {
            let mut ctx = SyntheticContext::new(arch, ip);
            let fault = RestrictedFault::new(&record, &mut ctx, &site);
            assert_eq!(fault.is_abort(), expected, "{arch:?} {ip:#x}");
        }
    }

    #[test]
    fn test_abort_check_does_not_underflow_at_zero() {
        let site = site();
        let record = ExceptionRecord::new(ExceptionCode::BREAKPOINT, 0, 0);
        let mut ctx = SyntheticContext::new(Arch::X86_64, 0);
        assert!(!RestrictedFault::new(&record, &mut ctx, &site).is_abort());
    }

    #[test]
    fn test_escalate_hands_back_untouched_context() {
        let site = site();
        let record = ExceptionRecord::access_violation(0);
        let mut ctx = SyntheticContext::new(Arch::X86_64, 0x40_1000);
        let sp = ctx.sp();
        let (rec, ctx) = RestrictedFault::new(&record, &mut ctx, &site).escalate();
        assert_eq!(rec.code, ExceptionCode::ACCESS_VIOLATION);
        assert_eq!(ctx.ip(), 0x40_1000);
        assert_eq!(ctx.sp(), sp);
    }
}
