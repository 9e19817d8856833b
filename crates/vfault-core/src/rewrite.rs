//! Redirect a faulting thread into the panic entry point.
//!
//! The thread resumes as if the faulting instruction had called the panic
//! entry, so unwinders see the faulting frame as the caller.

use crate::context::MachineContext;
use crate::exception::ExceptionRecord;
use crate::task::Task;

/// Proof that a context now resumes at the panic entry.
///
/// Only [`redirect_to_panic_entry`] creates one. Past this point the
/// faulting thread may grow its stack and allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Redirected {
    pushed_frame: bool,
}

impl Redirected {
    /// Whether a synthetic return frame was pushed.
    pub fn pushed_frame(&self) -> bool {
        self.pushed_frame
    }
}

/// Entry points the rewrite can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoints {
    /// Where the redirected thread resumes.
    pub panic_entry: usize,
    /// Async preemption trampoline. A fault reported at exactly this address
    /// already had a call frame pushed for it.
    pub preempt_entry: usize,
}

/// Store the fault in the task's pending slot and make `ctx` resume at the
/// panic entry.
///
/// A return frame is pushed unless the faulting ip is 0 (a call through a
/// nil function value; pushing would hide the caller) or the preemption
/// trampoline entry.
#[inline(always)]
pub fn redirect_to_panic_entry<C>(
    task: &Task,
    record: &ExceptionRecord,
    ctx: &mut C,
    entries: &EntryPoints,
) -> Redirected
where
    C: MachineContext + ?Sized,
{
    let ip = ctx.ip();
    task.pending.record(record, ip);

    let push = ip != 0 && ip != entries.preempt_entry;
    if push {
        let arch = ctx.arch();
        let sp = ctx.sp() - arch.stack_align();
        ctx.set_sp(sp);
        if arch.uses_link_register() {
            let lr = ctx.lr();
            // SAFETY: `sp` is one aligned slot below the faulting thread's
            // live stack pointer.
            unsafe { ctx.write_stack_word(sp, lr) };
            ctx.set_lr(ip);
        } else {
            // SAFETY: as above.
            unsafe { ctx.write_stack_word(sp, ip) };
        }
    }
    ctx.set_ip(entries.panic_entry);

    Redirected { pushed_frame: push }
}
