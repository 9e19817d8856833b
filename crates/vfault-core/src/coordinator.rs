//! The three OS-facing handlers and the code that runs after them.
//!
//! Handler entry points are called in-line on the faulting thread, in the
//! order the OS walks its handler lists:
//!
//! | handler | sees | outcome |
//! |---------|------|---------|
//! | exception | every fault, first | redirect into the panic entry, or crash |
//! | first continue | after any handler resumed the thread | stop the search for runtime faults |
//! | last continue | whatever first continue let through | crash report |
//!
//! Everything up to [`RestrictedFault::redirect`] stays inside the
//! restricted zone: no allocation, no locks, no `tracing`. The crash paths
//! write through a [`Console`] with stack buffers only.

use std::sync::atomic::{AtomicBool, Ordering};

use vfault_config::{BuildMode, Config, TracebackLevel};

use crate::badsignal::{set_bad_signal_msg, BAD_SIGNAL};
use crate::chain::{ChainEntry, HandlerChain};
use crate::console::{Console, ConsoleWriter, StderrConsole};
use crate::context::MachineContext;
use crate::crash::{CrashState, CRASH_EXIT_CODE};
use crate::dispatch::{classify, FatalFault};
use crate::exception::ExceptionRecord;
use crate::module::ModuleTextRange;
use crate::policy::defer_to_cpu_feature_probe;
use crate::process::{NativeProcess, ProcessControl};
use crate::registration::RegistrationPlan;
use crate::restricted::{FaultSite, RestrictedFault};
use crate::rewrite::{EntryPoints, Redirected};
use crate::task::{FaultSnapshot, Machine, Task, TaskHost, ThreadBinding};
use crate::traceback::{FrameTraceback, Traceback};
use crate::{FaultError, Result};

/// Handler return value: resume the thread with its (possibly rewritten)
/// context.
pub const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;
/// Handler return value: pass the fault to the next handler.
pub const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

/// What a handler decided about one fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The context was rewritten; resume it.
    ClaimAndResume(Redirected),
    /// Already handled by an earlier handler; stop the continue-handler walk.
    ClaimAndStopSearch,
    /// Not ours.
    Decline,
}

impl Disposition {
    pub const fn to_os(self) -> i32 {
        match self {
            Disposition::ClaimAndResume(_) | Disposition::ClaimAndStopSearch => {
                EXCEPTION_CONTINUE_EXECUTION
            }
            Disposition::Decline => EXCEPTION_CONTINUE_SEARCH,
        }
    }

    pub const fn is_claim(self) -> bool {
        !matches!(self, Disposition::Decline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Exception,
    FirstContinue,
    LastContinue,
}

impl HandlerKind {
    pub const fn name(self) -> &'static str {
        match self {
            HandlerKind::Exception => "exception",
            HandlerKind::FirstContinue => "first-continue",
            HandlerKind::LastContinue => "last-continue",
        }
    }
}

/// Settings that decide how a fault is reported. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashPolicy {
    pub traceback: TracebackLevel,
    pub build_mode: BuildMode,
    /// The process runs foreign code through the runtime's call bridge.
    pub foreign_interop: bool,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CrashPolicy {
    fn from(config: &Config) -> Self {
        Self {
            traceback: config.traceback.level,
            build_mode: config.runtime.build_mode,
            foreign_interop: config.runtime.foreign_interop,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct CoordinatorBuilder {
    text: ModuleTextRange,
    abort_pc: usize,
    entries: EntryPoints,
    policy: CrashPolicy,
    wer_passthrough: bool,
    traceback: Box<dyn Traceback>,
    process: Box<dyn ProcessControl>,
    console: Box<dyn Console>,
}

impl CoordinatorBuilder {
    pub fn abort_pc(mut self, pc: usize) -> Self {
        self.abort_pc = pc;
        self
    }

    pub fn panic_entry(mut self, pc: usize) -> Self {
        self.entries.panic_entry = pc;
        self
    }

    pub fn preempt_entry(mut self, pc: usize) -> Self {
        self.entries.preempt_entry = pc;
        self
    }

    /// Take traceback level, build mode and test-mode flags from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.policy = CrashPolicy::from(config);
        self.wer_passthrough = config.testing.wer_passthrough;
        self
    }

    pub fn policy(mut self, policy: CrashPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn traceback(mut self, traceback: impl Traceback + 'static) -> Self {
        self.traceback = Box::new(traceback);
        self
    }

    pub fn process(mut self, process: impl ProcessControl + 'static) -> Self {
        self.process = Box::new(process);
        self
    }

    pub fn console(mut self, console: impl Console + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn build(self) -> Result<FaultCoordinator> {
        if self.entries.panic_entry == 0 {
            return Err(FaultError::MissingPanicEntry);
        }
        set_bad_signal_msg();

        vfault_config::log_install_debug!(
            "Fault coordinator ready",
            text_start = self.text.start(),
            text_end = self.text.end(),
            traceback = self.policy.traceback.as_str(),
        );

        Ok(FaultCoordinator {
            site: FaultSite {
                text: self.text,
                abort_pc: self.abort_pc,
                entries: self.entries,
            },
            policy: self.policy,
            wer_passthrough: AtomicBool::new(self.wer_passthrough),
            crash: CrashState::new(),
            traceback: self.traceback,
            process: self.process,
            console: self.console,
        })
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Process-wide owner of the fault-handling state.
///
/// Built once at startup. The crash latch inside is the only state that
/// changes afterwards, apart from the test-mode pass-through flag.
pub struct FaultCoordinator {
    site: FaultSite,
    policy: CrashPolicy,
    wer_passthrough: AtomicBool,
    crash: CrashState,
    traceback: Box<dyn Traceback>,
    process: Box<dyn ProcessControl>,
    console: Box<dyn Console>,
}

impl FaultCoordinator {
    pub fn builder(text: ModuleTextRange) -> CoordinatorBuilder {
        CoordinatorBuilder {
            text,
            abort_pc: 0,
            entries: EntryPoints {
                panic_entry: 0,
                preempt_entry: 0,
            },
            policy: CrashPolicy::default(),
            wer_passthrough: false,
            traceback: Box::new(FrameTraceback),
            process: Box::new(NativeProcess),
            console: Box::new(StderrConsole),
        }
    }

    pub fn site(&self) -> &FaultSite {
        &self.site
    }

    pub fn policy(&self) -> &CrashPolicy {
        &self.policy
    }

    pub fn crash_state(&self) -> &CrashState {
        &self.crash
    }

    /// Let unhandled faults reach the OS default handler. Used by tests
    /// that exercise the platform's own error reporting.
    pub fn set_wer_passthrough(&self, value: bool) {
        self.wer_passthrough.store(value, Ordering::Relaxed);
    }

    pub fn wer_passthrough(&self) -> bool {
        self.wer_passthrough.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Handler entry points
    // ------------------------------------------------------------------------

    pub fn handle<C>(
        &self,
        kind: HandlerKind,
        host: &dyn TaskHost,
        record: &ExceptionRecord,
        ctx: &mut C,
    ) -> Disposition
    where
        C: MachineContext + ?Sized,
    {
        match kind {
            HandlerKind::Exception => self.exception_handler(host, record, ctx),
            HandlerKind::FirstContinue => self.first_continue_handler(record, ctx),
            HandlerKind::LastContinue => self.last_continue_handler(host, record, ctx),
        }
    }

    /// First handler to see a fault. Redirects recoverable runtime faults
    /// into the panic entry and crashes on the unrecoverable ones.
    pub fn exception_handler<C>(
        &self,
        host: &dyn TaskHost,
        record: &ExceptionRecord,
        ctx: &mut C,
    ) -> Disposition
    where
        C: MachineContext + ?Sized,
    {
        let fault = RestrictedFault::new(record, ctx, &self.site);
        if !fault.is_runtime_fault() {
            return Disposition::Decline;
        }

        let (machine, task, user) = match host.binding() {
            ThreadBinding::Bound {
                machine,
                task,
                user,
            } if !task.is_uninitialized_bootstrap() => (machine, task, user),
            _ => self.bad_signal(),
        };

        // Growing the stack here could fault again; an abort is terminal.
        if task.must_not_grow_stack() || fault.is_abort() {
            let (record, ctx) = fault.escalate();
            self.crash_report(machine, task, user, record, ctx);
        }

        Disposition::ClaimAndResume(fault.redirect(task))
    }

    /// The OS keeps walking continue handlers even after the exception
    /// handler resumed the thread. Stop it for runtime faults so the last
    /// handler never sees them.
    pub fn first_continue_handler<C>(&self, record: &ExceptionRecord, ctx: &mut C) -> Disposition
    where
        C: MachineContext + ?Sized,
    {
        if RestrictedFault::new(record, ctx, &self.site).is_runtime_fault() {
            Disposition::ClaimAndStopSearch
        } else {
            Disposition::Decline
        }
    }

    /// Reached when no one could handle the fault. Crashes unless the
    /// process belongs to someone else.
    pub fn last_continue_handler<C>(
        &self,
        host: &dyn TaskHost,
        record: &ExceptionRecord,
        ctx: &mut C,
    ) -> Disposition
    where
        C: MachineContext + ?Sized,
    {
        // Loaded into a foreign host: its crash, not ours.
        if self.policy.build_mode.is_embedded() {
            return Disposition::Decline;
        }
        if self.wer_passthrough() {
            return Disposition::Decline;
        }
        if defer_to_cpu_feature_probe(ctx.arch(), record.code, ctx.ip(), &self.site.text) {
            return Disposition::Decline;
        }

        match host.binding() {
            ThreadBinding::Bound {
                machine,
                task,
                user,
            } if !task.is_uninitialized_bootstrap() => {
                self.crash_report(machine, task, user, record, ctx)
            }
            _ => self.bad_signal(),
        }
    }

    // ------------------------------------------------------------------------
    // Terminal paths
    // ------------------------------------------------------------------------

    /// Print the fault and end the process. Only the first caller prints;
    /// everyone after it exits immediately with the same status.
    pub fn crash_report<C>(
        &self,
        machine: &Machine,
        task: &Task,
        user: Option<&Task>,
        record: &ExceptionRecord,
        ctx: &C,
    ) -> !
    where
        C: MachineContext + ?Sized,
    {
        if !self.crash.try_begin() {
            // Report already printed, or being printed.
            self.process.exit(CRASH_EXIT_CODE);
        }

        // The fault may be an overflow of this very stack.
        machine.system().unbound_stack();

        let console: &dyn Console = &*self.console;
        let ip = ctx.ip();
        writeln!(
            console,
            "Exception {:#x} {:#x} {:#x} {:#x}",
            record.code.raw(),
            record.params[0],
            record.params[1],
            ip
        );
        writeln!(console, "PC={:#x}", ip);

        let mut culprit = task;
        if machine.in_foreign_call() && machine.is_system(task) {
            if let Some(user) = user {
                if self.policy.foreign_interop {
                    console.write_str("signal arrived during external code execution\n");
                }
                culprit = user;
            }
        }
        console.write_str("\n");

        machine.begin_throw(culprit.id());

        let level = self.policy.traceback;
        if level.level() > 0 {
            self.traceback
                .traceback_trap(ip, ctx.sp(), ctx.lr(), culprit, console);
            if level.show_all() {
                self.traceback.traceback_others(culprit, console);
            }
            let _ = ctx.dump_registers(&mut ConsoleWriter(console));
        }

        if level.crash_dump() {
            self.process.crash();
        }
        self.process.exit(CRASH_EXIT_CODE)
    }

    /// Fault on a thread the runtime knows nothing about.
    pub fn bad_signal(&self) -> ! {
        self.console.write_bytes(BAD_SIGNAL.message());
        self.process.exit(CRASH_EXIT_CODE)
    }

    /// Body of the panic entry. Runs on the faulting task after the OS has
    /// resumed it at the redirected address.
    pub fn sigpanic(&self, host: &dyn TaskHost) -> ! {
        let ThreadBinding::Bound { machine, task, .. } = host.binding() else {
            self.bad_signal()
        };

        let fault = task.pending.take();
        match classify(fault, task.panics_on_fault(), host.can_panic(task)) {
            Ok(panic) => {
                vfault_config::log_fault_debug!(
                    "Raising runtime panic",
                    task = task.id(),
                    pc = fault.map(|f| f.pc).unwrap_or(0),
                    panic = tracing::field::display(panic),
                );
                std::panic::panic_any(panic)
            }
            Err(fatal) => self.throw(machine, task, fatal, fault),
        }
    }

    /// Fatal runtime error raised after the redirect.
    pub fn throw(
        &self,
        machine: &Machine,
        task: &Task,
        fatal: FatalFault,
        fault: Option<FaultSnapshot>,
    ) -> ! {
        if !self.crash.try_begin() {
            self.process.exit(CRASH_EXIT_CODE);
        }

        let console: &dyn Console = &*self.console;
        if let FatalFault::UnexpectedFaultAddress { addr } = fatal {
            writeln!(console, "unexpected fault address {:#x}", addr);
        }
        writeln!(console, "fatal error: {}", fatal);
        if let Some(fault) = fault {
            writeln!(
                console,
                "[signal {:#x} code={:#x} addr={:#x} pc={:#x}]",
                fault.code.raw(),
                fault.params[0],
                fault.params[1],
                fault.pc
            );
        }

        machine.begin_throw(task.id());

        let level = self.policy.traceback;
        if level.level() > 0 {
            console.write_str("\n");
            let pc = fault.map(|f| f.pc).unwrap_or(0);
            self.traceback.traceback_trap(pc, 0, 0, task, console);
            if level.show_all() {
                self.traceback.traceback_others(task, console);
            }
        }

        if level.crash_dump() {
            self.process.crash();
        }
        self.process.exit(CRASH_EXIT_CODE)
    }

    // ------------------------------------------------------------------------
    // Chain
    // ------------------------------------------------------------------------

    /// The handler chain as registered on `plan`, bound to `host`.
    pub fn chain<'a, C>(&'a self, host: &'a dyn TaskHost, plan: &RegistrationPlan) -> HandlerChain<'a, C>
    where
        C: MachineContext + ?Sized,
    {
        let mut chain = HandlerChain::new();
        for step in plan.steps() {
            let kind = step.kind;
            chain.push(ChainEntry::new(
                kind.name(),
                step.via.phase(),
                step.via.position(),
                move |record: &ExceptionRecord, ctx: &mut C| self.handle(kind, host, record, ctx),
            ));
        }
        chain
    }
}
