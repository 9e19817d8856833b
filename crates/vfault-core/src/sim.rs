//! In-process simulation of the fault path.
//!
//! Everything here stands in for a piece of the real process: a thread
//! binding, process exit, stderr. Faults are delivered through the same
//! coordinator and handler chain the OS would call, so the simulator and the
//! test suites exercise exactly the production decision logic.
//!
//! Process exit is modelled by unwinding with a [`ProcessExit`] payload and
//! catching it at the top of [`run_fault`].

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vfault_config::Config;

use crate::chain::ChainOutcome;
use crate::console::Console;
use crate::context::MachineContext;
use crate::coordinator::FaultCoordinator;
use crate::dispatch::RuntimePanic;
use crate::exception::ExceptionRecord;
use crate::module::ModuleTextRange;
use crate::process::ProcessControl;
use crate::registration::RegistrationPlan;
use crate::task::{Machine, Task, TaskHost, TaskKind, ThreadBinding};
use crate::Result;

// Layout of the simulated image.
pub const SIM_TEXT_START: usize = 0x0040_0000;
pub const SIM_TEXT_END: usize = 0x004f_ffff;
pub const SIM_ABORT_PC: usize = 0x0040_5000;
pub const SIM_PREEMPT_ENTRY: usize = 0x0040_8000;
pub const SIM_PANIC_ENTRY: usize = 0x0040_9000;

const SIM_SYSTEM_STACK: (usize, usize) = (0x0080_0000, 0x0081_0000);

/// Coordinator for the simulated image, configured from `config`.
pub fn coordinator(
    config: &Config,
    process: impl ProcessControl + 'static,
    console: impl Console + 'static,
) -> Result<FaultCoordinator> {
    FaultCoordinator::builder(ModuleTextRange::new(SIM_TEXT_START, SIM_TEXT_END)?)
        .abort_pc(SIM_ABORT_PC)
        .panic_entry(SIM_PANIC_ENTRY)
        .preempt_entry(SIM_PREEMPT_ENTRY)
        .config(config)
        .process(process)
        .console(console)
        .build()
}

// ============================================================================
// Thread binding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Running {
    Foreign,
    User,
    System,
}

/// One simulated native thread.
#[derive(Debug)]
pub struct SimThread {
    machine: Machine,
    user: Task,
    running: Running,
    can_panic: bool,
}

impl SimThread {
    /// A runtime thread running user task `id`.
    pub fn user(id: u64) -> Self {
        Self::with_task(Task::new(id, TaskKind::User))
    }

    /// The runtime's first thread before the scheduler finished setup.
    pub fn bootstrap() -> Self {
        Self::with_task(Task::new(1, TaskKind::Bootstrap))
    }

    /// A thread created outside the runtime.
    pub fn foreign() -> Self {
        Self {
            running: Running::Foreign,
            ..Self::user(1)
        }
    }

    fn with_task(user: Task) -> Self {
        let (lo, hi) = SIM_SYSTEM_STACK;
        Self {
            machine: Machine::new(Task::new(0, TaskKind::System).with_stack(lo, hi)),
            user,
            running: Running::User,
            can_panic: true,
        }
    }

    /// Fault on the machine's system stack instead of the user task's.
    pub fn on_system_stack(mut self) -> Self {
        self.running = Running::System;
        self
    }

    /// The user task has called out to foreign code.
    pub fn in_foreign_call(self) -> Self {
        self.machine.set_in_foreign_call(true);
        self
    }

    /// Panics are not allowed at the fault site.
    pub fn cannot_panic(mut self) -> Self {
        self.can_panic = false;
        self
    }

    pub fn task(&self) -> &Task {
        &self.user
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }
}

impl TaskHost for SimThread {
    fn binding(&self) -> ThreadBinding<'_> {
        let task = match self.running {
            Running::Foreign => return ThreadBinding::Foreign,
            Running::User => &self.user,
            Running::System => self.machine.system(),
        };
        ThreadBinding::Bound {
            machine: &self.machine,
            task,
            user: Some(&self.user),
        }
    }

    fn can_panic(&self, _task: &Task) -> bool {
        self.can_panic
    }
}

// ============================================================================
// Process and console
// ============================================================================

/// Unwind payload standing in for process termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit(pub i32);

/// Exits by unwinding so the caller can observe the status.
#[derive(Debug, Clone, Default)]
pub struct UnwindingProcess {
    crashes: Arc<AtomicUsize>,
}

impl UnwindingProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crash_requests(&self) -> usize {
        self.crashes.load(Ordering::Relaxed)
    }
}

impl ProcessControl for UnwindingProcess {
    fn exit(&self, code: i32) -> ! {
        resume_unwind(Box::new(ProcessExit(code)))
    }

    fn crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-memory console. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferConsole {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Console for BufferConsole {
    fn write_bytes(&self, bytes: &[u8]) {
        self.buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(bytes);
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Where a simulated fault ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    /// Redirected and raised as a typed panic on the faulting task.
    Panicked(RuntimePanic),
    /// The fault layer ended the process.
    Exited(i32),
    /// A non-runtime handler resumed the thread.
    Resumed,
    /// Every handler declined.
    OsDefault,
}

impl SimOutcome {
    /// Status the `vfault simulate` command exits with.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimOutcome::Panicked(_) | SimOutcome::Resumed => 0,
            SimOutcome::Exited(code) => *code,
            SimOutcome::OsDefault => 3,
        }
    }
}

/// Deliver `record` through the registered chain and, if the thread was
/// redirected, run the panic entry as the resumed thread would.
///
/// `coordinator` must have been built with an [`UnwindingProcess`].
pub fn run_fault<C>(
    coordinator: &FaultCoordinator,
    host: &dyn TaskHost,
    plan: &RegistrationPlan,
    record: &ExceptionRecord,
    ctx: &mut C,
) -> SimOutcome
where
    C: MachineContext + ?Sized,
{
    let result = catch_unwind(AssertUnwindSafe(|| {
        let chain = coordinator.chain(host, plan);
        match chain.deliver(record, ctx).outcome {
            ChainOutcome::Resumed {
                redirected: Some(_),
            } => coordinator.sigpanic(host),
            ChainOutcome::Resumed { redirected: None } => SimOutcome::Resumed,
            ChainOutcome::OsDefault => SimOutcome::OsDefault,
        }
    }));

    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            if let Some(exit) = payload.downcast_ref::<ProcessExit>() {
                return SimOutcome::Exited(exit.0);
            }
            match payload.downcast::<RuntimePanic>() {
                Ok(panic) => SimOutcome::Panicked(*panic),
                Err(other) => resume_unwind(other),
            }
        }
    }
}
