//! Task and machine records as seen by the fault layer.
//!
//! The scheduler owns these objects. This layer only reads the flags it
//! needs and writes the pending-fault slot and stack-guard words. Every
//! field is an atomic so a record can be shared with the scheduler without
//! a lock; the fault-path fields are still only ever touched by the thread
//! the task is running on.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::exception::{ExceptionCode, ExceptionRecord};

/// Bytes kept free below a stack guard for runtime-internal frames.
pub const STACK_GUARD: usize = 928;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Scheduler stack of a native thread.
    System,
    /// Ordinary logical task.
    User,
    /// The task the runtime starts on, before scheduler setup completes.
    Bootstrap,
}

// ============================================================================
// Pending fault slot
// ============================================================================

/// Values captured at fault time and consumed by the panic dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub code: ExceptionCode,
    pub params: [usize; 2],
    pub pc: usize,
}

impl FaultSnapshot {
    pub const fn fault_address(&self) -> usize {
        self.params[1]
    }
}

/// Single-writer, single-reader hand-off between the exception handler and
/// the panic entry point on the same thread.
///
/// The redirected resume cannot carry arguments, so the fault travels here.
#[derive(Debug, Default)]
pub struct PendingFault {
    code: AtomicU32,
    param0: AtomicUsize,
    param1: AtomicUsize,
    pc: AtomicUsize,
    armed: AtomicBool,
    consumed: AtomicBool,
}

impl PendingFault {
    /// Fixed-size stores only; safe to call before the stack may grow.
    #[inline(always)]
    pub fn record(&self, record: &ExceptionRecord, pc: usize) {
        self.code.store(record.code.raw(), Ordering::Relaxed);
        self.param0.store(record.params[0], Ordering::Relaxed);
        self.param1.store(record.params[1], Ordering::Relaxed);
        self.pc.store(pc, Ordering::Relaxed);
        self.consumed.store(false, Ordering::Relaxed);
        self.armed.store(true, Ordering::Release);
    }

    /// Consume the slot. A second read without a fresh write is a bug in
    /// the caller and trips a debug assertion.
    pub fn take(&self) -> Option<FaultSnapshot> {
        if !self.armed.swap(false, Ordering::Acquire) {
            debug_assert!(
                !self.consumed.load(Ordering::Relaxed),
                "pending fault consumed twice without a new fault"
            );
            return None;
        }
        self.consumed.store(true, Ordering::Relaxed);
        Some(FaultSnapshot {
            code: ExceptionCode(self.code.load(Ordering::Relaxed)),
            params: [
                self.param0.load(Ordering::Relaxed),
                self.param1.load(Ordering::Relaxed),
            ],
            pc: self.pc.load(Ordering::Relaxed),
        })
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Stack bounds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    pub lo: usize,
    pub hi: usize,
    pub guard0: usize,
    pub guard1: usize,
}

#[derive(Debug, Default)]
struct AtomicStackBounds {
    lo: AtomicUsize,
    hi: AtomicUsize,
    guard0: AtomicUsize,
    guard1: AtomicUsize,
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug)]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    initialized: AtomicBool,
    /// Set while the task is in runtime code that must not grow its stack.
    throwsplit: AtomicBool,
    /// Wild-address faults become address-carrying panics instead of fatal.
    panic_on_fault: AtomicBool,
    stack: AtomicStackBounds,
    pub pending: PendingFault,
}

impl Task {
    pub fn new(id: TaskId, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            initialized: AtomicBool::new(kind != TaskKind::Bootstrap),
            throwsplit: AtomicBool::new(false),
            panic_on_fault: AtomicBool::new(false),
            stack: AtomicStackBounds::default(),
            pending: PendingFault::default(),
        }
    }

    pub fn with_stack(self, lo: usize, hi: usize) -> Self {
        self.stack.lo.store(lo, Ordering::Relaxed);
        self.stack.hi.store(hi, Ordering::Relaxed);
        self.stack.guard0.store(lo + STACK_GUARD, Ordering::Relaxed);
        self.stack.guard1.store(lo + STACK_GUARD, Ordering::Relaxed);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The bootstrap task before the scheduler has finished setting it up.
    /// Its bookkeeping cannot be trusted, so faults on it are foreign.
    pub fn is_uninitialized_bootstrap(&self) -> bool {
        self.kind == TaskKind::Bootstrap && !self.initialized.load(Ordering::Acquire)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn must_not_grow_stack(&self) -> bool {
        self.throwsplit.load(Ordering::Relaxed)
    }

    pub fn set_must_not_grow_stack(&self, value: bool) {
        self.throwsplit.store(value, Ordering::Relaxed);
    }

    pub fn panics_on_fault(&self) -> bool {
        self.panic_on_fault.load(Ordering::Relaxed)
    }

    pub fn set_panic_on_fault(&self, value: bool) {
        self.panic_on_fault.store(value, Ordering::Relaxed);
    }

    pub fn stack_bounds(&self) -> StackBounds {
        StackBounds {
            lo: self.stack.lo.load(Ordering::Relaxed),
            hi: self.stack.hi.load(Ordering::Relaxed),
            guard0: self.stack.guard0.load(Ordering::Relaxed),
            guard1: self.stack.guard1.load(Ordering::Relaxed),
        }
    }

    /// Drop the lower stack bound so the crash reporter can print from an
    /// exhausted system stack. A real overflow past this point is trapped by
    /// the OS.
    pub fn unbound_stack(&self) {
        self.stack.lo.store(0, Ordering::Relaxed);
        self.stack.guard0.store(STACK_GUARD, Ordering::Relaxed);
        self.stack.guard1.store(STACK_GUARD, Ordering::Relaxed);
    }
}

// ============================================================================
// Machine
// ============================================================================

/// Why the machine is going down, once it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowKind {
    None,
    Runtime,
}

/// Per-native-thread record.
#[derive(Debug)]
pub struct Machine {
    system: Task,
    in_foreign_call: AtomicBool,
    throwing: AtomicBool,
    caught_task: AtomicU64,
}

impl Machine {
    pub fn new(system: Task) -> Self {
        Self {
            system,
            in_foreign_call: AtomicBool::new(false),
            throwing: AtomicBool::new(false),
            caught_task: AtomicU64::new(0),
        }
    }

    pub fn system(&self) -> &Task {
        &self.system
    }

    pub fn is_system(&self, task: &Task) -> bool {
        std::ptr::eq(task, &self.system)
    }

    /// The thread is executing non-runtime code on behalf of a user task.
    pub fn in_foreign_call(&self) -> bool {
        self.in_foreign_call.load(Ordering::Relaxed)
    }

    pub fn set_in_foreign_call(&self, value: bool) {
        self.in_foreign_call.store(value, Ordering::Relaxed);
    }

    pub fn throwing(&self) -> ThrowKind {
        if self.throwing.load(Ordering::Relaxed) {
            ThrowKind::Runtime
        } else {
            ThrowKind::None
        }
    }

    /// Mark the machine as crashing and remember which task took the blame.
    pub fn begin_throw(&self, caught: TaskId) {
        self.throwing.store(true, Ordering::Relaxed);
        self.caught_task.store(caught, Ordering::Relaxed);
    }

    pub fn caught_task(&self) -> Option<TaskId> {
        match self.throwing() {
            ThrowKind::Runtime => Some(self.caught_task.load(Ordering::Relaxed)),
            ThrowKind::None => None,
        }
    }
}

// ============================================================================
// Host interface
// ============================================================================

/// What the faulting thread is to the runtime.
#[derive(Debug, Clone, Copy)]
pub enum ThreadBinding<'a> {
    /// No runtime bookkeeping for this thread.
    Foreign,
    Bound {
        machine: &'a Machine,
        /// Task whose stack the fault happened on. May be the machine's
        /// system task.
        task: &'a Task,
        /// User task currently scheduled on the machine, if any.
        user: Option<&'a Task>,
    },
}

/// Scheduler hooks consumed by the fault layer.
pub trait TaskHost {
    /// Binding of the calling thread. Must not allocate or lock.
    fn binding(&self) -> ThreadBinding<'_>;

    /// Whether a typed panic can be raised on `task` right now.
    fn can_panic(&self, task: &Task) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_fault_consumed_once() {
        let task = Task::new(1, TaskKind::User);
        task.pending
            .record(&ExceptionRecord::access_violation(0x10), 0x40_1000);
        assert!(task.pending.is_armed());

        let snap = task.pending.take().unwrap();
        assert_eq!(snap.code, ExceptionCode::ACCESS_VIOLATION);
        assert_eq!(snap.fault_address(), 0x10);
        assert_eq!(snap.pc, 0x40_1000);
        assert!(!task.pending.is_armed());
    }

    #[test]
    fn test_never_written_slot_reads_empty() {
        let task = Task::new(1, TaskKind::User);
        assert_eq!(task.pending.take(), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "consumed twice")]
    fn test_double_take_asserts() {
        let task = Task::new(1, TaskKind::User);
        task.pending
            .record(&ExceptionRecord::access_violation(0), 0x40_1000);
        let _ = task.pending.take();
        let _ = task.pending.take();
    }

    #[test]
    fn test_rewrite_rearms_slot() {
        let task = Task::new(1, TaskKind::User);
        for addr in [0x1usize, 0x2] {
            task.pending
                .record(&ExceptionRecord::access_violation(addr), 0x40_1000);
            assert_eq!(task.pending.take().unwrap().fault_address(), addr);
        }
    }

    #[test]
    fn test_bootstrap_starts_uninitialized() {
        let boot = Task::new(0, TaskKind::Bootstrap);
        assert!(boot.is_uninitialized_bootstrap());
        boot.mark_initialized();
        assert!(!boot.is_uninitialized_bootstrap());
        assert!(!Task::new(1, TaskKind::User).is_uninitialized_bootstrap());
    }

    #[test]
    fn test_unbound_stack_resets_guards() {
        let task = Task::new(0, TaskKind::System).with_stack(0x10_0000, 0x11_0000);
        assert_eq!(task.stack_bounds().guard0, 0x10_0000 + STACK_GUARD);

        task.unbound_stack();
        let bounds = task.stack_bounds();
        assert_eq!(bounds.lo, 0);
        assert_eq!(bounds.guard0, STACK_GUARD);
        assert_eq!(bounds.guard1, STACK_GUARD);
        assert_eq!(bounds.hi, 0x11_0000);
    }

    #[test]
    fn test_machine_identifies_system_task() {
        let machine = Machine::new(Task::new(0, TaskKind::System));
        let user = Task::new(7, TaskKind::User);
        assert!(machine.is_system(machine.system()));
        assert!(!machine.is_system(&user));

        assert_eq!(machine.caught_task(), None);
        machine.begin_throw(user.id());
        assert_eq!(machine.throwing(), ThrowKind::Runtime);
        assert_eq!(machine.caught_task(), Some(7));
    }
}
