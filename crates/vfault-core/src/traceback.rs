//! Stack trace printing, consumed as a black box.

use crate::console::Console;
use crate::task::{Task, TaskKind};

/// Prints stack traces on the crash path. Implementations write through
/// the given console and must not allocate.
pub trait Traceback: Send + Sync {
    /// Trace of the task that faulted, starting at the trap registers.
    fn traceback_trap(&self, ip: usize, sp: usize, lr: usize, task: &Task, console: &dyn Console);

    /// Traces of every other live task.
    fn traceback_others(&self, current: &Task, console: &dyn Console);
}

/// Prints only the trap frame of the faulting task.
///
/// Used where no symbolizer is wired in: the simulator and early startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameTraceback;

impl Traceback for FrameTraceback {
    fn traceback_trap(&self, ip: usize, sp: usize, lr: usize, task: &Task, console: &dyn Console) {
        let state = match task.kind() {
            TaskKind::System => "system",
            TaskKind::User | TaskKind::Bootstrap => "running",
        };
        writeln!(console, "task {} [{}]:", task.id(), state);
        writeln!(console, "\tpc={:#x} sp={:#x} lr={:#x}\n", ip, sp, lr);
    }

    fn traceback_others(&self, _current: &Task, _console: &dyn Console) {}
}
