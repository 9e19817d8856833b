//! Turn a pending fault into a typed panic or a fatal error.
//!
//! Runs after the redirect, on the faulting task's own stack, so ordinary
//! code is fine here.

use crate::exception::ExceptionCode;
use crate::task::{FaultSnapshot, Task};

/// Fault addresses below this are treated as nil dereferences.
pub const NIL_ADDRESS_LIMIT: usize = 0x1000;

/// Recoverable runtime errors raised at the fault site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuntimePanic {
    #[error("runtime error: invalid memory address or nil pointer dereference")]
    NilDereference,
    #[error("runtime error: invalid memory address or nil pointer dereference (addr={addr:#x})")]
    FaultAddress { addr: usize },
    #[error("runtime error: integer divide by zero")]
    DivideByZero,
    #[error("runtime error: integer overflow")]
    Overflow,
    #[error("runtime error: floating point error")]
    FloatingPoint,
}

/// Faults that end the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FatalFault {
    #[error("unexpected signal during runtime execution")]
    UnexpectedSignal,
    #[error("fault")]
    UnexpectedFaultAddress { addr: usize },
    #[error("fault")]
    Fault,
}

/// Consume `task`'s pending fault and decide what it becomes.
pub fn dispatch_pending(task: &Task, can_panic: bool) -> Result<RuntimePanic, FatalFault> {
    classify(task.pending.take(), task.panics_on_fault(), can_panic)
}

pub(crate) fn classify(
    fault: Option<FaultSnapshot>,
    panic_on_fault: bool,
    can_panic: bool,
) -> Result<RuntimePanic, FatalFault> {
    if !can_panic {
        return Err(FatalFault::UnexpectedSignal);
    }
    let Some(fault) = fault else {
        return Err(FatalFault::Fault);
    };

    match fault.code {
        ExceptionCode::ACCESS_VIOLATION => {
            let addr = fault.fault_address();
            if addr < NIL_ADDRESS_LIMIT {
                Ok(RuntimePanic::NilDereference)
            } else if panic_on_fault {
                Ok(RuntimePanic::FaultAddress { addr })
            } else {
                Err(FatalFault::UnexpectedFaultAddress { addr })
            }
        }
        ExceptionCode::INT_DIVIDE_BY_ZERO => Ok(RuntimePanic::DivideByZero),
        ExceptionCode::INT_OVERFLOW => Ok(RuntimePanic::Overflow),
        code if code.is_float_trap() => Ok(RuntimePanic::FloatingPoint),
        _ => Err(FatalFault::Fault),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionRecord;
    use crate::task::TaskKind;

    fn armed(code: ExceptionCode, addr: usize) -> Task {
        let task = Task::new(1, TaskKind::User);
        task.pending
            .record(&ExceptionRecord::new(code, 0, addr), 0x40_1000);
        task
    }

    #[test]
    fn test_low_addresses_are_nil_dereference() {
        for addr in [0, 0x8, NIL_ADDRESS_LIMIT - 1] {
            for panic_on_fault in [false, true] {
                let task = armed(ExceptionCode::ACCESS_VIOLATION, addr);
                task.set_panic_on_fault(panic_on_fault);
                assert_eq!(
                    dispatch_pending(&task, true),
                    Ok(RuntimePanic::NilDereference)
                );
            }
        }
    }

    #[test]
    fn test_wild_address_depends_on_panic_on_fault() {
        let task = armed(ExceptionCode::ACCESS_VIOLATION, NIL_ADDRESS_LIMIT);
        assert_eq!(
            dispatch_pending(&task, true),
            Err(FatalFault::UnexpectedFaultAddress {
                addr: NIL_ADDRESS_LIMIT
            })
        );

        let task = armed(ExceptionCode::ACCESS_VIOLATION, 0x7fff_0000);
        task.set_panic_on_fault(true);
        assert_eq!(
            dispatch_pending(&task, true),
            Ok(RuntimePanic::FaultAddress { addr: 0x7fff_0000 })
        );
    }

    #[test]
    fn test_arithmetic_traps() {
        let cases = [
            (ExceptionCode::INT_DIVIDE_BY_ZERO, RuntimePanic::DivideByZero),
            (ExceptionCode::INT_OVERFLOW, RuntimePanic::Overflow),
            (ExceptionCode::FLT_DENORMAL_OPERAND, RuntimePanic::FloatingPoint),
            (ExceptionCode::FLT_DIVIDE_BY_ZERO, RuntimePanic::FloatingPoint),
            (ExceptionCode::FLT_INEXACT_RESULT, RuntimePanic::FloatingPoint),
            (ExceptionCode::FLT_OVERFLOW, RuntimePanic::FloatingPoint),
            (ExceptionCode::FLT_UNDERFLOW, RuntimePanic::FloatingPoint),
        ];
        for (code, expected) in cases {
            assert_eq!(dispatch_pending(&armed(code, 0), true), Ok(expected));
        }
    }

    #[test]
    fn test_other_codes_are_fatal() {
        for code in [ExceptionCode::BREAKPOINT, ExceptionCode::ILLEGAL_INSTRUCTION] {
            assert_eq!(
                dispatch_pending(&armed(code, 0), true),
                Err(FatalFault::Fault)
            );
        }
    }

    #[test]
    fn test_cannot_panic_is_fatal_and_clears_slot() {
        let task = armed(ExceptionCode::INT_DIVIDE_BY_ZERO, 0);
        assert_eq!(
            dispatch_pending(&task, false),
            Err(FatalFault::UnexpectedSignal)
        );
        assert!(!task.pending.is_armed());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            RuntimePanic::FaultAddress { addr: 0x7fff_0000 }.to_string(),
            "runtime error: invalid memory address or nil pointer dereference (addr=0x7fff0000)"
        );
        assert_eq!(
            RuntimePanic::DivideByZero.to_string(),
            "runtime error: integer divide by zero"
        );
        assert_eq!(
            FatalFault::UnexpectedSignal.to_string(),
            "unexpected signal during runtime execution"
        );
    }
}
