//! Several threads reaching the crash path at once.

use std::sync::Barrier;
use std::thread;

use vfault_config::Config;
use vfault_core::sim::{self, BufferConsole, SimOutcome, SimThread, UnwindingProcess};
use vfault_core::{Arch, ExceptionRecord, RegistrationPlan, SyntheticContext};

const THREADS: usize = 8;
const OUT_OF_TEXT: usize = 0x7ff0_1000;

fn unowned_fault(coord: &vfault_core::FaultCoordinator, id: u64) -> SimOutcome {
    let thread = SimThread::user(id);
    let plan = RegistrationPlan::for_arch(Arch::X86_64, true);
    let mut ctx = SyntheticContext::new(Arch::X86_64, OUT_OF_TEXT);
    sim::run_fault(
        coord,
        &thread,
        &plan,
        &ExceptionRecord::access_violation(0x10),
        &mut ctx,
    )
}

#[test]
fn test_late_arrivals_exit_without_printing() {
    let console = BufferConsole::new();
    let coord = sim::coordinator(&Config::default(), UnwindingProcess::new(), console.clone()).unwrap();

    assert_eq!(unowned_fault(&coord, 1), SimOutcome::Exited(2));
    let report = console.contents();
    assert!(report.starts_with("Exception 0xc0000005"));

    let outcomes: Vec<SimOutcome> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let coord = &coord;
                s.spawn(move || unowned_fault(coord, 10 + i as u64))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| *o == SimOutcome::Exited(2)));
    assert_eq!(console.contents(), report);
    assert_eq!(coord.crash_state().late_arrivals(), THREADS);
}

#[test]
fn test_simultaneous_crashes_print_one_report() {
    let console = BufferConsole::new();
    let coord = sim::coordinator(&Config::default(), UnwindingProcess::new(), console.clone()).unwrap();
    let barrier = Barrier::new(THREADS);

    let outcomes: Vec<SimOutcome> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (coord, barrier) = (&coord, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    unowned_fault(coord, 1 + i as u64)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| *o == SimOutcome::Exited(2)));
    assert_eq!(console.contents().matches("Exception 0xc0000005").count(), 1);
    assert_eq!(console.contents().matches("PC=").count(), 1);
    assert_eq!(coord.crash_state().late_arrivals(), THREADS - 1);
}
