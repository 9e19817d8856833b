//! Process-wide crash latch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Exit status of every path that ends the process from the fault layer.
pub const CRASH_EXIT_CODE: i32 = 2;

/// Unset until the first thread starts a crash report, then set forever.
#[derive(Debug, Default)]
pub struct CrashState {
    in_progress: AtomicBool,
    /// Threads that arrived after the latch was taken.
    late_arrivals: AtomicUsize,
}

impl CrashState {
    pub const fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            late_arrivals: AtomicUsize::new(0),
        }
    }

    /// Take the latch. Exactly one caller ever gets `true`.
    #[inline]
    pub fn try_begin(&self) -> bool {
        let won = self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !won {
            self.late_arrivals.fetch_add(1, Ordering::Relaxed);
        }
        won
    }

    pub fn is_crashing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn late_arrivals(&self) -> usize {
        self.late_arrivals.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_latch_is_one_way() {
        let state = CrashState::new();
        assert!(!state.is_crashing());
        assert!(state.try_begin());
        assert!(state.is_crashing());
        assert!(!state.try_begin());
        assert!(state.is_crashing());
        assert_eq!(state.late_arrivals(), 1);
    }

    #[test]
    fn test_single_winner_under_contention() {
        let state = Arc::new(CrashState::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.try_begin())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(state.late_arrivals(), 15);
    }
}
