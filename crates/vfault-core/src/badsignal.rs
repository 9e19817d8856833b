//! Preformatted message for faults on threads the runtime never set up.
//!
//! Such a thread has no task, so neither the panic path nor the regular
//! crash report can run on it. The message is copied into static storage
//! at startup and written verbatim at fault time.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

pub const BAD_SIGNAL_MSG: &str = "runtime: signal received on thread not created by the runtime.\n";

const CAPACITY: usize = 100;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

pub struct BadSignalBuffer {
    buf: UnsafeCell<[u8; CAPACITY]>,
    len: AtomicUsize,
    state: AtomicU8,
}

// SAFETY: `buf` is written by the single thread that moves `state` from
// EMPTY to WRITING, and only read after `state` is READY.
unsafe impl Sync for BadSignalBuffer {}

impl BadSignalBuffer {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; CAPACITY]),
            len: AtomicUsize::new(0),
            state: AtomicU8::new(EMPTY),
        }
    }

    /// Store `msg`, truncated to the buffer size. Only the first call has
    /// any effect; returns whether this call stored it.
    pub fn set_message(&self, msg: &str) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let bytes = msg.as_bytes();
        let n = bytes.len().min(CAPACITY);
        // SAFETY: this thread holds the WRITING state; no reader looks at
        // the buffer until READY is published below.
        unsafe { (&mut (*self.buf.get()))[..n].copy_from_slice(&bytes[..n]) };
        self.len.store(n, Ordering::Relaxed);
        self.state.store(READY, Ordering::Release);
        true
    }

    /// The stored message, or nothing if startup never set one.
    pub fn message(&self) -> &[u8] {
        if self.state.load(Ordering::Acquire) != READY {
            return &[];
        }
        let n = self.len.load(Ordering::Relaxed);
        // SAFETY: READY means the buffer is never written again.
        unsafe { &(&(*self.buf.get()))[..n] }
    }
}

impl Default for BadSignalBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub static BAD_SIGNAL: BadSignalBuffer = BadSignalBuffer::new();

/// Populate [`BAD_SIGNAL`]. Idempotent.
pub fn set_bad_signal_msg() {
    BAD_SIGNAL.set_message(BAD_SIGNAL_MSG);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_wins() {
        let buf = BadSignalBuffer::new();
        assert!(buf.message().is_empty());
        assert!(buf.set_message("first\n"));
        assert!(!buf.set_message("second\n"));
        assert_eq!(buf.message(), b"first\n");
    }

    #[test]
    fn test_long_message_truncated() {
        let buf = BadSignalBuffer::new();
        let long = "x".repeat(CAPACITY + 20);
        buf.set_message(&long);
        assert_eq!(buf.message().len(), CAPACITY);
    }

    #[test]
    fn test_default_message_fits() {
        assert!(BAD_SIGNAL_MSG.len() <= CAPACITY);
        set_bad_signal_msg();
        set_bad_signal_msg();
        assert_eq!(BAD_SIGNAL.message(), BAD_SIGNAL_MSG.as_bytes());
    }
}
