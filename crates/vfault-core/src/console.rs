//! Allocation-free output for the crash path.
//!
//! `tracing` may allocate and take locks, so nothing that runs between a
//! fault and process exit may use it. Crash output is formatted into a
//! fixed stack buffer and handed to the raw stderr descriptor instead.

use std::fmt;

/// Sink for crash-path output.
pub trait Console: Send + Sync {
    /// Write raw bytes. Errors are swallowed; there is nobody to report to.
    fn write_bytes(&self, bytes: &[u8]);

    fn write_str(&self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Format into a stack buffer, then write once.
    fn write_fmt(&self, args: fmt::Arguments<'_>) {
        let mut buf = [0u8; 512];
        let mut writer = StackWriter::new(&mut buf);
        let _ = fmt::Write::write_fmt(&mut writer, args);
        self.write_bytes(writer.as_bytes());
    }
}

/// The process's standard error, written without buffering.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrConsole;

impl Console for StderrConsole {
    #[cfg(unix)]
    fn write_bytes(&self, bytes: &[u8]) {
        unsafe {
            libc::write(2, bytes.as_ptr() as *const libc::c_void, bytes.len());
        }
    }

    #[cfg(not(unix))]
    fn write_bytes(&self, bytes: &[u8]) {
        use std::io::Write;
        // Stderr is unbuffered; this goes straight to the handle.
        let _ = std::io::stderr().write_all(bytes);
    }
}

/// Fixed-capacity `fmt::Write` over a borrowed buffer. Output past the end
/// is truncated.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn is_full(&self) -> bool {
        self.pos == self.buf.len()
    }
}

impl<'a> fmt::Write for StackWriter<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_copy = std::cmp::min(bytes.len(), remaining);
        self.buf[self.pos..self.pos + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.pos += to_copy;
        Ok(())
    }
}

/// Adapts a [`Console`] to `fmt::Write` for streaming output such as
/// register dumps.
pub struct ConsoleWriter<'a>(pub &'a dyn Console);

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}
