//! Saved CPU state of a faulting thread.
//!
//! The OS owns the context for the duration of a handler call. This layer
//! may move the instruction pointer, stack pointer and link register, and
//! write a single word onto the stack; nothing else is reachable through
//! [`MachineContext`].

use std::fmt;

use crate::arch::Arch;

/// Register snapshot of a faulting thread.
pub trait MachineContext {
    fn arch(&self) -> Arch;

    fn ip(&self) -> usize;
    fn sp(&self) -> usize;
    /// Link register, or 0 on architectures without one.
    fn lr(&self) -> usize;

    fn set_ip(&mut self, ip: usize);
    fn set_sp(&mut self, sp: usize);
    fn set_lr(&mut self, lr: usize);

    /// Store one machine word at `addr` on the faulting thread's stack.
    ///
    /// # Safety
    ///
    /// `addr` must be a writable, word-aligned slot inside the faulting
    /// thread's stack, below the original stack pointer.
    unsafe fn write_stack_word(&mut self, addr: usize, value: usize) {
        // SAFETY: guaranteed by the caller.
        unsafe { (addr as *mut usize).write(value) }
    }

    /// Print every general register, one per line.
    fn dump_registers(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}

/// A context backed by plain memory, used by the simulator and in tests.
///
/// Owns a small byte stack so the rewriter's push can be observed without
/// touching the real thread stack.
#[derive(Debug, Clone)]
pub struct SyntheticContext {
    arch: Arch,
    ip: usize,
    sp: usize,
    lr: usize,
    pub gprs: [usize; 8],
    stack: Vec<u8>,
    stack_base: usize,
}

impl SyntheticContext {
    pub const DEFAULT_STACK_TOP: usize = 0x00c0_0000;
    pub const DEFAULT_STACK_BYTES: usize = 256;

    /// A context stopped at `ip` with an empty stack.
    pub fn new(arch: Arch, ip: usize) -> Self {
        Self::with_stack(arch, ip, Self::DEFAULT_STACK_TOP, Self::DEFAULT_STACK_BYTES)
    }

    /// A context whose stack occupies `[top - bytes, top)` with `sp == top`.
    pub fn with_stack(arch: Arch, ip: usize, top: usize, bytes: usize) -> Self {
        Self {
            arch,
            ip,
            sp: top,
            lr: 0,
            gprs: [0; 8],
            stack: vec![0; bytes],
            stack_base: top - bytes,
        }
    }

    pub fn with_lr(mut self, lr: usize) -> Self {
        self.lr = lr;
        self
    }

    /// Read back a word previously written by the rewriter.
    pub fn read_stack_word(&self, addr: usize) -> Option<usize> {
        let width = self.arch.word_size();
        let offset = addr.checked_sub(self.stack_base)?;
        let bytes = self.stack.get(offset..offset + width)?;
        let mut word = [0u8; std::mem::size_of::<usize>()];
        word[..width].copy_from_slice(bytes);
        Some(usize::from_le_bytes(word))
    }
}

impl MachineContext for SyntheticContext {
    fn arch(&self) -> Arch {
        self.arch
    }

    fn ip(&self) -> usize {
        self.ip
    }

    fn sp(&self) -> usize {
        self.sp
    }

    fn lr(&self) -> usize {
        self.lr
    }

    fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }

    fn set_sp(&mut self, sp: usize) {
        self.sp = sp;
    }

    fn set_lr(&mut self, lr: usize) {
        self.lr = lr;
    }

    unsafe fn write_stack_word(&mut self, addr: usize, value: usize) {
        let width = self.arch.word_size();
        let offset = addr
            .checked_sub(self.stack_base)
            .filter(|off| off + width <= self.stack.len());
        match offset {
            Some(off) => {
                self.stack[off..off + width].copy_from_slice(&value.to_le_bytes()[..width])
            }
            // Same outcome a real thread gets for a push off the end of its stack.
            None => panic!("synthetic stack overflow writing {addr:#x}"),
        }
    }

    fn dump_registers(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let (ip, sp, lr) = self.arch.register_names();
        for (i, value) in self.gprs.iter().enumerate() {
            writeln!(out, "r{i:<6} {value:#x}")?;
        }
        writeln!(out, "{ip:<7} {:#x}", self.ip)?;
        writeln!(out, "{sp:<7} {:#x}", self.sp)?;
        if self.arch.uses_link_register() {
            writeln!(out, "{lr:<7} {:#x}", self.lr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_word_roundtrip_respects_word_size() {
        let mut ctx = SyntheticContext::with_stack(Arch::X86, 0x1000, 0x2000, 64);
        let slot = 0x2000 - 4;
        unsafe { ctx.write_stack_word(slot, 0xdead_beef) };
        assert_eq!(ctx.read_stack_word(slot), Some(0xdead_beef));
        // Neighbouring slot untouched.
        assert_eq!(ctx.read_stack_word(slot - 4), Some(0));
    }

    #[test]
    fn test_read_outside_stack_is_none() {
        let ctx = SyntheticContext::with_stack(Arch::X86_64, 0, 0x2000, 64);
        assert_eq!(ctx.read_stack_word(0x2000), None);
        assert_eq!(ctx.read_stack_word(0x10), None);
    }

    #[test]
    #[should_panic(expected = "synthetic stack overflow")]
    fn test_write_past_stack_panics() {
        let mut ctx = SyntheticContext::with_stack(Arch::X86_64, 0, 0x2000, 16);
        unsafe { ctx.write_stack_word(0x2000 - 32, 1) };
    }

    #[test]
    fn test_dump_includes_link_register_only_when_used() {
        let mut out = String::new();
        SyntheticContext::new(Arch::X86_64, 0x401000)
            .dump_registers(&mut out)
            .unwrap();
        assert!(out.contains("rip     0x401000"));
        assert!(!out.contains("lr"));

        let mut out = String::new();
        SyntheticContext::new(Arch::Aarch64, 0x401000)
            .with_lr(0x401234)
            .dump_registers(&mut out)
            .unwrap();
        assert!(out.contains("lr      0x401234"));
    }
}
