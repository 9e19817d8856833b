//! Per-architecture constants used by the fault path.

/// CPU architectures the Windows exception model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
}

impl Arch {
    #[cfg(target_arch = "x86")]
    pub const HOST: Arch = Arch::X86;
    #[cfg(target_arch = "x86_64")]
    pub const HOST: Arch = Arch::X86_64;
    #[cfg(target_arch = "arm")]
    pub const HOST: Arch = Arch::Arm;
    #[cfg(target_arch = "aarch64")]
    pub const HOST: Arch = Arch::Aarch64;
    #[cfg(not(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "arm",
        target_arch = "aarch64"
    )))]
    pub const HOST: Arch = Arch::X86_64;

    pub const fn word_size(self) -> usize {
        match self {
            Arch::X86 | Arch::Arm => 4,
            Arch::X86_64 | Arch::Aarch64 => 8,
        }
    }

    /// Bytes the stack pointer moves when a synthetic return frame is pushed.
    pub const fn stack_align(self) -> usize {
        match self {
            Arch::Aarch64 => 16,
            _ => self.word_size(),
        }
    }

    /// Return addresses live in a link register rather than on the stack.
    pub const fn uses_link_register(self) -> bool {
        matches!(self, Arch::Arm | Arch::Aarch64)
    }

    /// Distance between the reported exception address and the trap
    /// instruction for a breakpoint. Windows reports the address after
    /// `int3` (and after the ARM `udf` trap, leaving it unaligned).
    pub const fn abort_ip_adjust(self) -> usize {
        match self {
            Arch::X86 | Arch::X86_64 | Arch::Arm => 1,
            Arch::Aarch64 => 0,
        }
    }

    /// Vectored continue handlers are not used on 32-bit x86; the last
    /// handler is installed as the unhandled-exception filter there.
    pub const fn has_vectored_continue(self) -> bool {
        !matches!(self, Arch::X86)
    }

    /// MSVC startup code on this architecture probes CPU features by
    /// executing possibly-illegal instructions under SEH.
    pub const fn probes_cpu_features_with_traps(self) -> bool {
        matches!(self, Arch::Aarch64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Aarch64 => "aarch64",
        }
    }

    /// Names used when dumping the instruction, stack and link registers.
    pub const fn register_names(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Arch::X86 => ("eip", "esp", "lr"),
            Arch::X86_64 => ("rip", "rsp", "lr"),
            Arch::Arm | Arch::Aarch64 => ("pc", "sp", "lr"),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86" | "386" | "i686" => Ok(Arch::X86),
            "x86_64" | "amd64" | "x64" => Ok(Arch::X86_64),
            "arm" => Ok(Arch::Arm),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_register_architectures() {
        assert!(!Arch::X86.uses_link_register());
        assert!(!Arch::X86_64.uses_link_register());
        assert!(Arch::Arm.uses_link_register());
        assert!(Arch::Aarch64.uses_link_register());
    }

    #[test]
    fn test_abort_adjust_only_where_os_reports_next_instruction() {
        assert_eq!(Arch::X86_64.abort_ip_adjust(), 1);
        assert_eq!(Arch::Arm.abort_ip_adjust(), 1);
        assert_eq!(Arch::Aarch64.abort_ip_adjust(), 0);
    }

    #[test]
    fn test_stack_align() {
        assert_eq!(Arch::X86.stack_align(), 4);
        assert_eq!(Arch::X86_64.stack_align(), 8);
        assert_eq!(Arch::Aarch64.stack_align(), 16);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Aarch64);
        assert!("mips".parse::<Arch>().is_err());
    }
}
