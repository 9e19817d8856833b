//! Exception codes and the per-fault record the OS hands to every handler.

use std::fmt;

/// Raw NTSTATUS-style exception code.
///
/// Kept as a newtype rather than a closed enum: the OS delivers codes this
/// layer has never heard of (C++ exceptions, `RaiseException` from host
/// code) and those must survive untouched into the crash report.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ExceptionCode(pub u32);

impl ExceptionCode {
    pub const ACCESS_VIOLATION: Self = Self(0xC000_0005);
    pub const INT_DIVIDE_BY_ZERO: Self = Self(0xC000_0094);
    pub const INT_OVERFLOW: Self = Self(0xC000_0095);
    pub const FLT_DENORMAL_OPERAND: Self = Self(0xC000_008D);
    pub const FLT_DIVIDE_BY_ZERO: Self = Self(0xC000_008E);
    pub const FLT_INEXACT_RESULT: Self = Self(0xC000_008F);
    pub const FLT_INVALID_OPERATION: Self = Self(0xC000_0090);
    pub const FLT_OVERFLOW: Self = Self(0xC000_0091);
    pub const FLT_STACK_CHECK: Self = Self(0xC000_0092);
    pub const FLT_UNDERFLOW: Self = Self(0xC000_0093);
    pub const BREAKPOINT: Self = Self(0x8000_0003);
    pub const ILLEGAL_INSTRUCTION: Self = Self(0xC000_001D);
    pub const STACK_OVERFLOW: Self = Self(0xC000_00FD);

    /// Codes the runtime turns into panics or crash reports. Everything
    /// else belongs to someone further down the chain.
    pub const RECOGNIZED: [Self; 10] = [
        Self::ACCESS_VIOLATION,
        Self::INT_DIVIDE_BY_ZERO,
        Self::INT_OVERFLOW,
        Self::FLT_DENORMAL_OPERAND,
        Self::FLT_DIVIDE_BY_ZERO,
        Self::FLT_INEXACT_RESULT,
        Self::FLT_OVERFLOW,
        Self::FLT_UNDERFLOW,
        Self::BREAKPOINT,
        // Breakpoints arrive this way on arm64.
        Self::ILLEGAL_INSTRUCTION,
    ];

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Match without iterators or calls so the classifier stays a flat
    /// comparison chain.
    #[inline(always)]
    pub const fn is_recognized(self) -> bool {
        matches!(
            self.0,
            0xC000_0005
                | 0xC000_0094
                | 0xC000_0095
                | 0xC000_008D
                | 0xC000_008E
                | 0xC000_008F
                | 0xC000_0091
                | 0xC000_0093
                | 0x8000_0003
                | 0xC000_001D
        )
    }

    #[inline]
    pub const fn is_float_trap(self) -> bool {
        matches!(
            self.0,
            0xC000_008D | 0xC000_008E | 0xC000_008F | 0xC000_0091 | 0xC000_0093
        )
    }

    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0xC000_0005 => "EXCEPTION_ACCESS_VIOLATION",
            0xC000_0094 => "EXCEPTION_INT_DIVIDE_BY_ZERO",
            0xC000_0095 => "EXCEPTION_INT_OVERFLOW",
            0xC000_008D => "EXCEPTION_FLT_DENORMAL_OPERAND",
            0xC000_008E => "EXCEPTION_FLT_DIVIDE_BY_ZERO",
            0xC000_008F => "EXCEPTION_FLT_INEXACT_RESULT",
            0xC000_0090 => "EXCEPTION_FLT_INVALID_OPERATION",
            0xC000_0091 => "EXCEPTION_FLT_OVERFLOW",
            0xC000_0092 => "EXCEPTION_FLT_STACK_CHECK",
            0xC000_0093 => "EXCEPTION_FLT_UNDERFLOW",
            0x8000_0003 => "EXCEPTION_BREAKPOINT",
            0xC000_001D => "EXCEPTION_ILLEGAL_INSTRUCTION",
            0xC000_00FD => "EXCEPTION_STACK_OVERFLOW",
            _ => return None,
        })
    }

    /// Parse a symbolic short name (`access-violation`) or a hex/decimal code.
    pub fn parse(s: &str) -> Option<Self> {
        let named = match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "access-violation" | "av" => Some(Self::ACCESS_VIOLATION),
            "int-divide-by-zero" | "divide-by-zero" => Some(Self::INT_DIVIDE_BY_ZERO),
            "int-overflow" | "overflow" => Some(Self::INT_OVERFLOW),
            "flt-denormal-operand" => Some(Self::FLT_DENORMAL_OPERAND),
            "flt-divide-by-zero" => Some(Self::FLT_DIVIDE_BY_ZERO),
            "flt-inexact-result" => Some(Self::FLT_INEXACT_RESULT),
            "flt-overflow" => Some(Self::FLT_OVERFLOW),
            "flt-underflow" => Some(Self::FLT_UNDERFLOW),
            "breakpoint" => Some(Self::BREAKPOINT),
            "illegal-instruction" => Some(Self::ILLEGAL_INSTRUCTION),
            "stack-overflow" => Some(Self::STACK_OVERFLOW),
            _ => None,
        };
        named.or_else(|| {
            let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => s.parse().ok()?,
            };
            Some(Self(raw))
        })
    }
}

impl fmt::Debug for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({:#x})", self.0),
            None => write!(f, "ExceptionCode({:#x})", self.0),
        }
    }
}

impl fmt::LowerHex for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The OS-supplied description of one fault. Read-only to this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub code: ExceptionCode,
    /// `ExceptionInformation[0..2]`. For access violations these are the
    /// access kind and the faulting data address.
    pub params: [usize; 2],
}

impl ExceptionRecord {
    pub const fn new(code: ExceptionCode, param0: usize, param1: usize) -> Self {
        Self {
            code,
            params: [param0, param1],
        }
    }

    /// Record for an access violation reading `addr`.
    pub const fn access_violation(addr: usize) -> Self {
        Self::new(ExceptionCode::ACCESS_VIOLATION, 0, addr)
    }

    pub const fn fault_address(&self) -> usize {
        self.params[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_table_matches_predicate() {
        for code in ExceptionCode::RECOGNIZED {
            assert!(code.is_recognized(), "{code:?}");
        }
        assert!(!ExceptionCode::STACK_OVERFLOW.is_recognized());
        assert!(!ExceptionCode::FLT_INVALID_OPERATION.is_recognized());
        assert!(!ExceptionCode::FLT_STACK_CHECK.is_recognized());
        assert!(!ExceptionCode(0xE06D_7363).is_recognized()); // MSVC C++ throw
    }

    #[test]
    fn test_float_traps() {
        let floats = ExceptionCode::RECOGNIZED
            .iter()
            .filter(|c| c.is_float_trap())
            .count();
        assert_eq!(floats, 5);
        assert!(!ExceptionCode::INT_DIVIDE_BY_ZERO.is_float_trap());
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ExceptionCode::parse("access-violation"),
            Some(ExceptionCode::ACCESS_VIOLATION)
        );
        assert_eq!(
            ExceptionCode::parse("INT_OVERFLOW"),
            Some(ExceptionCode::INT_OVERFLOW)
        );
        assert_eq!(
            ExceptionCode::parse("0xc0000094"),
            Some(ExceptionCode::INT_DIVIDE_BY_ZERO)
        );
        assert_eq!(ExceptionCode::parse("17"), Some(ExceptionCode(17)));
        assert_eq!(ExceptionCode::parse("nonsense"), None);
    }

    #[test]
    fn test_debug_names_known_codes() {
        assert_eq!(
            format!("{:?}", ExceptionCode::BREAKPOINT),
            "EXCEPTION_BREAKPOINT(0x80000003)"
        );
        assert_eq!(format!("{:?}", ExceptionCode(1)), "ExceptionCode(0x1)");
    }
}
