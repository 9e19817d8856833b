//! Narrow exceptions to "the runtime crashes the process".

use crate::arch::Arch;
use crate::exception::ExceptionCode;
use crate::module::ModuleTextRange;

/// MSVC runtime DLLs on arm64 detect CPU features by executing candidate
/// instructions under SEH and catching the illegal-instruction trap.
/// Vectored handlers see those traps first, so a last-chance illegal
/// instruction from outside runtime code on such a target is assumed to be
/// a probe and left for the frame-based handler that expects it.
///
/// This is a heuristic on address and code only. The OS gives no
/// structural signal for "this trap is a probe".
pub fn defer_to_cpu_feature_probe(
    arch: Arch,
    code: ExceptionCode,
    ip: usize,
    text: &ModuleTextRange,
) -> bool {
    arch.probes_cpu_features_with_traps()
        && code == ExceptionCode::ILLEGAL_INSTRUCTION
        && !text.contains(ip)
}
