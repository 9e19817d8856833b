//! Which OS registration call installs each handler.

use crate::arch::Arch;
use crate::chain::{Phase, Position};
use crate::coordinator::HandlerKind;

/// An OS registration primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// `AddVectoredExceptionHandler(first, ..)`.
    VectoredException { first: bool },
    /// `AddVectoredContinueHandler(first, ..)`.
    VectoredContinue { first: bool },
    /// `SetUnhandledExceptionFilter(..)`.
    UnhandledFilter,
}

impl Registration {
    pub const fn phase(self) -> Phase {
        match self {
            Registration::VectoredException { .. } => Phase::Exception,
            Registration::VectoredContinue { .. } => Phase::Continue,
            Registration::UnhandledFilter => Phase::Unhandled,
        }
    }

    pub const fn position(self) -> Position {
        match self {
            Registration::VectoredException { first: true }
            | Registration::VectoredContinue { first: true } => Position::First,
            _ => Position::Last,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedHandler {
    pub kind: HandlerKind,
    pub via: Registration,
}

/// Ordered list of registrations for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPlan {
    steps: Vec<PlannedHandler>,
}

impl RegistrationPlan {
    /// The exception handler goes to the head of the vectored list so it
    /// runs before most third-party handlers. Where continue handlers are
    /// usable, the first-continue handler goes to the head of that list and
    /// the last-continue handler to the tail. Elsewhere the last-continue
    /// handler becomes the unhandled-exception filter and the first-continue
    /// handler is not needed: the filter never runs after a resume.
    pub fn for_arch(arch: Arch, continue_api_available: bool) -> Self {
        let mut steps = vec![PlannedHandler {
            kind: HandlerKind::Exception,
            via: Registration::VectoredException { first: true },
        }];

        if arch.has_vectored_continue() && continue_api_available {
            steps.push(PlannedHandler {
                kind: HandlerKind::FirstContinue,
                via: Registration::VectoredContinue { first: true },
            });
            steps.push(PlannedHandler {
                kind: HandlerKind::LastContinue,
                via: Registration::VectoredContinue { first: false },
            });
        } else {
            steps.push(PlannedHandler {
                kind: HandlerKind::LastContinue,
                via: Registration::UnhandledFilter,
            });
        }

        Self { steps }
    }

    pub fn host() -> Self {
        Self::for_arch(Arch::HOST, true)
    }

    pub fn steps(&self) -> &[PlannedHandler] {
        &self.steps
    }

    pub fn registers(&self, kind: HandlerKind) -> bool {
        self.steps.iter().any(|s| s.kind == kind)
    }
}
