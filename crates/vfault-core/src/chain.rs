//! Portable model of the OS handler walk.
//!
//! Windows offers a fault to the vectored exception handlers first. The
//! vectored continue handlers run next, whether or not an exception handler
//! resumed the thread. Only a fault nobody has claimed by then reaches the
//! frame-based handlers and finally the unhandled-exception filter.
//! [`HandlerChain`] replays that walk over plain closures so the composed
//! behavior can be exercised on any host.

use crate::coordinator::Disposition;
use crate::context::MachineContext;
use crate::exception::ExceptionRecord;
use crate::rewrite::Redirected;

/// Which OS list an entry lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Vectored exception handlers.
    Exception,
    /// Vectored continue handlers.
    Continue,
    /// Unhandled-exception filter.
    Unhandled,
}

/// Insert at the head of the list or append to the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    First,
    Last,
}

type HandlerFn<'a, C> = Box<dyn Fn(&ExceptionRecord, &mut C) -> Disposition + 'a>;

pub struct ChainEntry<'a, C: ?Sized> {
    name: &'static str,
    phase: Phase,
    position: Position,
    handler: HandlerFn<'a, C>,
}

impl<'a, C: MachineContext + ?Sized> ChainEntry<'a, C> {
    pub fn new<F>(name: &'static str, phase: Phase, position: Position, handler: F) -> Self
    where
        F: Fn(&ExceptionRecord, &mut C) -> Disposition + 'a,
    {
        Self {
            name,
            phase,
            position,
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

/// One handler invocation during [`HandlerChain::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerCall {
    pub name: &'static str,
    pub phase: Phase,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// The thread continues. `redirected` is set when an exception handler
    /// rewrote the context to enter the panic path.
    Resumed { redirected: Option<Redirected> },
    /// Every handler declined; the OS default (WER, debugger) takes over.
    OsDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub outcome: ChainOutcome,
    pub calls: Vec<HandlerCall>,
}

impl Delivery {
    pub fn called(&self, name: &str) -> bool {
        self.calls.iter().any(|c| c.name == name)
    }
}

pub struct HandlerChain<'a, C: ?Sized> {
    exception: Vec<ChainEntry<'a, C>>,
    frame: Vec<ChainEntry<'a, C>>,
    continue_: Vec<ChainEntry<'a, C>>,
    unhandled: Option<ChainEntry<'a, C>>,
}

impl<'a, C: MachineContext + ?Sized> Default for HandlerChain<'a, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, C: MachineContext + ?Sized> HandlerChain<'a, C> {
    pub fn new() -> Self {
        Self {
            exception: Vec::new(),
            frame: Vec::new(),
            continue_: Vec::new(),
            unhandled: None,
        }
    }

    /// Register `entry` the way the OS would. There is a single
    /// unhandled-exception filter; setting it replaces the previous one.
    pub fn push(&mut self, entry: ChainEntry<'a, C>) {
        let list = match entry.phase {
            Phase::Exception => &mut self.exception,
            Phase::Continue => &mut self.continue_,
            Phase::Unhandled => {
                self.unhandled = Some(entry);
                return;
            }
        };
        match entry.position {
            Position::First => list.insert(0, entry),
            Position::Last => list.push(entry),
        }
    }

    /// Add a frame-based handler belonging to code outside the runtime.
    /// Frame handlers run innermost first, in push order, before the
    /// unhandled-exception filter.
    pub fn push_frame_handler<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(&ExceptionRecord, &mut C) -> Disposition + 'a,
    {
        self.frame
            .push(ChainEntry::new(name, Phase::Exception, Position::Last, handler));
    }

    /// Registered handlers in walk order, for diagnostics.
    pub fn order(&self) -> Vec<(Phase, &'static str)> {
        self.exception
            .iter()
            .chain(&self.continue_)
            .chain(&self.unhandled)
            .map(|e| (e.phase, e.name))
            .collect()
    }

    /// Walk the chain for one fault.
    pub fn deliver(&self, record: &ExceptionRecord, ctx: &mut C) -> Delivery {
        let mut calls = Vec::new();
        let mut call = |entry: &ChainEntry<'a, C>, ctx: &mut C| {
            let disposition = (entry.handler)(record, ctx);
            calls.push(HandlerCall {
                name: entry.name,
                phase: entry.phase,
                disposition,
            });
            disposition
        };

        let mut claimed = None;
        for entry in &self.exception {
            let disposition = call(entry, &mut *ctx);
            if disposition.is_claim() {
                claimed = Some(disposition);
                break;
            }
        }

        for entry in &self.continue_ {
            if call(entry, &mut *ctx).is_claim() {
                claimed.get_or_insert(Disposition::ClaimAndStopSearch);
                break;
            }
        }

        if claimed.is_none() {
            for entry in self.frame.iter().chain(&self.unhandled) {
                if call(entry, &mut *ctx).is_claim() {
                    claimed = Some(Disposition::ClaimAndStopSearch);
                    break;
                }
            }
        }

        let outcome = match claimed {
            Some(Disposition::ClaimAndResume(token)) => ChainOutcome::Resumed {
                redirected: Some(token),
            },
            Some(_) => ChainOutcome::Resumed { redirected: None },
            None => ChainOutcome::OsDefault,
        };
        Delivery { outcome, calls }
    }
}
