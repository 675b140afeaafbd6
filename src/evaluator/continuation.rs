//! Defunctionalized continuations.
//!
//! A continuation is an immutable, singly linked chain of [`Frame`]s ending in
//! exactly one [`Frame::Empty`]. Each frame carries only what is needed to
//! resume one pending operation. Since the chain is plain shared data, a
//! captured continuation can be resumed any number of times, including after
//! the extent that captured it has returned.

use std::fmt;
use std::rc::Rc;

use crate::ast::{Symbol, Value};
use crate::evaluator::environment::Env;

/// Shared handle to the head frame of a continuation chain.
#[derive(Clone)]
pub struct Kont(Rc<Frame>);

/// One pending operation.
pub enum Frame {
    /// Terminal frame: delivering a value here ends the run.
    Empty,
    /// Operator has been evaluated; the operands are next.
    Operator {
        operands: Value,
        env: Env,
        next: Kont,
    },
    /// Operand list has been evaluated; apply `operator` to it.
    Operands { operator: Value, next: Kont },
    /// One element of a list being mapped through `valueof` is pending.
    /// `done` holds the results so far, most recent first.
    MapNext {
        remaining: Value,
        done: Value,
        env: Env,
        next: Kont,
    },
    If {
        consequent: Value,
        alternative: Option<Value>,
        env: Env,
        next: Kont,
    },
    /// Remaining body expressions of a `begin`; never empty.
    Begin { rest: Value, env: Env, next: Kont },
    /// `set!`/`define` waiting for its right-hand side.
    Assign { name: Symbol, env: Env, next: Kont },
    /// `let` right-hand sides are being evaluated in the defining environment.
    Let {
        names: Rc<[Symbol]>,
        body: Value,
        env: Env,
        next: Kont,
    },
    /// `letrec` right-hand sides are being evaluated in `env`, the frame that
    /// already holds the placeholders and will be overwritten in place.
    Letrec {
        names: Rc<[Symbol]>,
        body: Value,
        env: Env,
        next: Kont,
    },
    /// `call/cc` operand is being evaluated.
    CallCc { next: Kont },
    /// The producer of `call-with-values` is running.
    CallWithValues { consumer: Value, next: Kont },
    And { rest: Value, env: Env, next: Kont },
    Or { rest: Value, env: Env, next: Kont },
}

impl Kont {
    pub fn empty() -> Kont {
        Kont(Rc::new(Frame::Empty))
    }

    /// Push `frame` on top of the chain it already links to.
    pub(crate) fn new(frame: Frame) -> Kont {
        Kont(Rc::new(frame))
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        matches!(*self.0, Frame::Empty)
    }

    pub fn ptr_eq(&self, other: &Kont) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of frames in the chain, counting the terminal one.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self.frame();
        while let Some(next) = frame.next() {
            depth += 1;
            frame = next.frame();
        }
        depth
    }
}

impl fmt::Debug for Kont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kont({} depth={})", self.frame().tag(), self.depth())
    }
}

impl Frame {
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::Empty => "empty",
            Frame::Operator { .. } => "operator",
            Frame::Operands { .. } => "operands",
            Frame::MapNext { .. } => "map-next",
            Frame::If { .. } => "if",
            Frame::Begin { .. } => "begin",
            Frame::Assign { .. } => "assign",
            Frame::Let { .. } => "let",
            Frame::Letrec { .. } => "letrec",
            Frame::CallCc { .. } => "call/cc",
            Frame::CallWithValues { .. } => "call-with-values",
            Frame::And { .. } => "and",
            Frame::Or { .. } => "or",
        }
    }

    pub fn next(&self) -> Option<&Kont> {
        match self {
            Frame::Empty => None,
            Frame::Operator { next, .. }
            | Frame::Operands { next, .. }
            | Frame::MapNext { next, .. }
            | Frame::If { next, .. }
            | Frame::Begin { next, .. }
            | Frame::Assign { next, .. }
            | Frame::Let { next, .. }
            | Frame::Letrec { next, .. }
            | Frame::CallCc { next }
            | Frame::CallWithValues { next, .. }
            | Frame::And { next, .. }
            | Frame::Or { next, .. } => Some(next),
        }
    }

    fn next_mut(&mut self) -> Option<&mut Kont> {
        match self {
            Frame::Empty => None,
            Frame::Operator { next, .. }
            | Frame::Operands { next, .. }
            | Frame::MapNext { next, .. }
            | Frame::If { next, .. }
            | Frame::Begin { next, .. }
            | Frame::Assign { next, .. }
            | Frame::Let { next, .. }
            | Frame::Letrec { next, .. }
            | Frame::CallCc { next }
            | Frame::CallWithValues { next, .. }
            | Frame::And { next, .. }
            | Frame::Or { next, .. } => Some(next),
        }
    }

    /// True when dropping `slot` would free its frame and recurse into the rest of the chain.
    fn owns_tail(slot: &Kont) -> bool {
        Rc::strong_count(&slot.0) == 1 && !slot.is_empty()
    }
}

// A deep non-tail recursion aborted by an error leaves a long uniquely owned
// chain behind; unlink it iteratively instead of one nested drop per frame.
impl Drop for Frame {
    fn drop(&mut self) {
        let mut cursor = match self.next_mut() {
            Some(slot) if Frame::owns_tail(slot) => std::mem::replace(slot, Kont::empty()).0,
            _ => return,
        };
        while let Ok(mut frame) = Rc::try_unwrap(cursor) {
            match frame.next_mut() {
                Some(slot) if Frame::owns_tail(slot) => {
                    cursor = std::mem::replace(slot, Kont::empty()).0;
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::val;
    use crate::evaluator::environment::Environment;

    #[test]
    fn test_chain_terminates_in_single_empty_frame() {
        let env = Environment::global();
        let mut k = Kont::empty();
        for i in 0..5 {
            k = Kont::new(Frame::Begin {
                rest: val([i]),
                env: env.clone(),
                next: k,
            });
        }
        assert_eq!(k.depth(), 6);
        let mut empties = 0;
        let mut frame = Some(k.frame());
        while let Some(f) = frame {
            if matches!(f, Frame::Empty) {
                empties += 1;
            }
            frame = f.next().map(Kont::frame);
        }
        assert_eq!(empties, 1);
    }

    #[test]
    fn test_shared_tail_survives_drop_of_one_branch() {
        let shared = Kont::new(Frame::CallCc {
            next: Kont::empty(),
        });
        let branch = Kont::new(Frame::CallWithValues {
            consumer: val(1),
            next: shared.clone(),
        });
        drop(branch);
        assert_eq!(shared.depth(), 2);
        assert_eq!(shared.frame().tag(), "call/cc");
    }

    #[test]
    fn test_deep_chain_drops_iteratively() {
        let mut k = Kont::empty();
        for _ in 0..500_000 {
            k = Kont::new(Frame::CallCc { next: k });
        }
        assert_eq!(k.depth(), 500_001);
        drop(k);
    }
}
