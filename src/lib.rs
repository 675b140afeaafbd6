//! cpscheme - a small Scheme-family runtime
//!
//! This crate evaluates S-expressions with a register machine whose
//! continuations are plain data. Instead of recursing on the host stack,
//! every "what happens next" decision is written into a continuation
//! register as a tagged frame, and a driver loop repeatedly invokes the
//! step function selected by a program counter. That gives two things a
//! tree-walking interpreter cannot:
//!
//! - proper tail calls in constant register state, whatever the depth
//! - first-class continuations (`call/cc`, `letcc`) that may be stored,
//!   invoked after their dynamic extent has exited, and re-entered
//!
//! ```scheme
//! (letrec ((loop (lambda (n) (if (= n 0) 'done (loop (- n 1))))))
//!   (loop 1000000))                          ; => done
//! (call/cc (lambda (k) (begin (k 5) 7)))     ; => 5
//! (call-with-values (lambda () (values 3 4)) +) ; => 7
//! ```
//!
//! ## Special forms
//!
//! `quote`, `lambda` (single body), `let`, `letrec`, `begin`, `if`,
//! `set!`/`define` (same semantics), `call/cc`, `letcc`, `and`, `or`.
//!
//! ## Drivers
//!
//! - [`evaluator::Interpreter::eval`] runs to completion
//! - [`scheduler::SlicedEvaluation`] runs in bounded time slices for hosts
//!   that must not be blocked
//!
//! ## Modules
//!
//! - `ast`: the value model
//! - `evaluator`: registers, step functions, environments, continuations
//! - `scheduler`: the cooperative time-sliced driver
//! - `builtinops`: the native procedure library
//! - `scheme`: S-expression reader

use thiserror::Error;

use crate::evaluator::Arity;

/// Maximum nesting depth accepted by the reader.
/// The reader is recursive descent, so this bounds host stack use while parsing.
/// Evaluation itself has no depth limit.
pub const MAX_PARSE_DEPTH: usize = 512;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, degenerate dotted lists)
    InvalidSyntax,
    /// Input ended inside a list, string, or block comment
    Incomplete,
    /// A list was closed with the wrong delimiter, or closed when none was open
    MismatchedDelimiter,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let error_char = input
            .char_indices()
            .take_while(|(idx, _)| *idx < error_offset)
            .count();
        let context_start = error_char.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();
        let found = input[error_offset.min(input.len())..]
            .chars()
            .next()
            .map(|c| c.to_string());

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
///
/// Every error aborts the whole pending evaluation; nothing is retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    /// Malformed special form, improper application list, unquoted vector,
    /// or a bare syntax keyword used as a variable
    #[error("SyntaxError: {0}")]
    SyntaxError(String),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    /// Wrong variant used as operator or operand
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("ArityError: {procedure} expects {expected} arguments, got {got}")]
    ArityError {
        procedure: String,
        expected: Arity,
        got: usize,
    },
    /// A `letrec` binding was read before its initializer completed
    #[error("LetrecOrderError: {0} referenced before its initialization completed")]
    LetrecOrderError(String),
    /// Raised by evaluated programs through the `error` procedure
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("IoError: {0}")]
    IoError(String),
    /// An interpreter invariant was violated. Never reachable from valid input.
    #[error("InternalFault: {0}")]
    InternalFault(String),
}

impl Error {
    pub fn arity_error(procedure: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityError {
            procedure: procedure.into(),
            expected,
            got,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod scheduler;
pub mod scheme;

pub use ast::{Symbol, Value};
pub use evaluator::{Interpreter, StepOutcome};
pub use scheduler::{SliceConfig, SliceStatus, SlicedEvaluation};
