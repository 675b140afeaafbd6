//! Callables: native procedures, closures, and the arity rules they share.
//!
//! Closures are applied directly by the trampoline, since entering a closure
//! body is just a register update. [`Procedure`] is the plain
//! "arguments in, value out" contract used when host code calls into the
//! interpreter with [`Interpreter::call`].

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Symbol, Value};
use crate::evaluator::Interpreter;
use crate::evaluator::environment::Env;

/// Expected number of arguments for a procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// Between min and max inclusive
    Range(usize, usize),
    /// At least this many arguments
    AtLeast(usize),
}

impl Arity {
    /// Build an arity from the registration contract's `min` and optional
    /// `max`. `None` when `max` is below `min`.
    pub fn from_bounds(min: usize, max: Option<usize>) -> Option<Arity> {
        match max {
            Some(max) if max < min => None,
            Some(max) if max == min => Some(Arity::Exact(min)),
            Some(max) => Some(Arity::Range(min, max)),
            None => Some(Arity::AtLeast(min)),
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::AtLeast(min) => count >= min,
        }
    }

    /// Check `count` against this arity, reporting `procedure` on failure.
    pub fn validate(&self, procedure: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(procedure, *self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::Range(min, max) => write!(f, "between {min} and {max}"),
            Arity::AtLeast(min) => write!(f, "at least {min}"),
        }
    }
}

/// Parameter pattern of a `lambda`.
///
/// `(a b)` has only required names, `args` only a rest name, and
/// `(a b . rest)` both.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    required: Vec<Symbol>,
    rest: Option<Symbol>,
}

impl Params {
    /// Parse a parameter pattern: a proper list, a single symbol, or a dotted list of symbols.
    pub fn parse(pattern: &Value) -> Result<Params, Error> {
        if pattern.is_cyclic() {
            return Err(Error::SyntaxError(
                "circular lambda parameter list".into(),
            ));
        }
        let mut required = Vec::new();
        let mut cursor = pattern.clone();
        let rest = loop {
            match cursor {
                Value::Nil => break None,
                Value::Symbol(name) => break Some(name),
                Value::Pair(pair) => {
                    match pair.car() {
                        Value::Symbol(name) => required.push(name),
                        other => {
                            return Err(Error::SyntaxError(format!(
                                "lambda parameter must be a symbol, got {other}"
                            )));
                        }
                    }
                    cursor = pair.cdr();
                }
                other => {
                    return Err(Error::SyntaxError(format!(
                        "malformed lambda parameter list: {other}"
                    )));
                }
            }
        };

        let mut seen = std::collections::HashSet::new();
        for name in required.iter().chain(rest.iter()) {
            if !seen.insert(name) {
                return Err(Error::SyntaxError(format!(
                    "duplicate lambda parameter: {name}"
                )));
            }
        }

        Ok(Params { required, rest })
    }

    pub fn arity(&self) -> Arity {
        match self.rest {
            Some(_) => Arity::AtLeast(self.required.len()),
            None => Arity::Exact(self.required.len()),
        }
    }

    /// Pair parameter names with already arity-checked arguments. Surplus
    /// arguments are collected into a fresh list for the rest name.
    pub fn bind(&self, args: Vec<Value>) -> Vec<(Symbol, Value)> {
        let mut args = args.into_iter();
        let mut bindings: Vec<(Symbol, Value)> = self
            .required
            .iter()
            .cloned()
            .zip(args.by_ref())
            .collect();
        if let Some(rest) = &self.rest {
            bindings.push((rest.clone(), Value::list(args.collect())));
        }
        bindings
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.rest, self.required.is_empty()) {
            (Some(rest), true) => write!(f, "{rest}"),
            _ => {
                write!(f, "(")?;
                for (i, name) in self.required.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{name}")?;
                }
                if let Some(rest) = &self.rest {
                    write!(f, " . {rest}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// An interpreted procedure: parameters, a single body expression, and the
/// environment frame it closed over. Immutable once created.
pub struct Closure {
    params: Params,
    body: Value,
    env: Env,
}

impl Closure {
    pub fn new(params: Params, body: Value, env: Env) -> Self {
        Closure { params, body, env }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Name used in arity errors, e.g. `(lambda (a b))`.
    pub fn describe(&self) -> String {
        format!("(lambda {})", self.params)
    }
}

/// What a native host function hands back to the trampoline.
#[derive(Debug)]
pub enum Outcome {
    /// Deliver this value to the current continuation
    Return(Value),
    /// The native already wrote the program counter and registers it needs;
    /// the trampoline continues from there
    Reenter,
}

/// Erased host function behind every native procedure.
pub type NativeFn = dyn Fn(&mut Interpreter, Vec<Value>) -> Result<Outcome, Error>;

/// A host function plus its declared arity, enforced before every call.
pub struct NativeProcedure {
    name: Symbol,
    arity: Arity,
    func: Rc<NativeFn>,
}

impl NativeProcedure {
    pub fn new(name: &str, arity: Arity, func: Rc<NativeFn>) -> Self {
        NativeProcedure {
            name: Symbol::new(name),
            arity,
            func,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Check arity and run the host function inside the trampoline.
    pub(crate) fn invoke(
        &self,
        interp: &mut Interpreter,
        args: Vec<Value>,
    ) -> Result<Outcome, Error> {
        self.arity.validate(self.name(), args.len())?;
        (self.func)(interp, args)
    }
}

impl fmt::Debug for NativeProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeProcedure({}, {})", self.name, self.arity)
    }
}

/// Uniform "apply to arguments, get a value" contract for host code.
pub trait Procedure {
    fn apply(&self, interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error>;
}

impl Procedure for NativeProcedure {
    fn apply(&self, interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
        interp.with_fresh_registers(|interp| match self.invoke(interp, args)? {
            Outcome::Return(value) => Ok(value),
            Outcome::Reenter => interp.run(),
        })
    }
}

/// A closure called from host code. Runs a nested synchronous evaluation of
/// the body, so the caller's in-flight registers are left untouched.
pub struct Interpreted(pub Rc<Closure>);

impl Procedure for Interpreted {
    fn apply(&self, interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
        let closure = &self.0;
        closure
            .params
            .arity()
            .validate(&closure.describe(), args.len())?;
        let env = closure.env.extend_with(closure.params.bind(args));
        interp.eval_in(&closure.body, &env)
    }
}
