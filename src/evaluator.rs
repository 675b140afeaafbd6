//! The evaluator core: a register machine driven by a trampoline.
//!
//! All machine state lives in [`Registers`]. Each call to
//! [`Interpreter::step`] runs exactly one of four step functions, selected
//! by [`Pc`]:
//!
//! - `Valueof` evaluates the expression register
//! - `ApplyK` delivers the value register to the continuation register
//! - `MapValueof` evaluates the next element of a list of expressions
//! - `ApplyProc` applies the operator register to the argument register
//!
//! Step functions never call each other. Anything that "continues later" is
//! pushed as a [`Frame`] onto the continuation register, so a tail call
//! replaces registers instead of growing anything.

pub mod continuation;
pub mod environment;
pub mod intooperation;
pub mod procedure;

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info, trace};

use crate::Error;
use crate::ast::{Symbol, Value};
use crate::builtinops::get_builtin_ops;
use crate::scheduler::{SliceConfig, SlicedEvaluation};
use crate::scheme::Parser;

pub use continuation::{Frame, Kont};
pub use environment::{Env, Environment};
pub use intooperation::{BoolIter, NumIter, StringIter, ValueIter};
pub use procedure::{
    Arity, Closure, Interpreted, NativeFn, NativeProcedure, Outcome, Params, Procedure,
};

use intooperation::{IntoOperation, IntoVariadicOperation};

/// Program counter: which step function runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pc {
    Valueof,
    ApplyK,
    MapValueof,
    ApplyProc,
}

/// The complete state of one evaluation.
#[derive(Debug, Clone)]
pub struct Registers {
    pub pc: Pc,
    /// Expression under evaluation (`Valueof`)
    pub expr: Value,
    pub env: Env,
    pub kont: Kont,
    /// Last computed value (`ApplyK`)
    pub val: Value,
    /// Procedure about to be applied (`ApplyProc`)
    pub operator: Value,
    pub args: Vec<Value>,
    /// Expressions still to evaluate (`MapValueof`)
    pub exprs: Value,
    /// Results of `exprs` evaluated so far, most recent first
    pub acc: Value,
}

impl Registers {
    /// Registers ready to evaluate `expr` in `env` with an empty continuation.
    pub fn new(expr: Value, env: Env) -> Self {
        Registers {
            pc: Pc::Valueof,
            expr,
            env,
            kont: Kont::empty(),
            val: Value::Nothing,
            operator: Value::Nothing,
            args: Vec::new(),
            exprs: Value::Nil,
            acc: Value::Nil,
        }
    }

    fn push(&mut self, frame: Frame) {
        self.kont = Kont::new(frame);
    }

    /// Continue evaluating `expr` in the current environment.
    fn eval_next(&mut self, expr: Value) {
        self.expr = expr;
        self.pc = Pc::Valueof;
    }

    /// Deliver `val` to the current continuation.
    fn deliver(&mut self, val: Value) {
        self.val = val;
        self.pc = Pc::ApplyK;
    }
}

/// Result of a single [`Interpreter::step`].
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    Done(Value),
    Failed(Error),
}

/// Internal step result; errors travel separately through `Result`.
pub(crate) enum Control {
    Continue,
    Halt(Value),
}

/// Syntax keywords. A keyword is only treated as syntax while no
/// environment frame binds the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    Quote,
    Lambda,
    Let,
    Letrec,
    Begin,
    If,
    Assign,
    CallCc,
    Letcc,
    And,
    Or,
}

impl SpecialForm {
    fn from_name(name: &str) -> Option<SpecialForm> {
        Some(match name {
            "quote" => SpecialForm::Quote,
            "lambda" => SpecialForm::Lambda,
            "let" => SpecialForm::Let,
            "letrec" => SpecialForm::Letrec,
            "begin" => SpecialForm::Begin,
            "if" => SpecialForm::If,
            "set!" | "define" => SpecialForm::Assign,
            "call/cc" | "call-with-current-continuation" => SpecialForm::CallCc,
            "letcc" => SpecialForm::Letcc,
            "and" => SpecialForm::And,
            "or" => SpecialForm::Or,
            _ => return None,
        })
    }
}

fn reverse_list(list: Value) -> Value {
    let mut reversed = Value::Nil;
    let mut cursor = list;
    while let Value::Pair(pair) = cursor {
        reversed = Value::cons(pair.car(), reversed);
        cursor = pair.cdr();
    }
    reversed
}

/// Reject a multiple-values container where exactly one value is required.
fn single(value: Value, context: &str) -> Result<Value, Error> {
    match value {
        Value::MultipleValues(values) => Err(Error::TypeError(format!(
            "{context}: expected a single value, got {} values",
            values.len()
        ))),
        other => Ok(other),
    }
}

/// Split `((name expr) ...)` into names and right-hand sides.
fn parse_bindings(form: &str, bindings: &Value) -> Result<(Vec<Symbol>, Vec<Value>), Error> {
    let items = bindings
        .list_to_vec()
        .ok_or_else(|| Error::SyntaxError(format!("{form}: bindings must be a list")))?;
    let mut names: Vec<Symbol> = Vec::with_capacity(items.len());
    let mut exprs = Vec::with_capacity(items.len());
    for item in items {
        match item.list_to_vec().as_deref() {
            Some([Value::Symbol(name), expr]) => {
                if names.contains(name) {
                    return Err(Error::SyntaxError(format!(
                        "{form}: duplicate binding for {name}"
                    )));
                }
                names.push(name.clone());
                exprs.push(expr.clone());
            }
            _ => {
                return Err(Error::SyntaxError(format!(
                    "{form}: malformed binding {item}, expected (name expr)"
                )));
            }
        }
    }
    Ok((names, exprs))
}

/// An interpreter instance: a global environment, the native-procedure
/// namespace, and the machine registers.
pub struct Interpreter {
    regs: Registers,
    global: Env,
    natives: HashMap<Symbol, Value>,
    output: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("pc", &self.regs.pc)
            .field("global", &self.global)
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl Interpreter {
    /// Create an interpreter with the builtin native library installed.
    pub fn new() -> Self {
        let global = Environment::global();
        let mut interp = Interpreter {
            regs: Registers::new(Value::Nothing, Rc::clone(&global)),
            global,
            natives: HashMap::new(),
            output: Box::new(std::io::stdout()),
        };
        for op in get_builtin_ops() {
            interp.install_native(NativeProcedure::new(op.scheme_id, op.arity, op.func));
        }
        interp
    }

    pub fn global(&self) -> &Env {
        &self.global
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Direct register access for natives that re-enter the trampoline.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub(crate) fn swap_registers(&mut self, regs: Registers) -> Registers {
        std::mem::replace(&mut self.regs, regs)
    }

    /// Redirect what `display` and `newline` write.
    pub fn set_output(&mut self, output: impl Write + 'static) {
        self.output = Box::new(output);
    }

    pub(crate) fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    /// Look up a native procedure by name.
    pub fn native(&self, name: &str) -> Option<&Value> {
        self.natives.get(&Symbol::new(name))
    }

    /// Names of every installed native procedure, sorted.
    pub fn native_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.natives.keys().map(Symbol::as_str).collect();
        names.sort_unstable();
        names
    }

    fn install_native(&mut self, native: NativeProcedure) {
        trace!(name = native.name(), arity = %native.arity(), "registering native");
        self.natives.insert(
            Symbol::new(native.name()),
            Value::Native(Rc::new(native)),
        );
    }

    /// Register a native procedure. `func` either returns
    /// [`Outcome::Return`] or writes the registers itself and returns
    /// [`Outcome::Reenter`]. Fails when `max` is below `min`.
    ///
    /// ```
    /// use cpscheme::Interpreter;
    /// use cpscheme::evaluator::Outcome;
    /// use cpscheme::ast::val;
    ///
    /// let mut interp = Interpreter::new();
    /// interp
    ///     .register("argc", 0, None, |_, args| Ok(Outcome::Return(val(args.len()))))
    ///     .unwrap();
    /// let result = interp.eval_str("(argc 1 2 3)").unwrap();
    /// assert_eq!(result, val(3));
    /// ```
    pub fn register<F>(
        &mut self,
        name: &str,
        min: usize,
        max: Option<usize>,
        func: F,
    ) -> Result<(), Error>
    where
        F: Fn(&mut Interpreter, Vec<Value>) -> Result<Outcome, Error> + 'static,
    {
        let arity = Arity::from_bounds(min, max).ok_or_else(|| {
            Error::EvalError(format!(
                "cannot register {name}: maximum arity {} is below minimum {min}",
                max.unwrap_or_default()
            ))
        })?;
        let func: Rc<NativeFn> = Rc::new(func);
        self.install_native(NativeProcedure::new(name, arity, func));
        Ok(())
    }

    /// Register a strongly-typed fixed-arity Rust function.
    ///
    /// ```
    /// use cpscheme::Interpreter;
    /// use cpscheme::ast::val;
    ///
    /// fn average(a: f64, b: f64) -> f64 {
    ///     (a + b) / 2.0
    /// }
    ///
    /// let mut interp = Interpreter::new();
    /// interp.register_operation::<(f64, f64), _>("average", average);
    /// assert_eq!(interp.eval_str("(average 3 4)").unwrap(), val(3.5));
    /// ```
    pub fn register_operation<Args, F>(&mut self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        let arity = <F as IntoOperation<Args>>::arity();
        let func = func.into_operation(name);
        self.install_native(NativeProcedure::new(name, arity, func));
    }

    /// Register a Rust function whose last parameter collects the remaining
    /// arguments through one of the typed iterators ([`NumIter`],
    /// [`ValueIter`], [`StringIter`], [`BoolIter`]).
    pub fn register_variadic_operation<Args, F>(&mut self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        let func = func.into_variadic_operation(name);
        self.install_native(NativeProcedure::new(name, arity, func));
    }

    // =================================================================
    // Drivers
    // =================================================================

    /// Seed the registers for single-stepping `expr` in the global environment.
    pub fn start(&mut self, expr: Value) {
        self.regs = Registers::new(expr, Rc::clone(&self.global));
    }

    /// Run one step function.
    pub fn step(&mut self) -> StepOutcome {
        match self.step_once() {
            Ok(Control::Continue) => StepOutcome::Continue,
            Ok(Control::Halt(value)) => StepOutcome::Done(value),
            Err(e) => StepOutcome::Failed(e),
        }
    }

    fn step_once(&mut self) -> Result<Control, Error> {
        match self.regs.pc {
            Pc::Valueof => self.valueof(),
            Pc::ApplyK => self.apply_k(),
            Pc::MapValueof => self.map_valueof(),
            Pc::ApplyProc => self.apply_proc(),
        }
    }

    /// Step the current registers until the empty continuation receives a value.
    pub(crate) fn run(&mut self) -> Result<Value, Error> {
        loop {
            if let Control::Halt(value) = self.step_once()? {
                return Ok(value);
            }
        }
    }

    /// Run `f` against fresh registers, restoring the caller's afterwards
    /// whether or not `f` fails.
    pub(crate) fn with_fresh_registers<T>(
        &mut self,
        f: impl FnOnce(&mut Interpreter) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let fresh = Registers::new(Value::Nothing, Rc::clone(&self.global));
        let saved = self.swap_registers(fresh);
        let result = f(self);
        self.regs = saved;
        result
    }

    /// Evaluate `expr` in the global environment to completion.
    pub fn eval(&mut self, expr: &Value) -> Result<Value, Error> {
        let global = Rc::clone(&self.global);
        self.eval_in(expr, &global)
    }

    /// Evaluate `expr` in `env` to completion. The in-flight registers are
    /// saved first and restored afterwards, so this may be called from inside
    /// a native procedure.
    pub fn eval_in(&mut self, expr: &Value, env: &Env) -> Result<Value, Error> {
        debug!(%expr, "synchronous evaluation started");
        let saved = self.swap_registers(Registers::new(expr.clone(), Rc::clone(env)));
        let result = self.run();
        self.regs = saved;
        match &result {
            Ok(value) => debug!(%value, "synchronous evaluation finished"),
            Err(e) => debug!(error = %e, "synchronous evaluation failed"),
        }
        result
    }

    /// Parse and evaluate every expression in `text`, returning the last result.
    pub fn eval_str(&mut self, text: &str) -> Result<Value, Error> {
        let global = Rc::clone(&self.global);
        self.eval_all(Parser::new(text)?, &global).map(|(value, _)| value)
    }

    fn eval_all(&mut self, parser: Parser, env: &Env) -> Result<(Value, usize), Error> {
        let mut last = Value::Nothing;
        let mut count = 0;
        for expr in parser {
            last = self.eval_in(&expr, env)?;
            count += 1;
        }
        Ok((last, count))
    }

    /// Evaluate a source file in the global environment.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let global = Rc::clone(&self.global);
        self.load_in(path, &global)
    }

    /// Parse a whole file, then evaluate its expressions in order in `env`.
    pub fn load_in(&mut self, path: impl AsRef<Path>, env: &Env) -> Result<Value, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("{}: {e}", path.display())))?;
        let parser = Parser::new(&text)?;
        let (value, count) = self.eval_all(parser, env)?;
        info!(path = %path.display(), expressions = count, "loaded file");
        Ok(value)
    }

    /// Apply any callable to `args` from host code.
    pub fn call(&mut self, procedure: &Value, args: Vec<Value>) -> Result<Value, Error> {
        match procedure {
            Value::Native(native) => native.apply(self, args),
            Value::Closure(closure) => Interpreted(Rc::clone(closure)).apply(self, args),
            Value::Continuation(k) => {
                let k = k.clone();
                self.with_fresh_registers(|interp| {
                    interp.regs.kont = k;
                    interp.regs.deliver(args.into_iter().next().unwrap_or(Value::Nothing));
                    interp.run()
                })
            }
            other => Err(Error::TypeError(format!(
                "cannot apply {}: {other}",
                other.type_name()
            ))),
        }
    }

    /// Prepare `expr` for cooperative time-sliced evaluation. `on_complete`
    /// receives the final value or error exactly once.
    pub fn eval_sliced(
        &self,
        expr: Value,
        config: SliceConfig,
        on_complete: impl FnOnce(Result<Value, Error>) + 'static,
    ) -> SlicedEvaluation {
        SlicedEvaluation::new(
            Registers::new(expr, Rc::clone(&self.global)),
            config,
            on_complete,
        )
    }

    // =================================================================
    // Step functions
    // =================================================================

    fn resolve(&self, name: &Symbol) -> Result<Value, Error> {
        if let Some(value) = self.regs.env.lookup_chain(name)? {
            return Ok(value);
        }
        if let Some(native) = self.natives.get(name) {
            return Ok(native.clone());
        }
        if SpecialForm::from_name(name.as_str()).is_some() {
            return Err(Error::SyntaxError(format!(
                "{name} is a syntax keyword, not a variable"
            )));
        }
        Err(Error::UnboundVariable(name.to_string()))
    }

    fn valueof(&mut self) -> Result<Control, Error> {
        let expr = std::mem::replace(&mut self.regs.expr, Value::Nothing);
        match expr {
            Value::Symbol(name) => {
                let value = self.resolve(&name)?;
                self.regs.deliver(value);
            }
            Value::Pair(pair) => {
                let head = pair.car();
                let operands = pair.cdr();
                if let Value::Symbol(name) = &head
                    && let Some(form) = SpecialForm::from_name(name.as_str())
                    && self.regs.env.lookup_chain(name)?.is_none()
                {
                    return self.special_form(form, name, operands);
                }
                if operands.is_cyclic() {
                    return Err(Error::TypeError(
                        "cannot apply a procedure to a circular operand list".into(),
                    ));
                }
                if !operands.is_list() {
                    return Err(Error::SyntaxError(format!(
                        "improper application list: {}",
                        Value::Pair(pair)
                    )));
                }
                let env = Rc::clone(&self.regs.env);
                let next = self.regs.kont.clone();
                self.regs.push(Frame::Operator {
                    operands,
                    env,
                    next,
                });
                self.regs.eval_next(head);
            }
            Value::Nil => return Err(Error::SyntaxError("empty application ()".into())),
            vector @ Value::Vector(_) => {
                return Err(Error::SyntaxError(format!(
                    "unquoted vector literal {vector}; vectors are data, quote them"
                )));
            }
            other => self.regs.deliver(other),
        }
        Ok(Control::Continue)
    }

    fn special_form(
        &mut self,
        form: SpecialForm,
        keyword: &Symbol,
        operands: Value,
    ) -> Result<Control, Error> {
        let args = operands
            .list_to_vec()
            .ok_or_else(|| Error::SyntaxError(format!("malformed {keyword} form")))?;
        let env = Rc::clone(&self.regs.env);
        let next = self.regs.kont.clone();

        match (form, args.as_slice()) {
            (SpecialForm::Quote, [datum]) => self.regs.deliver(datum.clone()),
            (SpecialForm::Quote, _) => {
                return Err(Error::SyntaxError(format!(
                    "quote expects exactly 1 operand, got {}",
                    args.len()
                )));
            }

            (SpecialForm::Lambda, [params, body]) => {
                let params = Params::parse(params)?;
                let closure = Closure::new(params, body.clone(), env);
                self.regs.deliver(Value::Closure(Rc::new(closure)));
            }
            (SpecialForm::Lambda, _) => {
                return Err(Error::SyntaxError(
                    "lambda expects a parameter list and exactly one body expression".into(),
                ));
            }

            (SpecialForm::Let, [bindings, body]) => {
                let (names, exprs) = parse_bindings("let", bindings)?;
                if names.is_empty() {
                    self.regs.eval_next(body.clone());
                } else {
                    self.regs.push(Frame::Let {
                        names: names.into(),
                        body: body.clone(),
                        env,
                        next,
                    });
                    self.start_map(Value::list(exprs));
                }
            }
            (SpecialForm::Letrec, [bindings, body]) => {
                let (names, exprs) = parse_bindings("letrec", bindings)?;
                if names.is_empty() {
                    self.regs.eval_next(body.clone());
                } else {
                    let frame = env.extend_with(
                        names
                            .iter()
                            .map(|name| (name.clone(), Value::Uninitialized(name.clone()))),
                    );
                    self.regs.env = Rc::clone(&frame);
                    self.regs.push(Frame::Letrec {
                        names: names.into(),
                        body: body.clone(),
                        env: frame,
                        next,
                    });
                    self.start_map(Value::list(exprs));
                }
            }
            (SpecialForm::Let | SpecialForm::Letrec, _) => {
                return Err(Error::SyntaxError(format!(
                    "{keyword} expects a binding list and exactly one body expression"
                )));
            }

            (SpecialForm::Begin, []) => self.regs.deliver(Value::Nothing),
            (SpecialForm::Begin, [only]) => self.regs.eval_next(only.clone()),
            (SpecialForm::Begin, [first, rest @ ..]) => {
                self.regs.push(Frame::Begin {
                    rest: Value::list(rest.to_vec()),
                    env,
                    next,
                });
                self.regs.eval_next(first.clone());
            }

            (SpecialForm::If, [test, consequent, alternative @ ..]) if alternative.len() <= 1 => {
                self.regs.push(Frame::If {
                    consequent: consequent.clone(),
                    alternative: alternative.first().cloned(),
                    env,
                    next,
                });
                self.regs.eval_next(test.clone());
            }
            (SpecialForm::If, _) => {
                return Err(Error::SyntaxError(format!(
                    "if expects 2 or 3 operands, got {}",
                    args.len()
                )));
            }

            (SpecialForm::Assign, [Value::Symbol(name), value]) => {
                self.regs.push(Frame::Assign {
                    name: name.clone(),
                    env,
                    next,
                });
                self.regs.eval_next(value.clone());
            }
            (SpecialForm::Assign, _) => {
                return Err(Error::SyntaxError(format!(
                    "{keyword} expects a symbol and one expression"
                )));
            }

            (SpecialForm::CallCc, [receiver]) => {
                self.regs.push(Frame::CallCc { next });
                self.regs.eval_next(receiver.clone());
            }
            (SpecialForm::CallCc, _) => {
                return Err(Error::SyntaxError(format!(
                    "{keyword} expects exactly 1 operand, got {}",
                    args.len()
                )));
            }

            (SpecialForm::Letcc, [Value::Symbol(name), body]) => {
                self.regs.env = env.extend_with([(name.clone(), Value::Continuation(next))]);
                self.regs.eval_next(body.clone());
            }
            (SpecialForm::Letcc, _) => {
                return Err(Error::SyntaxError(
                    "letcc expects a name and exactly one body expression".into(),
                ));
            }

            (SpecialForm::And, []) => self.regs.deliver(Value::Bool(true)),
            (SpecialForm::Or, []) => self.regs.deliver(Value::Bool(false)),
            (SpecialForm::And | SpecialForm::Or, [only]) => self.regs.eval_next(only.clone()),
            (SpecialForm::And, [first, rest @ ..]) => {
                self.regs.push(Frame::And {
                    rest: Value::list(rest.to_vec()),
                    env,
                    next,
                });
                self.regs.eval_next(first.clone());
            }
            (SpecialForm::Or, [first, rest @ ..]) => {
                self.regs.push(Frame::Or {
                    rest: Value::list(rest.to_vec()),
                    env,
                    next,
                });
                self.regs.eval_next(first.clone());
            }
        }
        Ok(Control::Continue)
    }

    /// Begin evaluating `exprs` left to right in the current environment.
    fn start_map(&mut self, exprs: Value) {
        self.regs.exprs = exprs;
        self.regs.acc = Value::Nil;
        self.regs.pc = Pc::MapValueof;
    }

    fn map_valueof(&mut self) -> Result<Control, Error> {
        match std::mem::replace(&mut self.regs.exprs, Value::Nil) {
            Value::Nil => {
                let acc = std::mem::replace(&mut self.regs.acc, Value::Nil);
                self.regs.deliver(reverse_list(acc));
            }
            Value::Pair(pair) => {
                let done = std::mem::replace(&mut self.regs.acc, Value::Nil);
                let env = Rc::clone(&self.regs.env);
                let next = self.regs.kont.clone();
                self.regs.push(Frame::MapNext {
                    remaining: pair.cdr(),
                    done,
                    env,
                    next,
                });
                self.regs.eval_next(pair.car());
            }
            other => {
                return Err(Error::InternalFault(format!(
                    "expression list cursor is not a list: {other}"
                )));
            }
        }
        Ok(Control::Continue)
    }

    fn apply_k(&mut self) -> Result<Control, Error> {
        let kont = self.regs.kont.clone();
        let val = std::mem::replace(&mut self.regs.val, Value::Nothing);

        match kont.frame() {
            Frame::Empty => return Ok(Control::Halt(val)),

            Frame::Operator {
                operands,
                env,
                next,
            } => {
                let operator = single(val, "operator")?;
                self.regs.env = Rc::clone(env);
                self.regs.push(Frame::Operands {
                    operator,
                    next: next.clone(),
                });
                self.start_map(operands.clone());
            }

            Frame::Operands { operator, next } => {
                let args = val.list_to_vec().ok_or_else(|| {
                    Error::InternalFault(format!("evaluated operands are not a list: {val}"))
                })?;
                self.regs.operator = operator.clone();
                self.regs.args = args;
                self.regs.kont = next.clone();
                self.regs.pc = Pc::ApplyProc;
            }

            Frame::MapNext {
                remaining,
                done,
                env,
                next,
            } => {
                let value = single(val, "operand")?;
                self.regs.acc = Value::cons(value, done.clone());
                self.regs.exprs = remaining.clone();
                self.regs.env = Rc::clone(env);
                self.regs.kont = next.clone();
                self.regs.pc = Pc::MapValueof;
            }

            Frame::If {
                consequent,
                alternative,
                env,
                next,
            } => {
                let test = single(val, "if test")?;
                self.regs.env = Rc::clone(env);
                self.regs.kont = next.clone();
                match (test.is_truthy(), alternative) {
                    (true, _) => self.regs.eval_next(consequent.clone()),
                    (false, Some(alternative)) => self.regs.eval_next(alternative.clone()),
                    (false, None) => self.regs.deliver(Value::Nothing),
                }
            }

            Frame::Begin { rest, env, next } => {
                self.regs.env = Rc::clone(env);
                self.resume_sequence(rest, next, |rest, env, next| Frame::Begin {
                    rest,
                    env,
                    next,
                })?;
            }

            Frame::Assign { name, env, next } => {
                let value = single(val, name.as_str())?;
                env.assign_chain(name.clone(), value);
                self.regs.env = Rc::clone(env);
                self.regs.kont = next.clone();
                self.regs.deliver(Value::Nothing);
            }

            Frame::Let {
                names,
                body,
                env,
                next,
            } => {
                let values = self.bound_values(&val, names.len())?;
                self.regs.env = env.extend_with(names.iter().cloned().zip(values));
                self.regs.kont = next.clone();
                self.regs.eval_next(body.clone());
            }

            Frame::Letrec {
                names,
                body,
                env,
                next,
            } => {
                let values = self.bound_values(&val, names.len())?;
                for (name, value) in names.iter().cloned().zip(values) {
                    env.assign_local(name, value);
                }
                self.regs.env = Rc::clone(env);
                self.regs.kont = next.clone();
                self.regs.eval_next(body.clone());
            }

            Frame::CallCc { next } => {
                let receiver = single(val, "call/cc")?;
                match &receiver {
                    Value::Closure(closure) if closure.params().arity().accepts(1) => {}
                    other => {
                        return Err(Error::TypeError(format!(
                            "call/cc expects a procedure of one argument, got {}",
                            other.type_name()
                        )));
                    }
                }
                self.regs.operator = receiver;
                self.regs.args = vec![Value::Continuation(next.clone())];
                self.regs.kont = next.clone();
                self.regs.pc = Pc::ApplyProc;
            }

            Frame::CallWithValues { consumer, next } => {
                self.regs.args = match val {
                    Value::MultipleValues(values) => values.to_vec(),
                    Value::Nothing => Vec::new(),
                    value => vec![value],
                };
                self.regs.operator = consumer.clone();
                self.regs.kont = next.clone();
                self.regs.pc = Pc::ApplyProc;
            }

            Frame::And { rest, env, next } => {
                let test = single(val, "and")?;
                if test.is_truthy() {
                    self.regs.env = Rc::clone(env);
                    self.resume_sequence(rest, next, |rest, env, next| Frame::And {
                        rest,
                        env,
                        next,
                    })?;
                } else {
                    self.regs.kont = next.clone();
                    self.regs.deliver(test);
                }
            }

            Frame::Or { rest, env, next } => {
                let test = single(val, "or")?;
                if test.is_truthy() {
                    self.regs.kont = next.clone();
                    self.regs.deliver(test);
                } else {
                    self.regs.env = Rc::clone(env);
                    self.resume_sequence(rest, next, |rest, env, next| Frame::Or {
                        rest,
                        env,
                        next,
                    })?;
                }
            }
        }
        Ok(Control::Continue)
    }

    /// Evaluate the head of the non-empty sequence `rest`, re-pushing a frame
    /// built by `frame` unless the head is the last element (tail position).
    fn resume_sequence(
        &mut self,
        rest: &Value,
        next: &Kont,
        frame: impl FnOnce(Value, Env, Kont) -> Frame,
    ) -> Result<(), Error> {
        let Value::Pair(pair) = rest else {
            return Err(Error::InternalFault(format!(
                "pending sequence is not a non-empty list: {rest}"
            )));
        };
        let tail = pair.cdr();
        if tail.is_nil() {
            self.regs.kont = next.clone();
        } else {
            let env = Rc::clone(&self.regs.env);
            self.regs.kont = Kont::new(frame(tail, env, next.clone()));
        }
        self.regs.eval_next(pair.car());
        Ok(())
    }

    fn bound_values(&self, val: &Value, expected: usize) -> Result<Vec<Value>, Error> {
        match val.list_to_vec() {
            Some(values) if values.len() == expected => Ok(values),
            _ => Err(Error::InternalFault(format!(
                "expected {expected} binding values, got {val}"
            ))),
        }
    }

    fn apply_proc(&mut self) -> Result<Control, Error> {
        let operator = std::mem::replace(&mut self.regs.operator, Value::Nothing);
        let args = std::mem::take(&mut self.regs.args);

        match operator {
            Value::Closure(closure) => {
                closure
                    .params()
                    .arity()
                    .validate(&closure.describe(), args.len())?;
                self.regs.env = closure.env().extend_with(closure.params().bind(args));
                self.regs.eval_next(closure.body().clone());
            }
            Value::Native(native) => {
                if let Outcome::Return(value) = native.invoke(self, args)? {
                    self.regs.deliver(value);
                }
            }
            Value::Continuation(k) => {
                // Surplus arguments are dropped
                let value = args.into_iter().next().unwrap_or(Value::Nothing);
                self.regs.kont = k;
                self.regs.deliver(value);
            }
            other => {
                return Err(Error::TypeError(format!(
                    "cannot apply {}: {other}",
                    other.type_name()
                )));
            }
        }
        Ok(Control::Continue)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::scheme::parse_scheme;

    /// Test result variants for data-driven cases
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with a value `equal?` to this
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;
    use crate::Error;

    /// Test cases sharing one interpreter
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Setup expressions such as `define` return the void value
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Nothing))
        };
    }

    fn execute_test_case(input: &str, expected: &TestResult, interp: &mut Interpreter, test_id: &str) {
        let expr = match parse_scheme(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (interp.eval(&expr), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert!(
                    actual.is_equal(expected_val),
                    "{test_id}: '{input}' expected {expected_val:?}, got {actual:?}"
                );
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: '{input}' error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: '{input}' expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: '{input}' expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let mut interp = Interpreter::new();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &mut interp, &test_id);
            }
        }
    }

    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let mut interp = Interpreter::new();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &mut interp, &test_id);
        }
    }

    #[test]
    fn test_special_forms_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING ===
            ("42", success(42)),
            ("-2.5", success(-2.5)),
            ("#t", success(true)),
            ("\"hello\"", success("hello")),
            ("#\\a", success('a')),
            ("#(1 2)", SpecificError("SyntaxError")),
            ("()", SpecificError("SyntaxError")),
            // === VARIABLES ===
            ("undefined-name", SpecificError("Unbound variable: undefined-name")),
            ("lambda", SpecificError("syntax keyword")),
            // === QUOTE ===
            ("(quote x)", EvalResult(sym("x"))),
            ("'(1 2 3)", success([1, 2, 3])),
            ("'#(1 2)", EvalResult(Value::vector(vec![val(1), val(2)]))),
            ("(quote)", SpecificError("quote expects exactly 1 operand")),
            ("(quote a b)", SpecificError("quote expects exactly 1 operand")),
            // === LAMBDA ===
            ("((lambda (x y) (+ x y)) 3 4)", success(7)),
            ("((lambda args args) 1 2 3)", success([1, 2, 3])),
            ("((lambda args args))", EvalResult(nil())),
            ("((lambda (a . rest) rest) 1 2 3)", success([2, 3])),
            ("((lambda (a . rest) rest) 1)", EvalResult(nil())),
            ("((lambda () 5))", success(5)),
            ("(lambda (x))", SpecificError("exactly one body")),
            ("(lambda (x) x x)", SpecificError("exactly one body")),
            ("(lambda (1) x)", SpecificError("must be a symbol")),
            ("(lambda (x x) x)", SpecificError("duplicate")),
            ("((lambda (x y) x) 1)", SpecificError("ArityError: (lambda (x y)) expects exactly 2")),
            ("((lambda (x) x) 1 2)", SpecificError("ArityError")),
            ("((lambda (a . rest) a))", SpecificError("at least 1")),
            // === LET ===
            ("(let ((x 2) (y 3)) (+ x y))", success(5)),
            ("(let ((x 5) (y 3)) (let ((x 2)) (+ x y)))", success(5)),
            ("(let () 9)", success(9)),
            ("(let ((x 1)) (let ((x 2) (y x)) y))", success(1)), // right-hand sides see the outer x
            ("(let ((x 1) (x 2)) x)", SpecificError("duplicate binding")),
            ("(let ((x)) x)", SpecificError("malformed binding")),
            ("(let ((x 1)) x x)", SpecificError("SyntaxError")),
            ("(let x 1)", SpecificError("SyntaxError")),
            // === LETREC ===
            (
                "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1))))) (odd? (lambda (n) (if (= n 0) #f (even? (- n 1)))))) (even? 100))",
                success(true),
            ),
            ("(letrec ((fact (lambda (n) (if (= n 0) 1 (* n (fact (- n 1))))))) (fact 10))", success(3628800)),
            ("(letrec ((x (+ x 5))) x)", SpecificError("LetrecOrderError: x")),
            ("(letrec ((a b) (b 1)) a)", SpecificError("LetrecOrderError: b")),
            ("(letrec ((f (lambda () g)) (g 2)) (f))", success(2)), // reference under lambda is fine
            ("(letrec () 3)", success(3)),
            // === BEGIN ===
            ("(begin)", EvalResult(Value::Nothing)),
            ("(begin 1 2 3)", success(3)),
            ("(begin (define x 1) (set! x (+ x 1)) x)", success(2)),
            // === IF ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if 0 1 2)", success(1)),   // only #f is false
            ("(if '() 1 2)", success(1)), // the empty list is true
            ("(if #f 1)", EvalResult(Value::Nothing)),
            ("(if #t)", SpecificError("if expects 2 or 3 operands")),
            ("(if #t 1 2 3)", SpecificError("if expects 2 or 3 operands")),
            ("(if (values 1 2) 1 2)", SpecificError("if test: expected a single value")),
            // === SET! / DEFINE ===
            ("(define 1 2)", SpecificError("expects a symbol")),
            ("(set! x)", SpecificError("expects a symbol")),
            ("(begin (set! fresh 5) fresh)", success(5)),
            // === AND / OR ===
            ("(and)", success(true)),
            ("(or)", success(false)),
            ("(and 1 2 3)", success(3)),
            ("(and 1 #f undefined-name)", success(false)),
            ("(or #f 2 undefined-name)", success(2)),
            ("(or #f #f)", success(false)),
            // === APPLICATION ===
            ("(1 2)", SpecificError("cannot apply number")),
            ("(+ 1 . 2)", SpecificError("improper application list")),
            ("((if #t + -) 3 4)", success(7)),
            ("(list 1 (values 2 3))", SpecificError("operand: expected a single value")),
            // === SHADOWED KEYWORDS ===
            ("(let ((if (lambda (a b c) c))) (if #t 1 2))", success(2)),
            ("(let ((quote -)) (quote 5))", success(-5)),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_natives_resolve_after_environment() {
        let mut interp = Interpreter::new();
        match interp.eval_str("+").unwrap() {
            Value::Native(native) => assert_eq!(native.name(), "+"),
            other => panic!("expected native, got {other:?}"),
        }
        // A global binding hides the native namespace
        assert_eq!(interp.eval_str("(begin (define + -) (+ 5 3))").unwrap(), val(2));
    }

    #[test]
    fn test_closure_state_data_driven() {
        let environments = vec![
            TestEnvironment(vec![
                test_setup!("(define make-counter (lambda () (let ((n 0)) (lambda () (begin (set! n (+ n 1)) n)))))"),
                test_setup!("(define c1 (make-counter))"),
                test_setup!("(define c2 (make-counter))"),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c2)", success(1)),
                ("(c1)", success(3)),
            ]),
            TestEnvironment(vec![
                test_setup!("(define x 10)"),
                test_setup!("(define get-x (lambda () x))"),
                ("(get-x)", success(10)),
                test_setup!("(set! x 20)"),
                ("(get-x)", success(20)),
                // set! inside a closure reaches the global binding
                test_setup!("(define bump (lambda () (set! x (+ x 1))))"),
                test_setup!("(bump)"),
                ("x", success(21)),
            ]),
            TestEnvironment(vec![
                // define inside a lambda body installs globally when unbound
                test_setup!("(define install (lambda () (define made-inside 7)))"),
                test_setup!("(install)"),
                ("made-inside", success(7)),
                // but mutates the parameter when it is bound locally
                test_setup!("(define shadow 1)"),
                ("((lambda (shadow) (begin (set! shadow 99) shadow)) 5)", success(99)),
                ("shadow", success(1)),
            ]),
        ];
        run_tests_in_environment(environments);
    }

    #[test]
    fn test_call_cc_data_driven() {
        let test_cases = vec![
            ("(call/cc (lambda (k) 5))", success(5)),
            ("(call/cc (lambda (k) (begin (k 5) 7)))", success(5)),
            ("(+ 1 (call/cc (lambda (k) (+ 10 (k 2)))))", success(3)),
            ("(call-with-current-continuation (lambda (k) (k 9)))", success(9)),
            ("(letcc k (+ 1 (k 41)))", success(41)),
            ("(+ 1 (letcc k 5))", success(6)),
            ("(call/cc (lambda (k) (k)))", EvalResult(Value::Nothing)),
            // extra values passed to a continuation are dropped
            ("(call/cc (lambda (k) (k 1 2 3)))", success(1)),
            ("(+ 100 (call/cc (lambda (k) (k 1 2))))", success(101)),
            ("(call/cc 5)", SpecificError("call/cc expects a procedure of one argument")),
            ("(call/cc +)", SpecificError("call/cc expects a procedure of one argument")),
            ("(call/cc (lambda (a b) a))", SpecificError("call/cc expects a procedure of one argument")),
            ("(call/cc)", SpecificError("SyntaxError")),
            ("(letcc 1 2)", SpecificError("SyntaxError")),
            // escaping from a loop
            (
                "(call/cc (lambda (return) (letrec ((loop (lambda (n) (if (= n 3) (return 'found) (loop (+ n 1)))))) (loop 0))))",
                EvalResult(sym("found")),
            ),
        ];
        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_continuation_reentry() {
        let environments = vec![TestEnvironment(vec![
            test_setup!("(define saved #f)"),
            // The continuation of the call/cc adds 1 and stores into result
            test_setup!("(define result (+ 1 (call/cc (lambda (k) (begin (set! saved k) 1)))))"),
            ("result", success(2)),
            // Re-entering after the capturing extent returned reruns the define
            test_setup!("(saved 10)"),
            ("result", success(11)),
            // and it can be re-entered again
            test_setup!("(saved 41)"),
            ("result", success(42)),
            ("(procedure? saved)", success(true)),
        ])];
        run_tests_in_environment(environments);
    }

    #[test]
    fn test_generator_style_reentry() {
        let mut interp = Interpreter::new();
        let program = "
            (begin
              (define k-saved #f)
              (define trace '())
              (define n (call/cc (lambda (k) (begin (set! k-saved k) 0))))
              (set! trace (cons n trace))
              (if (< n 3) (k-saved (+ n 1)) trace))";
        // Each re-entry resumes the rest of the begin body
        let result = interp.eval_str(program).unwrap();
        assert!(result.is_equal(&val([3, 2, 1, 0])), "got {result}");
    }

    #[test]
    fn test_multiple_values() {
        let test_cases = vec![
            ("(call-with-values (lambda () (values 3 4)) +)", success(7)),
            ("(call-with-values (lambda () (values)) list)", EvalResult(nil())),
            ("(call-with-values (lambda () 5) list)", success([5])),
            ("(call-with-values (lambda () (values 1 2 3)) (lambda (a b c) (list c b a)))", success([3, 2, 1])),
            ("(values 7)", success(7)),
            ("(values)", EvalResult(Value::Nothing)),
            ("(if (values 1 2) 'yes 'no)", SpecificError("expected a single value")),
            ("(let ((x (values 1 2))) x)", SpecificError("expected a single value")),
            ("(begin (define v #f) (set! v (values 1 2)))", SpecificError("expected a single value")),
            ("((values + -) 1)", SpecificError("operator: expected a single value")),
            ("(call-with-values (lambda () (values 1 2)) (lambda (a) a))", SpecificError("ArityError")),
        ];
        run_comprehensive_tests(test_cases);

        // The container itself is a first-class result at top level
        let mut interp = Interpreter::new();
        let result = interp.eval_str("(values 1 2)").unwrap();
        assert_eq!(result.to_string(), "1 2");
    }

    #[test]
    fn test_tail_calls_run_in_bounded_state() {
        let mut interp = Interpreter::new();
        let result = interp
            .eval_str("(letrec ((loop (lambda (n) (if (= n 0) 'done (loop (- n 1)))))) (loop 1000000))")
            .unwrap();
        assert_eq!(result, sym("done"));

        // Step manually and record the deepest continuation seen
        let max_depth = |n: usize| {
            let mut interp = Interpreter::new();
            let program = format!(
                "(letrec ((loop (lambda (n) (if (= n 0) 'done (loop (- n 1)))))) (loop {n}))"
            );
            interp.start(parse_scheme(&program).unwrap());
            let mut deepest = 0;
            loop {
                deepest = deepest.max(interp.registers().kont.depth());
                match interp.step() {
                    StepOutcome::Continue => {}
                    StepOutcome::Done(v) => {
                        assert_eq!(v, sym("done"));
                        return deepest;
                    }
                    StepOutcome::Failed(e) => panic!("unexpected failure: {e}"),
                }
            }
        };
        assert_eq!(max_depth(10), max_depth(2000));
    }

    #[test]
    fn test_non_tail_recursion_grows_continuation_not_host_stack() {
        let mut interp = Interpreter::new();
        let result = interp
            .eval_str("(letrec ((sum (lambda (n) (if (= n 0) 0 (+ n (sum (- n 1))))))) (sum 100000))")
            .unwrap();
        assert_eq!(result, val(5_000_050_000_i64));
    }

    #[test]
    fn test_step_reports_failure() {
        let mut interp = Interpreter::new();
        interp.start(parse_scheme("(car 5)").unwrap());
        let outcome = loop {
            match interp.step() {
                StepOutcome::Continue => continue,
                other => break other,
            }
        };
        assert!(matches!(outcome, StepOutcome::Failed(Error::TypeError(_))));
    }

    #[test]
    fn test_eval_restores_registers_after_failure() {
        let mut interp = Interpreter::new();
        interp.start(parse_scheme("(+ 1 2)").unwrap());
        assert!(matches!(interp.step(), StepOutcome::Continue));
        let pc_before = interp.registers().pc;
        let depth_before = interp.registers().kont.depth();

        assert!(interp.eval_str("(car '())").is_err());

        assert_eq!(interp.registers().pc, pc_before);
        assert_eq!(interp.registers().kont.depth(), depth_before);
        let result = loop {
            match interp.step() {
                StepOutcome::Continue => continue,
                StepOutcome::Done(v) => break v,
                StepOutcome::Failed(e) => panic!("unexpected failure: {e}"),
            }
        };
        assert_eq!(result, val(3));
    }

    #[test]
    fn test_reentrant_natives() {
        let test_cases = vec![
            ("(apply + '(1 2 3))", success(6)),
            ("(apply + 1 2 '(3 4))", success(10)),
            ("(apply (lambda (a b) (- a b)) '(10 4))", success(6)),
            ("(apply + 1 2)", SpecificError("apply: last argument must be a list")),
            ("(eval '(+ 1 2))", success(3)),
            ("(eval (list 'quote 'x))", EvalResult(sym("x"))),
            ("(let ((x 5)) (eval 'x))", SpecificError("Unbound variable: x")), // eval uses the global env
            ("(call/cc (lambda (k) (apply k '(8 9))))", success(8)),
        ];
        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_register_native_contract() {
        let mut interp = Interpreter::new();
        interp.register("twice", 1, Some(1), |interp, args| {
            // Re-enter the trampoline: apply the argument procedure to 21
            let regs = interp.registers_mut();
            regs.operator = args[0].clone();
            regs.args = vec![val(21)];
            regs.pc = Pc::ApplyProc;
            Ok(Outcome::Reenter)
        })
        .unwrap();
        interp.register("clamp", 1, Some(3), |_, args| {
            let n = match args[0] {
                Value::Number(n) => n,
                _ => return Err(Error::TypeError("clamp: expected number".into())),
            };
            let lo = args.get(1).and_then(|v| f64::try_from(v).ok()).unwrap_or(0.0);
            let hi = args.get(2).and_then(|v| f64::try_from(v).ok()).unwrap_or(1.0);
            Ok(Outcome::Return(val(n.clamp(lo, hi))))
        })
        .unwrap();

        assert_eq!(interp.eval_str("(twice (lambda (x) (* x 2)))").unwrap(), val(42));
        assert_eq!(interp.eval_str("(clamp 5)").unwrap(), val(1));
        assert_eq!(interp.eval_str("(clamp 5 0 10)").unwrap(), val(5));
        match interp.eval_str("(clamp 1 2 3 4)") {
            Err(Error::ArityError { procedure, expected, got }) => {
                assert_eq!(procedure, "clamp");
                assert_eq!(expected, Arity::Range(1, 3));
                assert_eq!(got, 4);
            }
            other => panic!("expected ArityError, got {other:?}"),
        }
        assert!(matches!(interp.eval_str("(twice)"), Err(Error::ArityError { .. })));

        // A maximum below the minimum is refused and nothing is installed
        let backwards = interp.register("backwards", 3, Some(1), |_, _| {
            Ok(Outcome::Return(Value::Nothing))
        });
        assert!(matches!(backwards, Err(Error::EvalError(_))));
        assert!(interp.native("backwards").is_none());
    }

    #[test]
    fn test_register_typed_operations() {
        fn scale(factor: f64, nums: NumIter<'_>) -> Value {
            Value::list(nums.map(|n| val(n * factor)).collect())
        }
        let mut interp = Interpreter::new();
        interp.register_operation::<(f64, f64), _>("hypot", |a: f64, b: f64| (a * a + b * b).sqrt());
        interp.register_variadic_operation::<(f64, NumIter<'static>), _>("scale", Arity::AtLeast(1), scale);

        assert_eq!(interp.eval_str("(hypot 3 4)").unwrap(), val(5));
        assert!(interp.eval_str("(scale 2 1 2 3)").unwrap().is_equal(&val([2, 4, 6])));
        assert!(matches!(interp.eval_str("(hypot 3)"), Err(Error::ArityError { .. })));
        assert!(matches!(interp.eval_str("(scale 2 'a)"), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_host_call() {
        let mut interp = Interpreter::new();
        let add = interp.native("+").cloned().unwrap();
        assert_eq!(interp.call(&add, vec![val(1), val(2)]).unwrap(), val(3));

        let closure = interp.eval_str("(lambda (x y) (* x y))").unwrap();
        assert_eq!(interp.call(&closure, vec![val(6), val(7)]).unwrap(), val(42));
        assert!(matches!(
            interp.call(&closure, vec![val(6)]),
            Err(Error::ArityError { .. })
        ));

        let apply = interp.native("apply").cloned().unwrap();
        assert_eq!(
            interp.call(&apply, vec![add.clone(), val([4, 5])]).unwrap(),
            val(9)
        );

        let k = interp.eval_str("(call/cc (lambda (k) k))").unwrap();
        // Resuming the top-level continuation just yields the value
        assert_eq!(interp.call(&k, vec![val(11), val(12)]).unwrap(), val(11));

        assert!(matches!(interp.call(&val(1), vec![]), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_uncaught_errors_abort_whole_evaluation() {
        let mut interp = Interpreter::new();
        let result = interp.eval_str("(begin (define before 1) (error \"boom\" 42) (define after 2))");
        match result {
            Err(Error::EvalError(msg)) => assert_eq!(msg, "boom 42"),
            other => panic!("expected EvalError, got {other:?}"),
        }
        assert_eq!(interp.eval_str("before").unwrap(), val(1));
        assert!(matches!(interp.eval_str("after"), Err(Error::UnboundVariable(_))));
    }
}
