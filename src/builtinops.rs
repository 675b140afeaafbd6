//! Native procedure library.
//!
//! Every native is described once in a [`BuiltinOp`] table entry holding its
//! Scheme identifier, arity, and erased host function. Most natives are plain
//! typed Rust functions wired through the adapter layer in
//! [`crate::evaluator::intooperation`]:
//!
//! ```scheme
//! (+ 1 2 3)               ; arithmetic over floating-point numbers
//! (vector-ref #(1 2 3) 0) ; structural access, TypeError on the wrong variant
//! (equal? '(1 2) '(1 2))  ; structural equality
//! ```
//!
//! A few natives need control over the machine instead of returning a value:
//! `apply`, `eval` and `call-with-values` write the registers and re-enter
//! the trampoline, and `display`/`newline` write to the interpreter's output.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`Value`, `f64`,
//!    `usize`, `char`, `Symbol`) and optionally a trailing iterator parameter
//!    (`NumIter`, `ValueIter`, `StringIter`, `BoolIter`) for rest arguments
//! 2. **Add a table entry** to [`get_builtin_ops`] with `fixed`, `variadic`,
//!    or `reentrant`
//! 3. **Add tests** covering edge cases and error conditions

use std::rc::Rc;

use crate::Error;
use crate::ast::{NumberType, Symbol, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation};
use crate::evaluator::{
    Arity, Frame, Interpreter, Kont, NativeFn, NumIter, Outcome, Pc, StringIter, ValueIter,
};

/// Definition of a native procedure
#[derive(Clone)]
pub(crate) struct BuiltinOp {
    /// The Scheme identifier for this operation
    pub scheme_id: &'static str,
    /// Expected number of arguments, checked before `func` runs
    pub arity: Arity,
    pub func: Rc<NativeFn>,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinOp({}, {})", self.scheme_id, self.arity)
    }
}

fn type_error(procedure: &str, expected: &str, got: &Value) -> Error {
    Error::TypeError(format!(
        "{procedure}: expected {expected}, got {}",
        got.type_name()
    ))
}

//
// Arithmetic
//

macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumIter<'_>) -> bool {
            // Chain comparisons: all adjacent pairs must satisfy the comparison
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_num_eq, ==);
numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

fn builtin_add(args: NumIter<'_>) -> NumberType {
    args.sum()
}

fn builtin_mul(args: NumIter<'_>) -> NumberType {
    args.product()
}

fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> NumberType {
    if rest.len() == 0 {
        return -first;
    }
    rest.fold(first, |acc, n| acc - n)
}

fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut rest = rest.peekable();
    if rest.peek().is_none() {
        return divide(1.0, first);
    }
    rest.try_fold(first, divide)
}

fn divide(dividend: NumberType, divisor: NumberType) -> Result<NumberType, Error> {
    if divisor == 0.0 {
        return Err(Error::EvalError("division by zero".into()));
    }
    Ok(dividend / divisor)
}

fn builtin_max(first: NumberType, rest: NumIter<'_>) -> NumberType {
    rest.fold(first, NumberType::max)
}

fn builtin_min(first: NumberType, rest: NumIter<'_>) -> NumberType {
    rest.fold(first, NumberType::min)
}

fn builtin_abs(n: NumberType) -> NumberType {
    n.abs()
}

//
// Predicates and equality
//

macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(value: Value) -> bool {
            matches!(value, $pattern)
        }
    };
}

type_predicate!(builtin_is_number, Value::Number(_));
type_predicate!(builtin_is_boolean, Value::Bool(_));
type_predicate!(builtin_is_symbol, Value::Symbol(_));
type_predicate!(builtin_is_string, Value::String(_));
type_predicate!(builtin_is_char, Value::Char(_));
type_predicate!(builtin_is_pair, Value::Pair(_));
type_predicate!(builtin_is_null, Value::Nil);
type_predicate!(builtin_is_vector, Value::Vector(_));

fn builtin_is_procedure(value: Value) -> bool {
    value.is_procedure()
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_eq(first: Value, second: Value) -> bool {
    first.is_eq(&second)
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first.is_equal(&second)
}

//
// Pairs and lists
//

fn builtin_cons(car: Value, cdr: Value) -> Value {
    Value::cons(car, cdr)
}

fn builtin_car(value: Value) -> Result<Value, Error> {
    match value {
        Value::Pair(pair) => Ok(pair.car()),
        other => Err(type_error("car", "pair", &other)),
    }
}

fn builtin_cdr(value: Value) -> Result<Value, Error> {
    match value {
        Value::Pair(pair) => Ok(pair.cdr()),
        other => Err(type_error("cdr", "pair", &other)),
    }
}

fn builtin_set_car(target: Value, value: Value) -> Result<Value, Error> {
    match target {
        Value::Pair(pair) => {
            pair.set_car(value);
            Ok(Value::Nothing)
        }
        other => Err(type_error("set-car!", "pair", &other)),
    }
}

fn builtin_set_cdr(target: Value, value: Value) -> Result<Value, Error> {
    match target {
        Value::Pair(pair) => {
            pair.set_cdr(value);
            Ok(Value::Nothing)
        }
        other => Err(type_error("set-cdr!", "pair", &other)),
    }
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::list(args.cloned().collect())
}

fn builtin_length(list: Value) -> Result<usize, Error> {
    list.list_to_vec()
        .map(|items| items.len())
        .ok_or_else(|| type_error("length", "proper list", &list))
}

//
// Vectors
//

fn builtin_vector(args: ValueIter<'_>) -> Value {
    Value::vector(args.cloned().collect())
}

fn builtin_make_vector(size: usize, mut fill: ValueIter<'_>) -> Result<Value, Error> {
    let fill = fill.next().cloned().unwrap_or(Value::Number(0.0));
    let mut items = Vec::new();
    items.try_reserve_exact(size).map_err(|_| {
        Error::EvalError(format!("make-vector: cannot allocate {size} elements"))
    })?;
    items.resize(size, fill);
    Ok(Value::vector(items))
}

fn builtin_vector_length(vector: Value) -> Result<usize, Error> {
    match vector {
        Value::Vector(items) => Ok(items.borrow().len()),
        other => Err(type_error("vector-length", "vector", &other)),
    }
}

fn out_of_range(procedure: &str, index: usize, len: usize) -> Error {
    Error::EvalError(format!(
        "{procedure}: index {index} out of range for length {len}"
    ))
}

fn builtin_vector_ref(vector: Value, index: usize) -> Result<Value, Error> {
    match vector {
        Value::Vector(items) => {
            let items = items.borrow();
            items
                .get(index)
                .cloned()
                .ok_or_else(|| out_of_range("vector-ref", index, items.len()))
        }
        other => Err(type_error("vector-ref", "vector", &other)),
    }
}

fn builtin_vector_set(vector: Value, index: usize, value: Value) -> Result<Value, Error> {
    match vector {
        Value::Vector(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| out_of_range("vector-set!", index, len))?;
            *slot = value;
            Ok(Value::Nothing)
        }
        other => Err(type_error("vector-set!", "vector", &other)),
    }
}

//
// Strings and symbols
//

fn builtin_string_length(string: Value) -> Result<usize, Error> {
    match string {
        Value::String(s) => Ok(s.borrow().chars().count()),
        other => Err(type_error("string-length", "string", &other)),
    }
}

fn builtin_string_ref(string: Value, index: usize) -> Result<char, Error> {
    match string {
        Value::String(s) => {
            let s = s.borrow();
            s.chars()
                .nth(index)
                .ok_or_else(|| out_of_range("string-ref", index, s.chars().count()))
        }
        other => Err(type_error("string-ref", "string", &other)),
    }
}

fn builtin_string_set(string: Value, index: usize, ch: char) -> Result<Value, Error> {
    match string {
        Value::String(s) => {
            let mut chars: Vec<char> = s.borrow().chars().collect();
            let len = chars.len();
            let slot = chars
                .get_mut(index)
                .ok_or_else(|| out_of_range("string-set!", index, len))?;
            *slot = ch;
            *s.borrow_mut() = chars.into_iter().collect();
            Ok(Value::Nothing)
        }
        other => Err(type_error("string-set!", "string", &other)),
    }
}

fn builtin_string_append(args: StringIter<'_>) -> String {
    let mut result = String::new();
    for s in args {
        result.push_str(&s);
    }
    result
}

fn builtin_symbol_to_string(symbol: Symbol) -> Value {
    Value::string(symbol.as_str())
}

fn builtin_string_to_symbol(string: Value) -> Result<Value, Error> {
    match string {
        Value::String(s) => Ok(Value::symbol(&s.borrow())),
        other => Err(type_error("string->symbol", "string", &other)),
    }
}

//
// Errors and multiple values
//

fn builtin_error(args: ValueIter<'_>) -> Result<Value, Error> {
    let parts: Vec<String> = args.map(Value::display_string).collect();

    let message = if parts.is_empty() {
        "Error".to_string()
    } else {
        parts.join(" ")
    };

    Err(Error::EvalError(message))
}

fn builtin_values(args: ValueIter<'_>) -> Result<Value, Error> {
    let mut values: Vec<Value> = args.cloned().collect();
    match values.len() {
        0 => Ok(Value::Nothing),
        1 => Ok(values.remove(0)),
        _ => Value::multiple(values),
    }
}

//
// Natives with interpreter access
//

fn write_output(interp: &mut Interpreter, text: &str) -> Result<Outcome, Error> {
    let out = interp.output();
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| Error::IoError(e.to_string()))?;
    Ok(Outcome::Return(Value::Nothing))
}

fn builtin_display(interp: &mut Interpreter, args: Vec<Value>) -> Result<Outcome, Error> {
    let text: String = args.iter().map(Value::display_string).collect();
    write_output(interp, &text)
}

fn builtin_newline(interp: &mut Interpreter, _args: Vec<Value>) -> Result<Outcome, Error> {
    write_output(interp, "\n")
}

/// `(apply proc arg ... list)`: a tail call of `proc` on the spread arguments.
fn builtin_apply(interp: &mut Interpreter, mut args: Vec<Value>) -> Result<Outcome, Error> {
    let spread = args
        .pop()
        .and_then(|last| last.list_to_vec())
        .ok_or_else(|| Error::TypeError("apply: last argument must be a list".into()))?;
    let mut args = args.into_iter();
    let operator = args
        .next()
        .ok_or_else(|| Error::InternalFault("apply: missing procedure".into()))?;

    let regs = interp.registers_mut();
    regs.operator = operator;
    regs.args = args.chain(spread).collect();
    regs.pc = Pc::ApplyProc;
    Ok(Outcome::Reenter)
}

/// `(eval expr)`: evaluates a datum in the global environment, in tail position.
fn builtin_eval(interp: &mut Interpreter, mut args: Vec<Value>) -> Result<Outcome, Error> {
    let expr = args
        .pop()
        .ok_or_else(|| Error::InternalFault("eval: missing expression".into()))?;
    let global = Rc::clone(interp.global());
    let regs = interp.registers_mut();
    regs.expr = expr;
    regs.env = global;
    regs.pc = Pc::Valueof;
    Ok(Outcome::Reenter)
}

/// `(call-with-values producer consumer)`: calls `producer` with no arguments
/// and spreads whatever it returns into the arguments of `consumer`.
fn builtin_call_with_values(
    interp: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Outcome, Error> {
    let Ok([producer, consumer]) = <[Value; 2]>::try_from(args) else {
        return Err(Error::InternalFault(
            "call-with-values: arity not enforced".into(),
        ));
    };
    let regs = interp.registers_mut();
    let next = regs.kont.clone();
    regs.kont = Kont::new(Frame::CallWithValues { consumer, next });
    regs.operator = producer;
    regs.args = Vec::new();
    regs.pc = Pc::ApplyProc;
    Ok(Outcome::Reenter)
}

//
// Registry
//

fn fixed<Args, F>(scheme_id: &'static str, f: F) -> BuiltinOp
where
    F: IntoOperation<Args>,
{
    BuiltinOp {
        scheme_id,
        arity: <F as IntoOperation<Args>>::arity(),
        func: f.into_operation(scheme_id),
    }
}

fn variadic<Args, F>(scheme_id: &'static str, arity: Arity, f: F) -> BuiltinOp
where
    F: IntoVariadicOperation<Args>,
{
    BuiltinOp {
        scheme_id,
        arity,
        func: f.into_variadic_operation(scheme_id),
    }
}

fn reentrant(
    scheme_id: &'static str,
    arity: Arity,
    f: fn(&mut Interpreter, Vec<Value>) -> Result<Outcome, Error>,
) -> BuiltinOp {
    BuiltinOp {
        scheme_id,
        arity,
        func: Rc::new(f),
    }
}

/// All builtin natives, in one auditable table. Each interpreter installs
/// its own copy into its native namespace.
pub(crate) fn get_builtin_ops() -> Vec<BuiltinOp> {
    type Nums = NumIter<'static>;
    type Values = ValueIter<'static>;

    vec![
        // Arithmetic
        variadic::<(Nums,), _>("+", Arity::AtLeast(0), builtin_add),
        variadic::<(Nums,), _>("*", Arity::AtLeast(0), builtin_mul),
        variadic::<(NumberType, Nums), _>("-", Arity::AtLeast(1), builtin_sub),
        variadic::<(NumberType, Nums), _>("/", Arity::AtLeast(1), builtin_div),
        variadic::<(NumberType, Nums), _>("max", Arity::AtLeast(1), builtin_max),
        variadic::<(NumberType, Nums), _>("min", Arity::AtLeast(1), builtin_min),
        fixed::<(NumberType,), _>("abs", builtin_abs),
        // Comparison
        variadic::<(NumberType, Nums), _>("=", Arity::AtLeast(2), builtin_num_eq),
        variadic::<(NumberType, Nums), _>("<", Arity::AtLeast(2), builtin_lt),
        variadic::<(NumberType, Nums), _>(">", Arity::AtLeast(2), builtin_gt),
        variadic::<(NumberType, Nums), _>("<=", Arity::AtLeast(2), builtin_le),
        variadic::<(NumberType, Nums), _>(">=", Arity::AtLeast(2), builtin_ge),
        // Type predicates
        fixed::<(Value,), _>("number?", builtin_is_number),
        fixed::<(Value,), _>("boolean?", builtin_is_boolean),
        fixed::<(Value,), _>("symbol?", builtin_is_symbol),
        fixed::<(Value,), _>("string?", builtin_is_string),
        fixed::<(Value,), _>("char?", builtin_is_char),
        fixed::<(Value,), _>("pair?", builtin_is_pair),
        fixed::<(Value,), _>("null?", builtin_is_null),
        fixed::<(Value,), _>("vector?", builtin_is_vector),
        fixed::<(Value,), _>("procedure?", builtin_is_procedure),
        // Logic and equality
        fixed::<(Value,), _>("not", builtin_not),
        fixed::<(Value, Value), _>("eq?", builtin_eq),
        fixed::<(Value, Value), _>("eqv?", builtin_eq),
        fixed::<(Value, Value), _>("equal?", builtin_equal),
        // Pairs and lists
        fixed::<(Value, Value), _>("cons", builtin_cons),
        fixed::<(Value,), _>("car", builtin_car),
        fixed::<(Value,), _>("cdr", builtin_cdr),
        fixed::<(Value, Value), _>("set-car!", builtin_set_car),
        fixed::<(Value, Value), _>("set-cdr!", builtin_set_cdr),
        variadic::<(Values,), _>("list", Arity::AtLeast(0), builtin_list),
        fixed::<(Value,), _>("length", builtin_length),
        // Vectors
        variadic::<(Values,), _>("vector", Arity::AtLeast(0), builtin_vector),
        variadic::<(usize, Values), _>("make-vector", Arity::Range(1, 2), builtin_make_vector),
        fixed::<(Value,), _>("vector-length", builtin_vector_length),
        fixed::<(Value, usize), _>("vector-ref", builtin_vector_ref),
        fixed::<(Value, usize, Value), _>("vector-set!", builtin_vector_set),
        // Strings and symbols
        fixed::<(Value,), _>("string-length", builtin_string_length),
        fixed::<(Value, usize), _>("string-ref", builtin_string_ref),
        fixed::<(Value, usize, char), _>("string-set!", builtin_string_set),
        variadic::<(StringIter<'static>,), _>(
            "string-append",
            Arity::AtLeast(0),
            builtin_string_append,
        ),
        fixed::<(Symbol,), _>("symbol->string", builtin_symbol_to_string),
        fixed::<(Value,), _>("string->symbol", builtin_string_to_symbol),
        // Output
        reentrant("display", Arity::Exact(1), builtin_display),
        reentrant("newline", Arity::Exact(0), builtin_newline),
        // Errors and multiple values
        variadic::<(Values,), _>("error", Arity::AtLeast(0), builtin_error),
        variadic::<(Values,), _>("values", Arity::AtLeast(0), builtin_values),
        // Control
        reentrant("apply", Arity::AtLeast(2), builtin_apply),
        reentrant("eval", Arity::Exact(1), builtin_eval),
        reentrant("call-with-values", Arity::Exact(2), builtin_call_with_values),
    ]
}
