//! This module defines the runtime value model. The main enum, [`Value`], is the
//! closed set of variants the evaluator works with: numbers, booleans, symbols,
//! characters, mutable strings, mutable pairs and vectors, the empty list, the
//! void value, multiple-value containers, and the three kinds of callables
//! (native procedures, closures, reified continuations). Parsed source code is
//! represented with the same type, so `eval` can run data built at runtime.
//!
//! Ergonomic helper functions such as [`val`], [`sym`], and [`nil`] are provided
//! for convenient construction in code and tests.
//!
//! `PartialEq` on `Value` is Scheme's `eq?`: symbols by name, characters by code
//! point, numbers by numeric value, and everything heap-allocated by identity.
//! Structural comparison is [`Value::is_equal`].

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::evaluator::continuation::Kont;
use crate::evaluator::procedure::{Closure, NativeProcedure};

/// Type alias for number values in the interpreter
pub(crate) type NumberType = f64;

/// An identifier. Two symbols are the same symbol when their names are equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}", self.0)
    }
}

/// A mutable cons cell.
pub struct Pair {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Pair {
    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.cdr.borrow_mut() = value;
    }
}

/// A mutable vector.
pub struct Vector(RefCell<Vec<Value>>);

impl Vector {
    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.0.borrow_mut()
    }
}

// Deeply nested data would otherwise be freed by one nested drop call per
// level. Cells owned only by the value being dropped are emptied onto a
// worklist; shared cells just lose a reference.
impl Drop for Pair {
    fn drop(&mut self) {
        let car = std::mem::replace(self.car.get_mut(), Value::Nil);
        let cdr = std::mem::replace(self.cdr.get_mut(), Value::Nil);
        if owns_nested(&car) || owns_nested(&cdr) {
            release(vec![car, cdr]);
        }
    }
}

impl Drop for Vector {
    fn drop(&mut self) {
        let items = std::mem::take(self.0.get_mut());
        if items.iter().any(owns_nested) {
            release(items);
        }
    }
}

fn owns_nested(value: &Value) -> bool {
    match value {
        Value::Pair(rc) => Rc::strong_count(rc) == 1,
        Value::Vector(rc) => Rc::strong_count(rc) == 1,
        _ => false,
    }
}

fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Pair(rc) => {
                if let Ok(pair) = Rc::try_unwrap(rc) {
                    pending.push(pair.car.replace(Value::Nil));
                    pending.push(pair.cdr.replace(Value::Nil));
                }
            }
            Value::Vector(rc) => {
                if let Ok(vector) = Rc::try_unwrap(rc) {
                    pending.append(&mut vector.0.take());
                }
            }
            _ => {}
        }
    }
}

fn addr<T: ?Sized>(rc: &Rc<T>) -> *const () {
    Rc::as_ptr(rc).cast()
}

/// Core value type in the interpreter
#[derive(Clone)]
pub enum Value {
    Number(NumberType),
    Bool(bool),
    Symbol(Symbol),
    Char(char),
    /// Strings are heap objects, mutable by character index
    String(Rc<RefCell<String>>),
    Pair(Rc<Pair>),
    Vector(Rc<Vector>),
    /// The empty list
    Nil,
    /// The void value, e.g. the result of `set!` or an empty `begin`
    Nothing,
    /// Result of `(values a b ...)`; always holds at least two values.
    /// Build with [`Value::multiple`].
    MultipleValues(Rc<[Value]>),
    Native(Rc<NativeProcedure>),
    Closure(Rc<Closure>),
    /// A reified continuation, callable like a one-argument procedure
    Continuation(Kont),
    /// Placeholder bound to a `letrec` name until its initializer completes.
    /// Reading it raises [`Error::LetrecOrderError`].
    Uninitialized(Symbol),
}

impl Value {
    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::new(name))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Rc::new(RefCell::new(s.into())))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(Vector(RefCell::new(items))))
    }

    /// Build a proper list from a vector of values
    pub fn list(items: Vec<Value>) -> Value {
        Self::list_with_tail(items, Value::Nil)
    }

    /// Build a list whose final cdr is `tail` (an improper list unless `tail` is nil)
    pub fn list_with_tail(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    /// Build a multiple-values container. Zero or one value is an interpreter fault:
    /// callers are expected to pass those through as `Nothing` or the value itself.
    pub fn multiple(values: Vec<Value>) -> Result<Value, Error> {
        if values.len() < 2 {
            return Err(Error::InternalFault(format!(
                "multiple-values container built with {} value(s)",
                values.len()
            )));
        }
        Ok(Value::MultipleValues(values.into()))
    }

    /// Collect the elements of a proper list. Returns `None` for anything
    /// that is not a finite, nil-terminated chain of pairs.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        if self.is_cyclic() {
            return None;
        }
        let mut items = Vec::new();
        let mut cursor = self.clone();
        loop {
            match cursor {
                Value::Nil => return Some(items),
                Value::Pair(pair) => {
                    items.push(pair.car());
                    cursor = pair.cdr();
                }
                _ => return None,
            }
        }
    }

    /// True for a finite, nil-terminated chain of pairs.
    pub fn is_list(&self) -> bool {
        if self.is_cyclic() {
            return false;
        }
        let mut cursor = self.clone();
        while let Value::Pair(pair) = cursor {
            cursor = pair.cdr();
        }
        cursor.is_nil()
    }

    /// Whether following `cdr`s from here ever comes back to a pair already
    /// passed (a list closed into a loop with `set-cdr!`).
    pub fn is_cyclic(&self) -> bool {
        let mut slow = self.clone();
        let mut fast = self.clone();
        loop {
            for _ in 0..2 {
                fast = match &fast {
                    Value::Pair(pair) => pair.cdr(),
                    _ => return false,
                };
            }
            slow = match &slow {
                Value::Pair(pair) => pair.cdr(),
                _ => return false,
            };
            if let (Value::Pair(a), Value::Pair(b)) = (&slow, &fast)
                && Rc::ptr_eq(a, b)
            {
                return true;
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `#f` counts as true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(
            self,
            Value::Native(_) | Value::Closure(_) | Value::Continuation(_)
        )
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::Char(_) => "character",
            Value::String(_) => "string",
            Value::Pair(_) => "pair",
            Value::Vector(_) => "vector",
            Value::Nil => "empty list",
            Value::Nothing => "void",
            Value::MultipleValues(_) => "multiple values",
            Value::Native(_) => "native procedure",
            Value::Closure(_) => "closure",
            Value::Continuation(_) => "continuation",
            Value::Uninitialized(_) => "uninitialized binding",
        }
    }

    /// Scheme's `eq?`
    pub fn is_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Nil, Value::Nil) | (Value::Nothing, Value::Nothing) => true,
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Vector(a), Value::Vector(b)) => Rc::ptr_eq(a, b),
            (Value::MultipleValues(a), Value::MultipleValues(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => a.ptr_eq(b),
            (Value::Uninitialized(a), Value::Uninitialized(b)) => a == b,
            _ => false,
        }
    }

    /// Scheme's `equal?`: structural over pairs, vectors and string contents,
    /// `eq?` everywhere else. A pair of cells already under comparison is
    /// assumed equal, so circular structure terminates.
    pub fn is_equal(&self, other: &Value) -> bool {
        let mut pending = vec![(self.clone(), other.clone())];
        let mut seen = HashSet::new();
        while let Some((left, right)) = pending.pop() {
            match (&left, &right) {
                (Value::Pair(a), Value::Pair(b)) => {
                    if Rc::ptr_eq(a, b) || !seen.insert((addr(a), addr(b))) {
                        continue;
                    }
                    pending.push((a.cdr(), b.cdr()));
                    pending.push((a.car(), b.car()));
                }
                (Value::Vector(a), Value::Vector(b)) => {
                    if Rc::ptr_eq(a, b) || !seen.insert((addr(a), addr(b))) {
                        continue;
                    }
                    let (a, b) = (a.borrow(), b.borrow());
                    if a.len() != b.len() {
                        return false;
                    }
                    pending.extend(a.iter().cloned().zip(b.iter().cloned()));
                }
                (Value::String(a), Value::String(b)) => {
                    if *a.borrow() != *b.borrow() {
                        return false;
                    }
                }
                (Value::MultipleValues(a), Value::MultipleValues(b)) => {
                    if a.len() != b.len() {
                        return false;
                    }
                    pending.extend(a.iter().cloned().zip(b.iter().cloned()));
                }
                _ => {
                    if !left.is_eq(&right) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Human-readable rendering used by `display`: strings and characters
    /// are written without quoting.
    pub fn display_string(&self) -> String {
        match self {
            Value::String(s) => s.borrow().clone(),
            Value::Char(c) => c.to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_eq(other)
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: NumberType) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

fn write_char_literal(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    match c {
        ' ' => write!(f, "#\\space"),
        '\n' => write!(f, "#\\newline"),
        '\t' => write!(f, "#\\tab"),
        c => write!(f, "#\\{c}"),
    }
}

/// One pending piece of output while rendering a value.
enum Piece {
    Datum(Value),
    /// What follows the first element of a list: more elements, a dotted
    /// tail, or the closing parenthesis
    ListRest(Value),
    Text(&'static str),
    /// Closes a list or vector and forgets the cells it opened
    Close(Vec<*const ()>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pairs and vectors currently being written; meeting one again means
        // the structure is circular and is written as `...`.
        let mut open = HashSet::new();
        // Cells opened by the list being written, innermost list last
        let mut opened: Vec<Vec<*const ()>> = Vec::new();
        let mut stack = vec![Piece::Datum(self.clone())];

        while let Some(piece) = stack.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Close(cells) => {
                    for cell in &cells {
                        open.remove(cell);
                    }
                    f.write_str(")")?;
                }
                Piece::ListRest(rest) => match rest {
                    Value::Nil => {
                        stack.push(Piece::Close(opened.pop().unwrap_or_default()));
                    }
                    Value::Pair(pair) if open.contains(&addr(&pair)) => {
                        f.write_str(" ...")?;
                        stack.push(Piece::Close(opened.pop().unwrap_or_default()));
                    }
                    Value::Pair(pair) => {
                        open.insert(addr(&pair));
                        if let Some(cells) = opened.last_mut() {
                            cells.push(addr(&pair));
                        }
                        f.write_str(" ")?;
                        stack.push(Piece::ListRest(pair.cdr()));
                        stack.push(Piece::Datum(pair.car()));
                    }
                    tail => {
                        f.write_str(" . ")?;
                        stack.push(Piece::Close(opened.pop().unwrap_or_default()));
                        stack.push(Piece::Datum(tail));
                    }
                },
                Piece::Datum(Value::Pair(pair)) => {
                    if open.contains(&addr(&pair)) {
                        f.write_str("...")?;
                        continue;
                    }
                    open.insert(addr(&pair));
                    opened.push(vec![addr(&pair)]);
                    f.write_str("(")?;
                    stack.push(Piece::ListRest(pair.cdr()));
                    stack.push(Piece::Datum(pair.car()));
                }
                Piece::Datum(Value::Vector(items)) => {
                    if open.contains(&addr(&items)) {
                        f.write_str("...")?;
                        continue;
                    }
                    open.insert(addr(&items));
                    f.write_str("#(")?;
                    stack.push(Piece::Close(vec![addr(&items)]));
                    push_separated(&mut stack, &items.borrow());
                }
                Piece::Datum(Value::MultipleValues(values)) => {
                    push_separated(&mut stack, &values);
                }
                Piece::Datum(atom) => write_atom(f, &atom)?,
            }
        }
        Ok(())
    }
}

/// Queue `items` for output separated by single spaces, first item on top.
fn push_separated(stack: &mut Vec<Piece>, items: &[Value]) {
    for (i, item) in items.iter().enumerate().rev() {
        stack.push(Piece::Datum(item.clone()));
        if i > 0 {
            stack.push(Piece::Text(" "));
        }
    }
}

fn write_atom(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Number(n) => write_number(f, *n),
        Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
        Value::Symbol(s) => write!(f, "{s}"),
        Value::Char(c) => write_char_literal(f, *c),
        Value::String(s) => {
            write!(f, "\"")?;
            for ch in s.borrow().chars() {
                match ch {
                    '"' => write!(f, "\\\"")?,
                    '\\' => write!(f, "\\\\")?,
                    '\n' => write!(f, "\\n")?,
                    '\t' => write!(f, "\\t")?,
                    '\r' => write!(f, "\\r")?,
                    c => write!(f, "{c}")?,
                }
            }
            write!(f, "\"")
        }
        Value::Nil => write!(f, "()"),
        Value::Nothing => write!(f, "#<void>"),
        Value::Native(native) => write!(f, "#<procedure:{}>", native.name()),
        Value::Closure(_) => write!(f, "#<closure>"),
        Value::Continuation(_) => write!(f, "#<continuation>"),
        Value::Uninitialized(name) => write!(f, "#<uninitialized:{name}>"),
        Value::Pair(_) | Value::Vector(_) | Value::MultipleValues(_) => Ok(()),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Char(c) => write!(f, "Char({c:?})"),
            Value::String(s) => write!(f, "String({:?})", s.borrow()),
            Value::Pair(_) | Value::Vector(_) | Value::MultipleValues(_) => {
                write!(f, "{}({self})", self.type_name())
            }
            Value::Nil => write!(f, "Nil"),
            Value::Nothing => write!(f, "Nothing"),
            Value::Native(native) => write!(f, "Native({})", native.name()),
            // Closures capture environments that may contain the closure itself
            Value::Closure(closure) => write!(f, "Closure({})", closure.params()),
            Value::Continuation(k) => write!(f, "Continuation(depth={})", k.depth()),
            Value::Uninitialized(name) => write!(f, "Uninitialized({name})"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

macro_rules! impl_from_number {
    ($num_type:ty) => {
        impl From<$num_type> for Value {
            fn from(n: $num_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

impl_from_number!(i8);
impl_from_number!(i16);
impl_from_number!(i32);
impl_from_number!(i64);
impl_from_number!(u8);
impl_from_number!(u16);
impl_from_number!(u32);
impl_from_number!(usize);
impl_from_number!(f32);
impl_from_number!(NumberType);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

impl std::convert::TryFrom<&Value> for NumberType {
    type Error = Error;

    fn try_from(value: &Value) -> Result<NumberType, Error> {
        match value {
            Value::Number(n) => Ok(*n),
            other => Err(Error::TypeError(format!(
                "expected number, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::symbol(name.as_ref())
}

/// Helper function for creating Values from Rust literals, arrays, and vectors
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list
pub fn nil() -> Value {
    Value::Nil
}
