use std::cell::Ref;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::Error;
use crate::ast::{NumberType, Symbol, Value};
use crate::evaluator::Interpreter;
use crate::evaluator::procedure::{Arity, NativeFn, Outcome};

// NOTE: This module is plumbing between strongly-typed Rust functions and
// the erased `NativeFn` every native procedure is stored as. Natives that
// need interpreter-level control (`apply`, `eval`, `call-with-values`,
// output) are written against `NativeFn` directly; everything that is a
// plain function of its arguments goes through the adapters below.

fn type_error(procedure: &str, expected: &str, got: &Value) -> Error {
    Error::TypeError(format!(
        "{procedure}: expected {expected}, got {}",
        got.type_name()
    ))
}

// =====================================================================
// Fixed parameters
// =====================================================================

/// Conversion of one owned argument into a typed parameter.
pub trait FromParam: Sized {
    fn from_arg(procedure: &str, value: Value) -> Result<Self, Error>;
}

impl FromParam for Value {
    fn from_arg(_procedure: &str, value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl FromParam for NumberType {
    fn from_arg(procedure: &str, value: Value) -> Result<Self, Error> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(type_error(procedure, "number", &other)),
        }
    }
}

impl FromParam for Symbol {
    fn from_arg(procedure: &str, value: Value) -> Result<Self, Error> {
        match value {
            Value::Symbol(s) => Ok(s),
            other => Err(type_error(procedure, "symbol", &other)),
        }
    }
}

impl FromParam for char {
    fn from_arg(procedure: &str, value: Value) -> Result<Self, Error> {
        match value {
            Value::Char(c) => Ok(c),
            other => Err(type_error(procedure, "character", &other)),
        }
    }
}

/// A non-negative integral number, as used for indices and lengths.
impl FromParam for usize {
    fn from_arg(procedure: &str, value: Value) -> Result<Self, Error> {
        match value {
            Value::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as NumberType => {
                Ok(n as usize)
            }
            other => Err(type_error(procedure, "non-negative integer", &other)),
        }
    }
}

// =====================================================================
// Generic typed iterator built on top of the standard slice iterator
// =====================================================================

/// Describes how to view a `Value` slice as a typed iterator.
/// `precheck` validates every element up front so `project` cannot fail.
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    const EXPECTED: &'static str;

    fn matches(v: &Value) -> bool;
    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>>;

    fn precheck(procedure: &str, slice: &[Value]) -> Result<(), Error> {
        match slice.iter().find(|v| !Self::matches(v)) {
            Some(bad) => Err(type_error(procedure, Self::EXPECTED, bad)),
            None => Ok(()),
        }
    }
}

/// Iterator over a slice of arguments, typed by a [`ValueElementKind`].
#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    pub(crate) fn new(procedure: &str, values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(procedure, values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // Elements were validated by `precheck`, so `project` never yields None here
        self.inner.next().and_then(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for TypedValueIter<'_, K> where K: ValueElementKind {}
impl<K> FusedIterator for TypedValueIter<'_, K> where K: ValueElementKind {}

#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;
    const EXPECTED: &'static str = "value";

    fn matches(_v: &Value) -> bool {
        true
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        Some(v)
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ValueElementKind for NumberKind {
    type Item<'a> = NumberType;
    const EXPECTED: &'static str = "number";

    fn matches(v: &Value) -> bool {
        matches!(v, Value::Number(_))
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[doc(hidden)]
pub struct BoolKind;

impl ValueElementKind for BoolKind {
    type Item<'a> = bool;
    const EXPECTED: &'static str = "boolean";

    fn matches(v: &Value) -> bool {
        matches!(v, Value::Bool(_))
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

#[doc(hidden)]
pub struct StringKind;

impl ValueElementKind for StringKind {
    type Item<'a> = Ref<'a, String>;
    const EXPECTED: &'static str = "string";

    fn matches(v: &Value) -> bool {
        matches!(v, Value::String(_))
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::String(s) => Some(s.borrow()),
            _ => None,
        }
    }
}

/// Borrowed iterator over arbitrary arguments.
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Borrowed iterator over numeric arguments, all checked before the first is yielded.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

/// Borrowed iterator over boolean arguments.
pub type BoolIter<'a> = TypedValueIter<'a, BoolKind>;

/// Borrowed iterator over string arguments, yielding borrows of their contents.
pub type StringIter<'a> = TypedValueIter<'a, StringKind>;

// =====================================================================
// Rest-parameter support for variadic operations
// =====================================================================

/// Construct a rest parameter from the trailing argument slice.
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(procedure: &str, slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest<'a>(procedure: &str, slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(procedure, slice)
    }
}

// =====================================================================
// Return-type adaptation
// =====================================================================

/// Normalizes native return types to `Result<Value, Error>`.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Strongly-typed Rust functions of fixed arity, convertible into [`NativeFn`].
/// `Args` is the tuple of parameter types.
pub trait IntoOperation<Args> {
    fn arity() -> Arity;
    fn into_operation(self, name: &str) -> Rc<NativeFn>;
}

/// Functions ending in a rest parameter expressed with one of the iterator
/// types of this module, optionally after one fixed parameter.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self, name: &str) -> Rc<NativeFn>;
}

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self, name: &str) -> Rc<NativeFn> {
        let name: Rc<str> = Rc::from(name);
        Rc::new(move |_interp: &mut Interpreter, args: Vec<Value>| {
            let rest = <I as FromRest>::from_rest(&name, &args)?;
            (self)(rest).into_value_result().map(Outcome::Return)
        })
    }
}

impl<F, A1, I, R> IntoVariadicOperation<(A1, I)> for F
where
    A1: FromParam,
    I: FromRest,
    F: for<'a> Fn(A1, <I as FromRest>::Param<'a>) -> R + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self, name: &str) -> Rc<NativeFn> {
        let name: Rc<str> = Rc::from(name);
        Rc::new(move |_interp: &mut Interpreter, mut args: Vec<Value>| {
            if args.is_empty() {
                return Err(Error::arity_error(&*name, Arity::AtLeast(1), 0));
            }
            let rest_args = args.split_off(1);
            let first = args
                .pop()
                .ok_or_else(|| Error::InternalFault(format!("{name}: missing first argument")))?;
            let first = A1::from_arg(&name, first)?;
            let rest = <I as FromRest>::from_rest(&name, &rest_args)?;
            (self)(first, rest).into_value_result().map(Outcome::Return)
        })
    }
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + 'static,
    R: IntoValueResult,
{
    fn arity() -> Arity {
        Arity::Exact(0)
    }

    fn into_operation(self, name: &str) -> Rc<NativeFn> {
        let name: Rc<str> = Rc::from(name);
        Rc::new(move |_interp: &mut Interpreter, args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(&*name, Arity::Exact(0), args.len()));
            }
            (self)().into_value_result().map(Outcome::Return)
        })
    }
}

/// Implements `IntoOperation` for a fixed number of `FromParam` parameters.
/// Arity is checked first, then each owned argument is converted in order.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> R + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn arity() -> Arity {
                Arity::Exact($arity)
            }

            fn into_operation(self, name: &str) -> Rc<NativeFn> {
                let name: Rc<str> = Rc::from(name);
                Rc::new(move |_interp: &mut Interpreter, args: Vec<Value>| {
                    let len = args.len();
                    let Ok([ $( $v ),+ ]) = <[Value; $arity]>::try_from(args) else {
                        return Err(Error::arity_error(&*name, Arity::Exact($arity), len));
                    };
                    $( let $v = $A::from_arg(&name, $v)?; )+
                    (self)( $( $v ),+ ).into_value_result().map(Outcome::Return)
                })
            }
        }
    };
}

impl_into_operation_for_arity!(1, v0: A1);
impl_into_operation_for_arity!(2, v0: A1, v1: A2);
impl_into_operation_for_arity!(3, v0: A1, v1: A2, v2: A3);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;

    fn run(op: Rc<NativeFn>, args: Vec<Value>) -> Result<Value, Error> {
        let mut interp = Interpreter::new();
        match op(&mut interp, args)? {
            Outcome::Return(v) => Ok(v),
            Outcome::Reenter => panic!("adapter must not re-enter"),
        }
    }

    #[test]
    fn test_fixed_arity_adapter() {
        fn hypot(a: NumberType, b: NumberType) -> NumberType {
            (a * a + b * b).sqrt()
        }
        let op = IntoOperation::<(NumberType, NumberType)>::into_operation(hypot, "hypot");
        assert_eq!(run(op.clone(), vec![val(3), val(4)]).unwrap(), val(5));
        assert!(matches!(
            run(op.clone(), vec![val(3)]),
            Err(Error::ArityError { got: 1, .. })
        ));
        match run(op, vec![val(3), val("4")]) {
            Err(Error::TypeError(msg)) => assert_eq!(msg, "hypot: expected number, got string"),
            other => panic!("expected TypeError, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_arg_adapter() {
        let op = IntoOperation::<()>::into_operation(|| 42, "answer");
        assert_eq!(run(op.clone(), vec![]).unwrap(), val(42));
        assert!(run(op, vec![val(1)]).is_err());
    }

    #[test]
    fn test_result_returning_adapter() {
        fn checked_index(i: usize) -> Result<NumberType, Error> {
            if i < 3 {
                Ok(i as NumberType * 10.0)
            } else {
                Err(Error::EvalError("out of range".into()))
            }
        }
        let op = IntoOperation::<(usize,)>::into_operation(checked_index, "idx");
        assert_eq!(run(op.clone(), vec![val(2)]).unwrap(), val(20));
        assert!(matches!(run(op.clone(), vec![val(5)]), Err(Error::EvalError(_))));
        assert!(matches!(run(op.clone(), vec![val(-1)]), Err(Error::TypeError(_))));
        assert!(matches!(run(op, vec![val(1.5)]), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_variadic_adapters() {
        fn sum(nums: NumIter<'_>) -> NumberType {
            nums.sum()
        }
        fn weighted(weight: NumberType, nums: NumIter<'_>) -> NumberType {
            nums.map(|n| n * weight).sum()
        }
        fn count_values(values: ValueIter<'_>) -> usize {
            values.len()
        }
        fn concat(parts: StringIter<'_>) -> String {
            parts.map(|s| s.clone()).collect()
        }
        fn all(flags: BoolIter<'_>) -> bool {
            flags.fold(true, |acc, b| acc && b)
        }

        let op = IntoVariadicOperation::<(NumIter<'static>,)>::into_variadic_operation(sum, "sum");
        assert_eq!(run(op.clone(), vec![]).unwrap(), val(0));
        assert_eq!(run(op.clone(), vec![val(1), val(2), val(3)]).unwrap(), val(6));
        assert!(matches!(run(op, vec![val(1), val(true)]), Err(Error::TypeError(_))));

        let op = IntoVariadicOperation::<(NumberType, NumIter<'static>)>::into_variadic_operation(
            weighted, "weighted",
        );
        assert_eq!(run(op.clone(), vec![val(2), val(1), val(2)]).unwrap(), val(6));
        assert!(matches!(run(op, vec![]), Err(Error::ArityError { .. })));

        let op = IntoVariadicOperation::<(ValueIter<'static>,)>::into_variadic_operation(
            count_values,
            "count",
        );
        assert_eq!(run(op, vec![val(1), val("a"), val(true)]).unwrap(), val(3));

        let op = IntoVariadicOperation::<(StringIter<'static>,)>::into_variadic_operation(concat, "concat");
        match run(op, vec![val("ab"), val("cd")]).unwrap() {
            Value::String(s) => assert_eq!(*s.borrow(), "abcd"),
            other => panic!("expected string, got {other:?}"),
        }

        let op = IntoVariadicOperation::<(BoolIter<'static>,)>::into_variadic_operation(all, "all");
        assert_eq!(run(op.clone(), vec![val(true), val(true)]).unwrap(), val(true));
        assert_eq!(run(op, vec![val(true), val(false)]).unwrap(), val(false));
    }
}
