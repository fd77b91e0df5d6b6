//! Primitive procedure library.
//!
//! Arithmetic folds left to right from the first argument. Exact integers
//! overflow into reals instead of wrapping.

use crate::env::Environment;
use crate::values::{Arity, Primitive, PrimitiveFn, Value};
use crate::vm::VmError;
use slippy_compiler::Number;
use std::cmp::Ordering;

const LIBRARY: &[(&str, Arity, PrimitiveFn)] = &[
    ("+", Arity::AtLeast(0), add),
    ("-", Arity::AtLeast(1), sub),
    ("*", Arity::AtLeast(0), mul),
    ("/", Arity::AtLeast(1), div),
    ("=", Arity::AtLeast(1), num_eq),
    ("<", Arity::AtLeast(1), lt),
    (">", Arity::AtLeast(1), gt),
    ("<=", Arity::AtLeast(1), le),
    (">=", Arity::AtLeast(1), ge),
    ("cons", Arity::Exact(2), cons),
    ("car", Arity::Exact(1), car),
    ("cdr", Arity::Exact(1), cdr),
    ("list", Arity::AtLeast(0), list),
    ("null?", Arity::Exact(1), is_null),
    ("pair?", Arity::Exact(1), is_pair),
    ("eq?", Arity::Exact(2), is_eq),
    ("not", Arity::Exact(1), not),
];

/// Names of every primitive, in definition order.
pub fn names() -> impl Iterator<Item = &'static str> {
    LIBRARY.iter().map(|(name, _, _)| *name)
}

/// Bind the whole library in `env`.
pub fn install(env: &Environment) {
    for &(name, arity, func) in LIBRARY {
        env.define(name, Value::Primitive(Primitive { name, arity, func }));
    }
}

fn type_error(procedure: &str, expected: &str, got: &Value) -> VmError {
    VmError::TypeError {
        procedure: procedure.to_string(),
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

fn number(procedure: &str, value: &Value) -> Result<Number, VmError> {
    match value {
        Value::Int(n) => Ok(Number::Int(*n)),
        Value::Real(r) => Ok(Number::Real(*r)),
        other => Err(type_error(procedure, "number", other)),
    }
}

fn numbers(procedure: &str, args: &[Value]) -> Result<Vec<Number>, VmError> {
    args.iter().map(|arg| number(procedure, arg)).collect()
}

fn arith(
    a: Number,
    b: Number,
    exact: fn(i64, i64) -> Option<i64>,
    inexact: fn(f64, f64) -> f64,
) -> Number {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => match exact(x, y) {
            Some(n) => Number::Int(n),
            None => Number::Real(inexact(x as f64, y as f64)),
        },
        _ => Number::Real(inexact(a.as_f64(), b.as_f64())),
    }
}

fn add2(a: Number, b: Number) -> Number {
    arith(a, b, i64::checked_add, |x, y| x + y)
}

fn sub2(a: Number, b: Number) -> Number {
    arith(a, b, i64::checked_sub, |x, y| x - y)
}

fn mul2(a: Number, b: Number) -> Number {
    arith(a, b, i64::checked_mul, |x, y| x * y)
}

fn div2(a: Number, b: Number) -> Result<Number, VmError> {
    if matches!(b, Number::Int(0)) {
        return Err(VmError::DivisionByZero);
    }
    Ok(match (a, b) {
        (Number::Int(x), Number::Int(y)) if x.checked_rem(y) == Some(0) => match x.checked_div(y) {
            Some(n) => Number::Int(n),
            None => Number::Real(x as f64 / y as f64),
        },
        _ => Number::Real(a.as_f64() / b.as_f64()),
    })
}

fn add(args: &[Value]) -> Result<Value, VmError> {
    let sum = numbers("+", args)?.into_iter().fold(Number::Int(0), add2);
    Ok(Value::from_number(sum))
}

fn mul(args: &[Value]) -> Result<Value, VmError> {
    let product = numbers("*", args)?.into_iter().fold(Number::Int(1), mul2);
    Ok(Value::from_number(product))
}

fn sub(args: &[Value]) -> Result<Value, VmError> {
    let nums = numbers("-", args)?;
    let result = match nums.as_slice() {
        [only] => sub2(Number::Int(0), *only),
        [first, rest @ ..] => rest.iter().copied().fold(*first, sub2),
        [] => return Err(VmError::ArityMismatch { expected: Arity::AtLeast(1), got: 0 }),
    };
    Ok(Value::from_number(result))
}

fn div(args: &[Value]) -> Result<Value, VmError> {
    let nums = numbers("/", args)?;
    let result = match nums.as_slice() {
        [only] => div2(Number::Int(1), *only)?,
        [first, rest @ ..] => rest.iter().try_fold(*first, |acc, n| div2(acc, *n))?,
        [] => return Err(VmError::ArityMismatch { expected: Arity::AtLeast(1), got: 0 }),
    };
    Ok(Value::from_number(result))
}

fn compare(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// True when every adjacent pair of arguments satisfies `holds`.
fn chain(procedure: &str, args: &[Value], holds: fn(Ordering) -> bool) -> Result<Value, VmError> {
    let nums = numbers(procedure, args)?;
    let ok = nums
        .windows(2)
        .all(|pair| compare(pair[0], pair[1]).is_some_and(holds));
    Ok(Value::Bool(ok))
}

fn num_eq(args: &[Value]) -> Result<Value, VmError> {
    chain("=", args, Ordering::is_eq)
}

fn lt(args: &[Value]) -> Result<Value, VmError> {
    chain("<", args, Ordering::is_lt)
}

fn gt(args: &[Value]) -> Result<Value, VmError> {
    chain(">", args, Ordering::is_gt)
}

fn le(args: &[Value]) -> Result<Value, VmError> {
    chain("<=", args, Ordering::is_le)
}

fn ge(args: &[Value]) -> Result<Value, VmError> {
    chain(">=", args, Ordering::is_ge)
}

fn cons(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::cons(args[0].clone(), args[1].clone()))
}

fn car(args: &[Value]) -> Result<Value, VmError> {
    match &args[0] {
        Value::Pair(pair) => Ok(pair.car.clone()),
        other => Err(type_error("car", "pair", other)),
    }
}

fn cdr(args: &[Value]) -> Result<Value, VmError> {
    match &args[0] {
        Value::Pair(pair) => Ok(pair.cdr.clone()),
        other => Err(type_error("cdr", "pair", other)),
    }
}

fn list(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::list(args.to_vec()))
}

fn is_null(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Bool(matches!(args[0], Value::Empty)))
}

fn is_pair(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Bool(matches!(args[0], Value::Pair(_))))
}

fn is_eq(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Bool(args[0].is_eq(&args[1])))
}

fn not(args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Bool(!args[0].is_true()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ns: &[i64]) -> Vec<Value> {
        ns.iter().map(|n| Value::Int(*n)).collect()
    }

    #[test]
    fn test_unary_minus_and_division() {
        assert_eq!(sub(&ints(&[5])).unwrap(), Value::Int(-5));
        assert_eq!(div(&ints(&[4])).unwrap(), Value::Real(0.25));
        assert_eq!(sub(&ints(&[10, 3, 2])).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_exact_division_stays_exact() {
        assert_eq!(div(&ints(&[12, 3])).unwrap(), Value::Int(4));
        assert_eq!(div(&ints(&[7, 2])).unwrap(), Value::Real(3.5));
        assert_eq!(div(&ints(&[1, 0])).unwrap_err(), VmError::DivisionByZero);
    }

    #[test]
    fn test_overflow_promotes_to_real() {
        let result = add(&ints(&[i64::MAX, 1])).unwrap();
        assert!(matches!(result, Value::Real(_)));
        assert_eq!(mul(&[]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_comparisons_chain() {
        assert_eq!(lt(&ints(&[1, 2, 3])).unwrap(), Value::Bool(true));
        assert_eq!(lt(&ints(&[1, 3, 2])).unwrap(), Value::Bool(false));
        assert_eq!(ge(&[Value::Real(2.0), Value::Int(2)]).unwrap(), Value::Bool(true));
        assert_eq!(num_eq(&ints(&[4])).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_type_errors_name_the_procedure() {
        let err = add(&[Value::Int(1), Value::Bool(true)]).unwrap_err();
        assert_eq!(err.to_string(), "type error in +: expected number, got boolean");
        assert!(car(&[Value::Empty]).is_err());
    }

    #[test]
    fn test_install_binds_every_primitive() {
        let env = Environment::default();
        install(&env);
        for name in names() {
            assert!(matches!(env.lookup(name), Ok(Value::Primitive(_))), "{}", name);
        }
    }
}
