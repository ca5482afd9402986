//! Generic boxed arithmetic
//!
//! Longs overflow into an ArithmeticException rather than wrapping;
//! any double operand makes the result a double.

use crate::error::{Result, Thrown};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Num {
    Long(i64),
    Double(f64),
}

impl Num {
    pub fn of(value: &Value) -> Result<Num> {
        match value {
            Value::Long(n) => Ok(Num::Long(*n)),
            Value::Double(d) => Ok(Num::Double(*d)),
            other => Err(Thrown::class_cast(other, "Number")),
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Num::Long(n) => n as f64,
            Num::Double(d) => d,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Num::Long(n) => Value::Long(n),
            Num::Double(d) => Value::Double(d),
        }
    }
}

pub fn overflow() -> Thrown {
    Thrown::arithmetic("integer overflow")
}

pub fn divide_by_zero() -> Thrown {
    Thrown::arithmetic("Divide by zero")
}

fn binary(
    a: &Value,
    b: &Value,
    long: fn(i64, i64) -> Option<i64>,
    double: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(x), Num::Long(y)) => long(x, y).map(Value::Long).ok_or_else(overflow),
        (x, y) => Ok(Value::Double(double(x.to_f64(), y.to_f64()))),
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, i64::checked_add, |x, y| x + y)
}

pub fn minus(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, i64::checked_sub, |x, y| x - y)
}

pub fn multiply(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, i64::checked_mul, |x, y| x * y)
}

/// Exact long quotients stay longs; inexact ones become doubles
pub fn divide(a: &Value, b: &Value) -> Result<Value> {
    match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(_), Num::Long(0)) => Err(divide_by_zero()),
        (Num::Long(x), Num::Long(y)) if x % y == 0 => {
            x.checked_div(y).map(Value::Long).ok_or_else(overflow)
        }
        (x, y) => Ok(Value::Double(x.to_f64() / y.to_f64())),
    }
}

pub fn quotient(a: &Value, b: &Value) -> Result<Value> {
    match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(_), Num::Long(0)) => Err(divide_by_zero()),
        (Num::Long(x), Num::Long(y)) => x.checked_div(y).map(Value::Long).ok_or_else(overflow),
        (x, y) => Ok(Value::Double((x.to_f64() / y.to_f64()).trunc())),
    }
}

pub fn remainder(a: &Value, b: &Value) -> Result<Value> {
    match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(_), Num::Long(0)) => Err(divide_by_zero()),
        (Num::Long(x), Num::Long(y)) => Ok(Value::Long(x.wrapping_rem(y))),
        (x, y) => Ok(Value::Double(x.to_f64() % y.to_f64())),
    }
}

/// Floored modulus, sign follows the divisor
pub fn modulo(a: &Value, b: &Value) -> Result<Value> {
    match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(_), Num::Long(0)) => Err(divide_by_zero()),
        (Num::Long(x), Num::Long(y)) => {
            let m = x.rem_euclid(y);
            Ok(Value::Long(if y < 0 && m != 0 { m + y } else { m }))
        }
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            Ok(Value::Double(x - y * (x / y).floor()))
        }
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering> {
    let ord = match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(x), Num::Long(y)) => Some(x.cmp(&y)),
        (x, y) => x.to_f64().partial_cmp(&y.to_f64()),
    };
    // NaN compares false against everything; report it as unordered-less
    Ok(ord.unwrap_or(std::cmp::Ordering::Less))
}

pub fn lt(a: &Value, b: &Value) -> Result<bool> {
    Ok(compare(a, b)?.is_lt())
}

pub fn lte(a: &Value, b: &Value) -> Result<bool> {
    Ok(compare(a, b)?.is_le())
}

pub fn gt(a: &Value, b: &Value) -> Result<bool> {
    Ok(compare(a, b)?.is_gt())
}

pub fn gte(a: &Value, b: &Value) -> Result<bool> {
    Ok(compare(a, b)?.is_ge())
}

/// `==`: numeric equality across longs and doubles
pub fn num_equiv(a: &Value, b: &Value) -> Result<bool> {
    Ok(match (Num::of(a)?, Num::of(b)?) {
        (Num::Long(x), Num::Long(y)) => x == y,
        (x, y) => x.to_f64() == y.to_f64(),
    })
}

pub fn inc(a: &Value) -> Result<Value> {
    add(a, &Value::Long(1))
}

pub fn dec(a: &Value) -> Result<Value> {
    minus(a, &Value::Long(1))
}

pub fn is_zero(a: &Value) -> Result<bool> {
    Ok(Num::of(a)?.to_f64() == 0.0)
}

pub fn is_pos(a: &Value) -> Result<bool> {
    Ok(Num::of(a)?.to_f64() > 0.0)
}

pub fn is_neg(a: &Value) -> Result<bool> {
    Ok(Num::of(a)?.to_f64() < 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_overflow_throws() {
        let err = add(&Value::Long(i64::MAX), &Value::Long(1)).unwrap_err();
        assert_eq!(err.message(), Some("integer overflow"));
    }

    #[test]
    fn test_mixed_contagion() {
        assert_eq!(
            add(&Value::Long(1), &Value::Double(0.5)).unwrap(),
            Value::Double(1.5)
        );
        assert_eq!(
            divide(&Value::Long(6), &Value::Long(3)).unwrap(),
            Value::Long(2)
        );
        assert_eq!(
            divide(&Value::Long(1), &Value::Long(2)).unwrap(),
            Value::Double(0.5)
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert!(divide(&Value::Long(1), &Value::Long(0)).is_err());
        assert!(quotient(&Value::Long(1), &Value::Long(0)).is_err());
    }

    #[test]
    fn test_modulo_follows_divisor() {
        assert_eq!(modulo(&Value::Long(-7), &Value::Long(3)).unwrap(), Value::Long(2));
        assert_eq!(modulo(&Value::Long(7), &Value::Long(-3)).unwrap(), Value::Long(-2));
        assert_eq!(remainder(&Value::Long(-7), &Value::Long(3)).unwrap(), Value::Long(-1));
    }

    #[test]
    fn test_non_numbers_are_rejected() {
        assert!(lt(&Value::string("a"), &Value::Long(1)).is_err());
        assert!(num_equiv(&Value::Long(1), &Value::Double(1.0)).unwrap());
    }
}
