//! Defines an enum of all the possible values that can flow through a query.

use crate::error::ExecError;

#[derive(Debug, Clone, PartialEq)]
/// can hold any value a column, constant, or parameter can take at runtime.
/// `Null` is a value, not a type; any slot may hold it.
pub enum Value {
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    Null,
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(x) => x.fmt(f),
            Value::Real(x) => x.fmt(f),
            Value::Text(x) => x.fmt(f),
            Value::Blob(_) => "<BLOB>".fmt(f),
            Value::Bool(x) => match x {
                true => "TRUE".fmt(f),
                false => "FALSE".fmt(f),
            },
            Value::Null => "NULL".fmt(f),
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// true when the value is `Bool(true)`; anything else, including `Null`,
    /// is not truthy.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

/// compares two values, promoting `Int` to `Real` when mixed.
/// `Null` sorts before every non-null value.
pub fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, ExecError> {
    use std::cmp::Ordering;
    use Value::*;
    match (a, b) {
        (Null, Null) => Ok(Ordering::Equal),
        (Null, _) => Ok(Ordering::Less),
        (_, Null) => Ok(Ordering::Greater),
        (Int(x), Int(y)) => Ok(x.cmp(y)),
        (Real(x), Real(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| ExecError::TypeError("cannot order NaN".to_string())),
        (Int(x), Real(y)) => compare(&Real(*x as f64), &Real(*y)),
        (Real(x), Int(y)) => compare(&Real(*x), &Real(*y as f64)),
        (Text(x), Text(y)) => Ok(x.cmp(y)),
        (Bool(x), Bool(y)) => Ok(x.cmp(y)),
        (Blob(x), Blob(y)) => Ok(x.cmp(y)),
        (x, y) => Err(ExecError::TypeError(format!(
            "cannot compare {} with {}",
            x, y
        ))),
    }
}

/// tests two values for equality, promoting `Int` to `Real` when mixed.
/// Unlike SQL, `Null` equals `Null`; the in-memory backend uses host
/// equality semantics.
pub fn equal(a: &Value, b: &Value) -> bool {
    use Value::*;
    match (a, b) {
        (Int(x), Real(y)) | (Real(y), Int(x)) => (*x as f64) == *y,
        (x, y) => x == y,
    }
}

#[test]
fn test_compare_promotes_int_to_real() {
    use std::cmp::Ordering;
    assert_eq!(
        compare(&Value::Int(2), &Value::Real(2.5)).unwrap(),
        Ordering::Less
    );
    assert_eq!(
        compare(&Value::Real(3.0), &Value::Int(3)).unwrap(),
        Ordering::Equal
    );
}

#[test]
fn test_compare_null_sorts_first() {
    use std::cmp::Ordering;
    assert_eq!(
        compare(&Value::Null, &Value::Int(-100)).unwrap(),
        Ordering::Less
    );
    assert_eq!(
        compare(&Value::Text("a".to_string()), &Value::Null).unwrap(),
        Ordering::Greater
    );
}

#[test]
fn test_equal_mixed_numeric() {
    assert!(equal(&Value::Int(1), &Value::Real(1.0)));
    assert!(!equal(&Value::Int(1), &Value::Real(1.5)));
    assert!(equal(&Value::Null, &Value::Null));
    assert!(!equal(&Value::Null, &Value::Int(0)));
}
