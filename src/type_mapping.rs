//! Defines the basic kinds a query value can have and the storage type
//! mappings that carry them to the relational backend.
//!
//! A `TypeMapping` pairs a value kind with the backend's storage type name
//! and owns the literal-formatting rule for constants of that kind.

use std::str::FromStr;
use thiserror::Error;

use crate::error::CompileError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// These are the basic kinds a scalar value in a query can have.
pub enum ValueKind {
    Int,
    Real,
    Text,
    Blob,
    Bool,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Int => "integer".fmt(f),
            ValueKind::Real => "real".fmt(f),
            ValueKind::Text => "text".fmt(f),
            ValueKind::Blob => "blob".fmt(f),
            ValueKind::Bool => "boolean".fmt(f),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Unable to parse ValueKind from type name: {0}.")]
    ParseValueKindError(String),
}

impl FromStr for ValueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Ok(ValueKind::Int),
            "real" | "float" | "double" => Ok(ValueKind::Real),
            "text" | "string" => Ok(ValueKind::Text),
            "blob" => Ok(ValueKind::Blob),
            "bool" | "boolean" => Ok(ValueKind::Bool),
            x => Err(Error::ParseValueKindError(String::from(x))),
        }
    }
}

/// returns the kind of a runtime value, or `None` for `Null`.
pub fn kind_of_value(v: &Value) -> Option<ValueKind> {
    match v {
        Value::Int(_) => Some(ValueKind::Int),
        Value::Real(_) => Some(ValueKind::Real),
        Value::Text(_) => Some(ValueKind::Text),
        Value::Blob(_) => Some(ValueKind::Blob),
        Value::Bool(_) => Some(ValueKind::Bool),
        Value::Null => None,
    }
}

/// A storage type mapping for one scalar kind: the backend type name plus
/// the literal-formatting rule for constants carrying the mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub store_type: String,
    pub kind: ValueKind,
}

impl TypeMapping {
    pub fn new(store_type: &str, kind: ValueKind) -> TypeMapping {
        TypeMapping {
            store_type: String::from(store_type),
            kind,
        }
    }

    /// renders a constant as backend literal text.
    pub fn literal(&self, v: &Value) -> Result<String, CompileError> {
        match v {
            Value::Int(i) => Ok(i.to_string()),
            Value::Real(r) => Ok(r.to_string()),
            Value::Text(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
            Value::Bool(true) => Ok(String::from("1")),
            Value::Bool(false) => Ok(String::from("0")),
            Value::Blob(bytes) => {
                let mut s = String::from("X'");
                for b in bytes {
                    s.push_str(&format!("{:02X}", b));
                }
                s.push('\'');
                Ok(s)
            }
            Value::Null => Ok(String::from("NULL")),
        }
    }
}

/// resolves the default storage mapping for a value kind.
/// Declared properties may override the storage type name; everything else
/// (inferred literals, parameters, casts) goes through here.
pub fn default_mapping(kind: ValueKind) -> TypeMapping {
    match kind {
        ValueKind::Int => TypeMapping::new("INTEGER", kind),
        ValueKind::Real => TypeMapping::new("REAL", kind),
        ValueKind::Text => TypeMapping::new("TEXT", kind),
        ValueKind::Blob => TypeMapping::new("BLOB", kind),
        ValueKind::Bool => TypeMapping::new("INTEGER", kind),
    }
}

#[test]
fn test_literal_rendering() {
    struct Case {
        input: Value,
        expected: &'static str,
    }
    let cases = vec![
        Case {
            input: Value::Int(42),
            expected: "42",
        },
        Case {
            input: Value::Real(1.5),
            expected: "1.5",
        },
        Case {
            input: Value::Text("it's".to_string()),
            expected: "'it''s'",
        },
        Case {
            input: Value::Bool(true),
            expected: "1",
        },
        Case {
            input: Value::Blob(vec![0xab, 0x01]),
            expected: "X'AB01'",
        },
        Case {
            input: Value::Null,
            expected: "NULL",
        },
    ];
    let mapping = default_mapping(ValueKind::Text);
    for case in cases {
        assert_eq!(mapping.literal(&case.input).unwrap(), case.expected);
    }
}

#[test]
fn test_value_kind_from_str() {
    assert_eq!(ValueKind::from_str("INT").unwrap(), ValueKind::Int);
    assert_eq!(ValueKind::from_str("string").unwrap(), ValueKind::Text);
    assert!(ValueKind::from_str("datetime").is_err());
}
