//! The in-memory backend's row tuples and the scalar IR evaluated over
//! them.
//!
//! A `Row` is the universal element type the in-memory sequence operators
//! are specialized over: an ordered, fixed-arity tuple of values addressed
//! positionally. `RowExpr` is the scalar IR family for that backend; every
//! expression resolves to a value given one row and the execution's
//! parameter snapshot.

use streaming_iterator::StreamingIterator;

use crate::context::QueryContext;
use crate::error::ExecError;
use crate::expr::{BinaryOp, UnaryOp};
use crate::type_mapping::{kind_of_value, ValueKind};
use crate::value::{compare, equal, Value};

/// can hold one raw result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub items: Vec<Value>,
}

/// A fully-buffered set of raw rows, as returned by a storage collaborator.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn streaming_iterator(&self) -> RowSetStreamingIterator {
        RowSetStreamingIterator::new(self.rows.iter())
    }
}

/// iterates over the rows of a RowSet.
/// The lifetime is bound by the lifetime of the RowSet.
pub struct RowSetStreamingIterator<'a> {
    it: std::slice::Iter<'a, Row>,
    item: Option<Row>,
}

impl<'a> RowSetStreamingIterator<'a> {
    fn new(it: std::slice::Iter<'a, Row>) -> RowSetStreamingIterator<'a> {
        RowSetStreamingIterator { it, item: None }
    }
}

impl<'a> StreamingIterator for RowSetStreamingIterator<'a> {
    type Item = Row;

    #[inline]
    fn advance(&mut self) {
        self.item = self.it.next().cloned();
    }

    #[inline]
    fn get(&self) -> Option<&Row> {
        self.item.as_ref()
    }
}

/// Scalar IR over one row tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum RowExpr {
    /// The value at a fixed position of the row tuple.
    Column { index: usize },
    Literal(Value),
    Parameter { name: String, kind: ValueKind },
    Binary {
        op: BinaryOp,
        left: Box<RowExpr>,
        right: Box<RowExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<RowExpr>,
    },
}

/// infers the kind a row expression produces, where it can be known
/// statically. Comparisons and logical operators are boolean; arithmetic
/// follows numeric promotion.
pub fn kind_of(expr: &RowExpr, column_kinds: &[ValueKind]) -> Option<ValueKind> {
    match expr {
        RowExpr::Column { index } => column_kinds.get(*index).copied(),
        RowExpr::Literal(v) => kind_of_value(v),
        RowExpr::Parameter { kind, .. } => Some(*kind),
        RowExpr::Binary { op, left, right } => match op {
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::And
            | BinaryOp::Or => Some(ValueKind::Bool),
            _ => {
                let l = kind_of(left, column_kinds)?;
                let r = kind_of(right, column_kinds)?;
                if l == ValueKind::Real || r == ValueKind::Real {
                    Some(ValueKind::Real)
                } else {
                    Some(l)
                }
            }
        },
        RowExpr::Unary { op, operand } => match op {
            UnaryOp::Not => Some(ValueKind::Bool),
            UnaryOp::Neg => kind_of(operand, column_kinds),
            UnaryOp::Convert(kind) => (*kind).or_else(|| kind_of(operand, column_kinds)),
        },
    }
}

/// evaluates a row expression against one row and the execution's
/// parameter snapshot.
pub fn eval(expr: &RowExpr, row: &Row, ctx: &QueryContext) -> Result<Value, ExecError> {
    match expr {
        RowExpr::Column { index } => row.items.get(*index).cloned().ok_or_else(|| {
            ExecError::TypeError(format!(
                "row of width {} has no column {}",
                row.items.len(),
                index
            ))
        }),
        RowExpr::Literal(v) => Ok(v.clone()),
        RowExpr::Parameter { name, .. } => ctx.param(name).cloned(),
        RowExpr::Binary { op, left, right } => {
            let l = eval(left, row, ctx)?;
            let r = eval(right, row, ctx)?;
            eval_binary(op, &l, &r)
        }
        RowExpr::Unary { op, operand } => {
            let v = eval(operand, row, ctx)?;
            eval_unary(op, v)
        }
    }
}

/// applies a binary operator to two runtime values, with `Int` promoted to
/// `Real` when mixed and `Null` propagated through arithmetic.
pub fn eval_binary(op: &BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecError> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(equal(l, r))),
        Ne => Ok(Value::Bool(!equal(l, r))),
        Gt | Ge | Lt | Le => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            let ord = compare(l, r)?;
            Ok(Value::Bool(match op {
                Gt => ord == std::cmp::Ordering::Greater,
                Ge => ord != std::cmp::Ordering::Less,
                Lt => ord == std::cmp::Ordering::Less,
                Le => ord != std::cmp::Ordering::Greater,
                _ => unreachable!(),
            }))
        }
        And | Or => match (l, r) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(match op {
                And => *a && *b,
                _ => *a || *b,
            })),
            _ => Err(ExecError::TypeError(format!(
                "logical operator applied to {} and {}",
                l, r
            ))),
        },
        Add | Sub | Mul | Div | Mod => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            match (l, r) {
                (Value::Int(a), Value::Int(b)) => {
                    if matches!(op, Div | Mod) && *b == 0 {
                        return Err(ExecError::TypeError("division by zero".to_string()));
                    }
                    Ok(Value::Int(match op {
                        Add => a + b,
                        Sub => a - b,
                        Mul => a * b,
                        Div => a / b,
                        _ => a % b,
                    }))
                }
                (Value::Real(a), Value::Real(b)) => Ok(real_arith(op, *a, *b)),
                (Value::Int(a), Value::Real(b)) => Ok(real_arith(op, *a as f64, *b)),
                (Value::Real(a), Value::Int(b)) => Ok(real_arith(op, *a, *b as f64)),
                _ => Err(ExecError::TypeError(format!(
                    "invalid types in arithmetic: {} {:?} {}",
                    l, op, r
                ))),
            }
        }
        BitAnd | BitOr => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
                BitAnd => a & b,
                _ => a | b,
            })),
            _ => Err(ExecError::TypeError(format!(
                "bitwise operator applied to {} and {}",
                l, r
            ))),
        },
    }
}

fn real_arith(op: &BinaryOp, a: f64, b: f64) -> Value {
    use BinaryOp::*;
    Value::Real(match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => a / b,
        _ => a % b,
    })
}

fn eval_unary(op: &UnaryOp, v: Value) -> Result<Value, ExecError> {
    match op {
        UnaryOp::Not => match v {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ExecError::TypeError(format!("NOT applied to {}", other))),
        },
        UnaryOp::Neg => match v {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Real(r) => Ok(Value::Real(-r)),
            Value::Null => Ok(Value::Null),
            other => Err(ExecError::TypeError(format!("negation of {}", other))),
        },
        UnaryOp::Convert(None) => Ok(v),
        UnaryOp::Convert(Some(kind)) => cast_value(v, *kind),
    }
}

fn cast_value(v: Value, kind: ValueKind) -> Result<Value, ExecError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    match (kind, &v) {
        (ValueKind::Int, Value::Int(_)) => Ok(v),
        (ValueKind::Int, Value::Real(r)) => Ok(Value::Int(*r as i64)),
        (ValueKind::Int, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (ValueKind::Real, Value::Real(_)) => Ok(v),
        (ValueKind::Real, Value::Int(i)) => Ok(Value::Real(*i as f64)),
        (ValueKind::Text, Value::Text(_)) => Ok(v),
        (ValueKind::Text, other) => Ok(Value::Text(other.to_string())),
        (ValueKind::Bool, Value::Bool(_)) => Ok(v),
        (ValueKind::Bool, Value::Int(i)) => Ok(Value::Bool(*i != 0)),
        (ValueKind::Blob, Value::Blob(_)) => Ok(v),
        (kind, other) => Err(ExecError::TypeError(format!(
            "cannot cast {} to {}",
            other, kind
        ))),
    }
}

#[cfg(test)]
fn test_ctx() -> QueryContext<'static> {
    QueryContext::new().with_param("min_age", Value::Int(21))
}

#[test]
fn test_eval_column_and_literal() {
    let row = Row {
        items: vec![Value::Int(1), Value::Text("x".to_string())],
    };
    let ctx = test_ctx();
    assert_eq!(
        eval(&RowExpr::Column { index: 1 }, &row, &ctx).unwrap(),
        Value::Text("x".to_string())
    );
    assert_eq!(
        eval(&RowExpr::Literal(Value::Real(2.5)), &row, &ctx).unwrap(),
        Value::Real(2.5)
    );
    assert!(eval(&RowExpr::Column { index: 9 }, &row, &ctx).is_err());
}

#[test]
fn test_eval_comparison_with_parameter() {
    let row = Row {
        items: vec![Value::Int(30)],
    };
    let ctx = test_ctx();
    let expr = RowExpr::Binary {
        op: BinaryOp::Ge,
        left: Box::new(RowExpr::Column { index: 0 }),
        right: Box::new(RowExpr::Parameter {
            name: "min_age".to_string(),
            kind: ValueKind::Int,
        }),
    };
    assert_eq!(eval(&expr, &row, &ctx).unwrap(), Value::Bool(true));
}

#[test]
fn test_eval_missing_parameter() {
    let row = Row { items: vec![] };
    let ctx = QueryContext::new();
    let expr = RowExpr::Parameter {
        name: "absent".to_string(),
        kind: ValueKind::Int,
    };
    assert!(matches!(
        eval(&expr, &row, &ctx),
        Err(ExecError::MissingParameter(_))
    ));
}

#[test]
fn test_eval_binary_promotion_and_null() {
    use BinaryOp::*;
    let cases = vec![
        (Add, Value::Int(1), Value::Int(1), Value::Int(2)),
        (Add, Value::Int(1), Value::Real(0.5), Value::Real(1.5)),
        (Mul, Value::Real(2.0), Value::Int(3), Value::Real(6.0)),
        (Add, Value::Null, Value::Int(1), Value::Null),
        (Sub, Value::Int(1), Value::Null, Value::Null),
    ];
    for (op, l, r, expected) in cases {
        assert_eq!(eval_binary(&op, &l, &r).unwrap(), expected);
    }
    assert!(eval_binary(&Sub, &Value::Text("a".to_string()), &Value::Real(1.1)).is_err());
}

#[test]
fn test_kind_of_infers_boolean_comparisons() {
    let kinds = vec![ValueKind::Int, ValueKind::Text];
    let expr = RowExpr::Binary {
        op: BinaryOp::Eq,
        left: Box::new(RowExpr::Column { index: 0 }),
        right: Box::new(RowExpr::Literal(Value::Int(1))),
    };
    assert_eq!(kind_of(&expr, &kinds), Some(ValueKind::Bool));
    let arith = RowExpr::Binary {
        op: BinaryOp::Add,
        left: Box::new(RowExpr::Column { index: 0 }),
        right: Box::new(RowExpr::Literal(Value::Real(1.0))),
    };
    assert_eq!(kind_of(&arith, &kinds), Some(ValueKind::Real));
}
