//! `sql_expr` defines the relational scalar IR: the typed SQL fragments the
//! translator produces and the text generator renders.
//!
//! A `SqlScalar` wraps an inner node together with either a storage type
//! mapping (a value-producing node) or a condition flag (a predicate node),
//! never both. Nodes form a closed sum type so every consumer matches
//! exhaustively.

use enum_as_inner::EnumAsInner;

use crate::expr::BinaryOp;
use crate::type_mapping::TypeMapping;
use crate::value::Value;

/// A table occurrence in a query, with its unique alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: String,
    pub schema: Option<String>,
    pub alias: String,
}

impl TableRef {
    pub fn new(table: &str, schema: Option<&str>, alias: &str) -> TableRef {
        TableRef {
            table: String::from(table),
            schema: schema.map(String::from),
            alias: String::from(alias),
        }
    }
}

/// Aggregate functions the relational backend can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum SqlNode {
    /// A column of a specific table occurrence, rendered `alias.name`.
    Column { table_alias: String, column: String },
    /// A constant, rendered through its scalar's type mapping.
    Literal(Value),
    /// A named parameter reference, rendered as a placeholder token.
    Parameter { name: String, nullable: bool },
    Binary {
        op: BinaryOp,
        left: Box<SqlScalar>,
        right: Box<SqlScalar>,
    },
    /// An explicit conversion, rendered `CAST(inner AS store_type)`.
    Cast {
        operand: Box<SqlScalar>,
        store_type: String,
    },
    /// An aggregate call; `arg` of `None` renders as `COUNT(*)`.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<SqlScalar>>,
    },
}

/// A backend scalar: an inner node plus either a type mapping or the
/// condition flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlScalar {
    pub node: SqlNode,
    pub mapping: Option<TypeMapping>,
    pub is_condition: bool,
}

impl SqlScalar {
    /// a value-producing scalar with an optional storage mapping.
    pub fn value(node: SqlNode, mapping: Option<TypeMapping>) -> SqlScalar {
        SqlScalar {
            node,
            mapping,
            is_condition: false,
        }
    }

    /// a boolean-shaped predicate scalar. Condition scalars carry no
    /// storage mapping.
    pub fn condition(node: SqlNode) -> SqlScalar {
        SqlScalar {
            node,
            mapping: None,
            is_condition: true,
        }
    }
}

#[test]
fn test_scalar_never_both_mapping_and_condition() {
    use crate::type_mapping::{default_mapping, ValueKind};
    let value = SqlScalar::value(
        SqlNode::Literal(Value::Int(1)),
        Some(default_mapping(ValueKind::Int)),
    );
    assert!(!value.is_condition);
    assert!(value.mapping.is_some());

    let cond = SqlScalar::condition(SqlNode::Binary {
        op: BinaryOp::Eq,
        left: Box::new(value.clone()),
        right: Box::new(value),
    });
    assert!(cond.is_condition);
    assert!(cond.mapping.is_none());
}
