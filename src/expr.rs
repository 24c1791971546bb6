//! This module defines the operator-level query IR.
//!
//! A query arrives as a tree of `Expr` nodes: a source reference wrapped in
//! operator calls, whose arguments are lambdas over the current element.
//! Rewriting never mutates a node; every pass builds new nodes, sharing
//! unchanged subtrees. The rewrite products (`EntityShaper`, `Binding`, and
//! the embedded backend scalars) live in the same family so the output-shape
//! template can hold them alongside ordinary construction expressions.

use std::sync::Arc;

use enum_as_inner::EnumAsInner;

use crate::projection::ProjectionMember;
use crate::row_expr::RowExpr;
use crate::schema::EntityType;
use crate::sql_expr::SqlScalar;
use crate::type_mapping::ValueKind;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | Gt | Ge | Lt | Le)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    /// An explicit conversion; `None` is the erased/object target, which
    /// never becomes a backend cast.
    Convert(Option<ValueKind>),
}

/// The query algebra. Every operator the host surface can produce appears
/// here, supported or not, so lowering matches exhaustively and unsupported
/// operators fail by name instead of falling through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    All,
    Any,
    Count,
    LongCount,
    Average,
    Sum,
    Min,
    Max,
    Contains,
    Select,
    Where,
    Skip,
    Take,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Distinct,
    First,
    FirstOrDefault,
    Last,
    LastOrDefault,
    Single,
    SingleOrDefault,
    Join,
    GroupJoin,
    GroupBy,
    DefaultIfEmpty,
    SelectMany,
    Union,
    Except,
    Intersect,
    Concat,
    OfType,
    Cast,
    ElementAt,
    ElementAtOrDefault,
    Aggregate,
    Zip,
    TakeWhile,
    SkipWhile,
    Reverse,
    SequenceEqual,
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An operator call: the operator, the source it applies to, and its
/// remaining arguments (lambdas, counts, probe values).
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub op: OperatorKind,
    pub source: Box<Expr>,
    pub args: Vec<Expr>,
}

/// A single-parameter lambda. The parameter is implicit; `Expr::Var` inside
/// the body refers to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaExpr {
    pub body: Box<Expr>,
}

/// A shape constructor: builds a named composite from member expressions.
/// `members` and `args` are parallel, in construction order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpr {
    pub type_name: String,
    pub members: Vec<String>,
    pub args: Vec<Expr>,
}

/// Marks a position in the output-shape template where an entity instance
/// is constructed. `binding` names the projection member its row data lives
/// under.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityShaperExpr {
    pub entity: Arc<EntityType>,
    pub binding: ProjectionMember,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Expr {
    /// A reference to an entity collection, the leaf a query chain starts
    /// from.
    Source(Arc<EntityType>),
    Call(CallExpr),
    Member { object: Box<Expr>, member: String },
    Constant(Value),
    Parameter {
        name: String,
        kind: ValueKind,
        nullable: bool,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    New(NewExpr),
    Lambda(LambdaExpr),
    /// The implicit lambda parameter: the current element.
    Var,
    /// Rewrite product: entity construction site in a shape template.
    EntityShaper(EntityShaperExpr),
    /// Rewrite product: a leaf deferred to the projection mapping, carrying
    /// its path and declared kind.
    Binding {
        member: ProjectionMember,
        kind: Option<ValueKind>,
    },
    /// A translated relational scalar embedded back into the host tree.
    Sql(SqlScalar),
    /// A translated in-memory scalar embedded back into the host tree.
    Row(RowExpr),
}

impl Expr {
    pub fn source(entity: Arc<EntityType>) -> Expr {
        Expr::Source(entity)
    }

    pub fn call(op: OperatorKind, source: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(CallExpr {
            op,
            source: Box::new(source),
            args,
        })
    }

    pub fn member(object: Expr, member: &str) -> Expr {
        Expr::Member {
            object: Box::new(object),
            member: String::from(member),
        }
    }

    pub fn constant(v: Value) -> Expr {
        Expr::Constant(v)
    }

    pub fn parameter(name: &str, kind: ValueKind) -> Expr {
        Expr::Parameter {
            name: String::from(name),
            kind,
            nullable: false,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn convert(target: Option<ValueKind>, operand: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Convert(target),
            operand: Box::new(operand),
        }
    }

    pub fn lambda(body: Expr) -> Expr {
        Expr::Lambda(LambdaExpr {
            body: Box::new(body),
        })
    }

    pub fn new_shape(type_name: &str, members: Vec<(&str, Expr)>) -> Expr {
        let (names, args): (Vec<String>, Vec<Expr>) = members
            .into_iter()
            .map(|(n, e)| (String::from(n), e))
            .unzip();
        Expr::New(NewExpr {
            type_name: String::from(type_name),
            members: names,
            args,
        })
    }
}

#[test]
fn test_builders_produce_expected_shapes() {
    use crate::schema::test_entity;
    let q = Expr::call(
        OperatorKind::Where,
        Expr::source(test_entity()),
        vec![Expr::lambda(Expr::binary(
            BinaryOp::Eq,
            Expr::member(Expr::Var, "Name"),
            Expr::constant(Value::Text("Ada".to_string())),
        ))],
    );
    let call = q.as_call().unwrap();
    assert_eq!(call.op, OperatorKind::Where);
    assert!(call.source.is_source());
    assert_eq!(call.args.len(), 1);
    let body = &call.args[0].as_lambda().unwrap().body;
    assert!(matches!(**body, Expr::Binary { op: BinaryOp::Eq, .. }));
}
