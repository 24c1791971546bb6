//! Lowers the operator-level query IR onto the relational `Select`
//! representation.
//!
//! One shaped query (the `Select` plus the output-shape template) flows
//! through the whole chain. Operators either mutate the `Select`
//! (predicates, ordering, limits, reductions) or replace the shape
//! template (projection). Operators with no lowering rule fail the compile
//! with a "not implemented" error; nothing partial escapes, because the
//! shaped query is owned by the lowering until it succeeds.

use log::debug;

use crate::error::CompileError;
use crate::expr::{CallExpr, EntityShaperExpr, Expr, OperatorKind};
use crate::lower::{is_identity, lambda_body, substitute};
use crate::projection::{ProjectionMember, RelationalProjectionBinder};
use crate::select::{OrderingTerm, ProjectionValue, Select, SingleRule};
use crate::sql_expr::{AggregateFunc, SqlNode, SqlScalar};
use crate::sql_translate::SqlTranslator;
use crate::type_mapping::{default_mapping, kind_of_value, ValueKind};
use crate::value::Value;

/// The relational shaped query: the backend representation and the
/// template describing how to rebuild result values from its rows.
#[derive(Debug, Clone)]
pub struct RelationalShapedQuery {
    pub select: Select,
    pub shape: Expr,
}

pub fn lower(expr: &Expr) -> Result<RelationalShapedQuery, CompileError> {
    match expr {
        Expr::Source(entity) => Ok(RelationalShapedQuery {
            select: Select::for_entity(entity.clone()),
            shape: Expr::EntityShaper(EntityShaperExpr {
                entity: entity.clone(),
                binding: ProjectionMember::root(),
            }),
        }),
        Expr::Call(call) => {
            let shaped = lower(&call.source)?;
            debug!("lowering {} onto relational select", call.op);
            lower_operator(shaped, call)
        }
        _ => Err(CompileError::NotImplemented(
            "query source does not lower to a shaped query".to_string(),
        )),
    }
}

fn lower_operator(
    mut shaped: RelationalShapedQuery,
    call: &CallExpr,
) -> Result<RelationalShapedQuery, CompileError> {
    use OperatorKind::*;
    match call.op {
        Select => {
            let body = lambda_body(call, 0)?;
            if is_identity(body) {
                return Ok(shaped);
            }
            let body = substitute(body, &shaped.shape);
            shaped.shape =
                RelationalProjectionBinder::new(&mut shaped.select).translate(&body)?;
            Ok(shaped)
        }
        Where => {
            apply_predicate(&mut shaped, call, 0)?;
            Ok(shaped)
        }
        Skip => {
            let count = translate_count(&mut shaped, call)?;
            shaped.select.set_offset(count);
            Ok(shaped)
        }
        Take => {
            let count = translate_count(&mut shaped, call)?;
            shaped.select.set_limit(count);
            Ok(shaped)
        }
        OrderBy | OrderByDescending => {
            let term = OrderingTerm {
                expr: translate_key(&mut shaped, call)?,
                descending: call.op == OrderByDescending,
            };
            shaped.select.order_by(term);
            Ok(shaped)
        }
        ThenBy | ThenByDescending => {
            if shaped.select.ordering().is_empty() {
                return Err(CompileError::InvalidTranslation(
                    "subordinate ordering without a primary ordering".to_string(),
                ));
            }
            let term = OrderingTerm {
                expr: translate_key(&mut shaped, call)?,
                descending: call.op == ThenByDescending,
            };
            shaped.select.then_by(term);
            Ok(shaped)
        }
        Distinct => {
            // Materialize the projection positionally first so no deferred
            // entity leaves remain behind the DISTINCT.
            shaped.select.apply_projection();
            shaped.select.set_distinct();
            Ok(shaped)
        }
        Count | LongCount => {
            if !call.args.is_empty() {
                apply_predicate(&mut shaped, call, 0)?;
            }
            install_aggregate(
                &mut shaped,
                AggregateFunc::Count,
                None,
                default_mapping(ValueKind::Int),
            );
            Ok(shaped)
        }
        Sum | Min | Max | Average => {
            let arg = aggregate_operand(&mut shaped, call)?;
            let (func, mapping) = match call.op {
                Sum => (AggregateFunc::Sum, operand_mapping(&arg)),
                Min => (AggregateFunc::Min, operand_mapping(&arg)),
                Max => (AggregateFunc::Max, operand_mapping(&arg)),
                _ => (AggregateFunc::Avg, default_mapping(ValueKind::Real)),
            };
            install_aggregate(&mut shaped, func, Some(arg), mapping);
            Ok(shaped)
        }
        First | FirstOrDefault | Single | SingleOrDefault => {
            if !call.args.is_empty() {
                apply_predicate(&mut shaped, call, 0)?;
            }
            let (limit, rule) = match call.op {
                First => (1, SingleRule::First { or_default: false }),
                FirstOrDefault => (1, SingleRule::First { or_default: true }),
                Single => (2, SingleRule::Single { or_default: false }),
                _ => (2, SingleRule::Single { or_default: true }),
            };
            shaped.select.set_limit(int_literal(limit));
            shaped.select.set_single(rule);
            Ok(shaped)
        }
        // Boolean reductions and Last need EXISTS or order-reversal forms
        // the renderer does not define; the in-memory backend covers them.
        All | Any | Contains | Last | LastOrDefault => {
            Err(CompileError::NotImplemented(call.op.to_string()))
        }
        Join | GroupJoin | GroupBy | DefaultIfEmpty | SelectMany | Union | Except | Intersect
        | Concat | OfType | Cast | ElementAt | ElementAtOrDefault | Aggregate | Zip
        | TakeWhile | SkipWhile | Reverse | SequenceEqual => {
            Err(CompileError::NotImplemented(call.op.to_string()))
        }
    }
}

/// translates a predicate lambda and conjoins it into the select.
fn apply_predicate(
    shaped: &mut RelationalShapedQuery,
    call: &CallExpr,
    index: usize,
) -> Result<(), CompileError> {
    let body = substitute(lambda_body(call, index)?, &shaped.shape);
    let translation = SqlTranslator::new(&mut shaped.select).translate(&body)?;
    match translation {
        Expr::Sql(scalar) if scalar.is_condition => {
            shaped.select.add_predicate(scalar);
            Ok(())
        }
        _ => Err(CompileError::InvalidTranslation(format!(
            "{} predicate did not translate to a condition",
            call.op
        ))),
    }
}

/// translates a count argument (a constant or parameter, not a lambda)
/// into a typed scalar.
fn translate_count(
    shaped: &mut RelationalShapedQuery,
    call: &CallExpr,
) -> Result<SqlScalar, CompileError> {
    let arg = call.args.first().ok_or_else(|| {
        CompileError::InvalidTranslation(format!("operator {} expects a count argument", call.op))
    })?;
    let arg = substitute(arg, &shaped.shape);
    let translation = SqlTranslator::new(&mut shaped.select).translate(&arg)?;
    match translation {
        Expr::Sql(scalar) if !scalar.is_condition => Ok(scalar),
        Expr::Constant(v) => {
            let kind = kind_of_value(&v).ok_or_else(|| {
                CompileError::InvalidTranslation("count argument is null".to_string())
            })?;
            Ok(SqlScalar::value(
                SqlNode::Literal(v),
                Some(default_mapping(kind)),
            ))
        }
        Expr::Parameter {
            name,
            kind,
            nullable,
        } => Ok(SqlScalar::value(
            SqlNode::Parameter { name, nullable },
            Some(default_mapping(kind)),
        )),
        _ => Err(CompileError::InvalidTranslation(format!(
            "operator {} count argument did not translate to a scalar",
            call.op
        ))),
    }
}

/// translates an ordering key selector into a value scalar.
fn translate_key(
    shaped: &mut RelationalShapedQuery,
    call: &CallExpr,
) -> Result<SqlScalar, CompileError> {
    let body = substitute(lambda_body(call, 0)?, &shaped.shape);
    let translation = SqlTranslator::new(&mut shaped.select).translate(&body)?;
    match translation {
        Expr::Sql(scalar) if !scalar.is_condition => Ok(scalar),
        _ => Err(CompileError::InvalidTranslation(format!(
            "{} key selector did not translate to a scalar",
            call.op
        ))),
    }
}

/// resolves the operand for an aggregate: the translated selector when one
/// is given, otherwise the already-bound scalar projection.
fn aggregate_operand(
    shaped: &mut RelationalShapedQuery,
    call: &CallExpr,
) -> Result<SqlScalar, CompileError> {
    if call.args.is_empty() {
        return shaped
            .select
            .scalar_projection()
            .cloned()
            .ok_or_else(|| {
                CompileError::InvalidTranslation(format!(
                    "{} without a selector requires a scalar projection",
                    call.op
                ))
            });
    }
    let body = substitute(lambda_body(call, 0)?, &shaped.shape);
    let translation = SqlTranslator::new(&mut shaped.select).translate(&body)?;
    match translation {
        Expr::Sql(scalar) if !scalar.is_condition => Ok(scalar),
        _ => Err(CompileError::InvalidTranslation(format!(
            "{} selector did not translate to a scalar",
            call.op
        ))),
    }
}

fn operand_mapping(arg: &SqlScalar) -> crate::type_mapping::TypeMapping {
    arg.mapping
        .clone()
        .unwrap_or_else(|| default_mapping(ValueKind::Int))
}

/// collapses the projection to a single aggregate scalar at the root
/// member and marks the query single-result.
fn install_aggregate(
    shaped: &mut RelationalShapedQuery,
    func: AggregateFunc,
    arg: Option<SqlScalar>,
    mapping: crate::type_mapping::TypeMapping,
) {
    let kind = mapping.kind;
    let scalar = SqlScalar::value(
        SqlNode::Aggregate {
            func,
            arg: arg.map(Box::new),
        },
        Some(mapping),
    );
    shaped.select.install_projection(vec![(
        ProjectionMember::root(),
        ProjectionValue::Scalar(scalar),
    )]);
    shaped.select.set_single(SingleRule::Aggregate);
    shaped.shape = Expr::Binding {
        member: ProjectionMember::root(),
        kind: Some(kind),
    };
}

fn int_literal(n: i64) -> SqlScalar {
    SqlScalar::value(
        SqlNode::Literal(Value::Int(n)),
        Some(default_mapping(ValueKind::Int)),
    )
}
