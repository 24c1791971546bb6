//! Lowers the operator-level query IR onto the in-memory pipeline
//! representation: each operator appends a sequence operator, installs a
//! terminal reduction, or replaces the output-shape template.

use log::debug;

use crate::error::CompileError;
use crate::expr::{CallExpr, EntityShaperExpr, Expr, OperatorKind};
use crate::lower::{is_identity, lambda_body, substitute};
use crate::pipeline::{MemoryProjectionValue, PipelineOp, PipelineQuery, Reduction};
use crate::projection::{MemoryProjectionBinder, ProjectionMember};
use crate::row_expr::{kind_of, RowExpr};
use crate::type_mapping::ValueKind;

/// The in-memory shaped query: the pipeline and the template describing
/// how to rebuild result values from its rows.
#[derive(Debug, Clone)]
pub struct MemoryShapedQuery {
    pub pipeline: PipelineQuery,
    pub shape: Expr,
}

pub fn lower(expr: &Expr) -> Result<MemoryShapedQuery, CompileError> {
    match expr {
        Expr::Source(entity) => Ok(MemoryShapedQuery {
            pipeline: PipelineQuery::for_entity(entity.clone()),
            shape: Expr::EntityShaper(EntityShaperExpr {
                entity: entity.clone(),
                binding: ProjectionMember::root(),
            }),
        }),
        Expr::Call(call) => {
            let shaped = lower(&call.source)?;
            debug!("lowering {} onto in-memory pipeline", call.op);
            lower_operator(shaped, call)
        }
        _ => Err(CompileError::NotImplemented(
            "query source does not lower to a shaped query".to_string(),
        )),
    }
}

/// Lowers one scalar sub-expression against the pipeline's current row
/// layout, embedding finished fragments as `Expr::Row`.
pub(crate) fn translate_memory(
    pipeline: &mut PipelineQuery,
    expr: &Expr,
) -> Result<Expr, CompileError> {
    match expr {
        Expr::Member { object, member } => {
            let inner = translate_memory(pipeline, object)?;
            match &inner {
                Expr::EntityShaper(shaper) => {
                    let property = match shaper.entity.property(member) {
                        Some((_, p)) => p.clone(),
                        None => {
                            return Err(CompileError::InvalidTranslation(format!(
                                "entity {} has no property {}",
                                shaper.entity.name, member
                            )))
                        }
                    };
                    let row_expr = pipeline.bind_property(&shaper.binding, &property)?;
                    Ok(Expr::Row(row_expr))
                }
                Expr::New(n) => match n.members.iter().position(|m| m == member) {
                    Some(i) => Ok(n.args[i].clone()),
                    None => Err(CompileError::InvalidTranslation(format!(
                        "shape {} has no member {}",
                        n.type_name, member
                    ))),
                },
                _ => Ok(Expr::Member {
                    object: Box::new(inner),
                    member: member.clone(),
                }),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = translate_memory(pipeline, left)?;
            let right = translate_memory(pipeline, right)?;
            match (left, right) {
                (Expr::Row(l), Expr::Row(r)) => Ok(Expr::Row(RowExpr::Binary {
                    op: *op,
                    left: Box::new(l),
                    right: Box::new(r),
                })),
                (left, right) => Ok(Expr::binary(*op, left, right)),
            }
        }
        Expr::Unary { op, operand } => {
            let operand = translate_memory(pipeline, operand)?;
            match operand {
                Expr::Row(e) => Ok(Expr::Row(RowExpr::Unary {
                    op: *op,
                    operand: Box::new(e),
                })),
                operand => Ok(Expr::Unary {
                    op: *op,
                    operand: Box::new(operand),
                }),
            }
        }
        Expr::Constant(v) => Ok(Expr::Row(RowExpr::Literal(v.clone()))),
        Expr::Parameter { name, kind, .. } => Ok(Expr::Row(RowExpr::Parameter {
            name: name.clone(),
            kind: *kind,
        })),
        Expr::Binding { member, kind } => match pipeline.projection_value(member) {
            Some(MemoryProjectionValue::Scalar(e)) => Ok(Expr::Row(e.clone())),
            Some(MemoryProjectionValue::Entity(ep)) => {
                Ok(Expr::EntityShaper(EntityShaperExpr {
                    entity: ep.entity.clone(),
                    binding: member.clone(),
                }))
            }
            None => Err(CompileError::Internal(format!(
                "placeholder references unknown projection member {} (kind {:?})",
                member, kind
            ))),
        },
        Expr::New(n) => {
            let mut args = Vec::with_capacity(n.args.len());
            for arg in &n.args {
                args.push(translate_memory(pipeline, arg)?);
            }
            Ok(Expr::New(crate::expr::NewExpr {
                type_name: n.type_name.clone(),
                members: n.members.clone(),
                args,
            }))
        }
        other => Ok(other.clone()),
    }
}

fn lower_operator(
    mut shaped: MemoryShapedQuery,
    call: &CallExpr,
) -> Result<MemoryShapedQuery, CompileError> {
    use OperatorKind::*;
    match call.op {
        Select => {
            let body = lambda_body(call, 0)?;
            if is_identity(body) {
                return Ok(shaped);
            }
            let body = substitute(body, &shaped.shape);
            shaped.shape = MemoryProjectionBinder::new(&mut shaped.pipeline).translate(&body)?;
            Ok(shaped)
        }
        Where => {
            let predicate = translate_predicate(&mut shaped, call, 0)?;
            shaped.pipeline.push_op(PipelineOp::Filter(predicate));
            Ok(shaped)
        }
        Skip => {
            let count = translate_value(&mut shaped, call)?;
            shaped.pipeline.push_op(PipelineOp::Skip(count));
            Ok(shaped)
        }
        Take => {
            let count = translate_value(&mut shaped, call)?;
            shaped.pipeline.push_op(PipelineOp::Take(count));
            Ok(shaped)
        }
        OrderBy | OrderByDescending => {
            let key = translate_key(&mut shaped, call)?;
            shaped.pipeline.push_op(PipelineOp::OrderBy {
                key,
                descending: call.op == OrderByDescending,
            });
            Ok(shaped)
        }
        ThenBy | ThenByDescending => {
            if !shaped.pipeline.has_ordering() {
                return Err(CompileError::InvalidTranslation(
                    "subordinate ordering without a primary ordering".to_string(),
                ));
            }
            let key = translate_key(&mut shaped, call)?;
            shaped.pipeline.push_op(PipelineOp::ThenBy {
                key,
                descending: call.op == ThenByDescending,
            });
            Ok(shaped)
        }
        Distinct => {
            // Materialize the projection positionally first so distinct
            // compares the projected values, not the raw scan rows.
            shaped.pipeline.apply_projection();
            shaped.pipeline.push_op(PipelineOp::Distinct);
            Ok(shaped)
        }
        All => {
            let predicate = translate_predicate(&mut shaped, call, 0)?;
            install_scalar_reduction(&mut shaped, Reduction::All { predicate }, ValueKind::Bool);
            Ok(shaped)
        }
        Any => {
            if !call.args.is_empty() {
                let predicate = translate_predicate(&mut shaped, call, 0)?;
                shaped.pipeline.push_op(PipelineOp::Filter(predicate));
            }
            install_scalar_reduction(&mut shaped, Reduction::Any, ValueKind::Bool);
            Ok(shaped)
        }
        Count | LongCount => {
            if !call.args.is_empty() {
                let predicate = translate_predicate(&mut shaped, call, 0)?;
                shaped.pipeline.push_op(PipelineOp::Filter(predicate));
            }
            let reduction = match call.op {
                Count => Reduction::Count,
                _ => Reduction::LongCount,
            };
            install_scalar_reduction(&mut shaped, reduction, ValueKind::Int);
            Ok(shaped)
        }
        Sum | Min | Max | Average => {
            let selector = aggregate_operand(&mut shaped, call)?;
            let kind = match call.op {
                Average => ValueKind::Real,
                _ => kind_of(&selector, shaped.pipeline.column_kinds())
                    .unwrap_or(ValueKind::Int),
            };
            let reduction = match call.op {
                Sum => Reduction::Sum { selector, kind },
                Min => Reduction::Min { selector },
                Max => Reduction::Max { selector },
                _ => Reduction::Average { selector },
            };
            install_scalar_reduction(&mut shaped, reduction, kind);
            Ok(shaped)
        }
        Contains => {
            let probe = translate_value(&mut shaped, call)?;
            let selector = shaped
                .pipeline
                .scalar_projection()
                .cloned()
                .ok_or_else(|| {
                    CompileError::InvalidTranslation(
                        "Contains requires a scalar projection".to_string(),
                    )
                })?;
            install_scalar_reduction(
                &mut shaped,
                Reduction::Contains {
                    selector,
                    value: probe,
                },
                ValueKind::Bool,
            );
            Ok(shaped)
        }
        First | FirstOrDefault | Last | LastOrDefault | Single | SingleOrDefault => {
            if !call.args.is_empty() {
                let predicate = translate_predicate(&mut shaped, call, 0)?;
                shaped.pipeline.push_op(PipelineOp::Filter(predicate));
            }
            let reduction = match call.op {
                First => Reduction::First { or_default: false },
                FirstOrDefault => Reduction::First { or_default: true },
                Last => Reduction::Last { or_default: false },
                LastOrDefault => Reduction::Last { or_default: true },
                Single => Reduction::Single { or_default: false },
                _ => Reduction::Single { or_default: true },
            };
            shaped.pipeline.set_reduction(reduction);
            Ok(shaped)
        }
        Join | GroupJoin | GroupBy | DefaultIfEmpty | SelectMany | Union | Except | Intersect
        | Concat | OfType | Cast | ElementAt | ElementAtOrDefault | Aggregate | Zip
        | TakeWhile | SkipWhile | Reverse | SequenceEqual => {
            Err(CompileError::NotImplemented(call.op.to_string()))
        }
    }
}

/// translates a predicate lambda and checks it is boolean-shaped.
fn translate_predicate(
    shaped: &mut MemoryShapedQuery,
    call: &CallExpr,
    index: usize,
) -> Result<RowExpr, CompileError> {
    let body = substitute(lambda_body(call, index)?, &shaped.shape);
    match translate_memory(&mut shaped.pipeline, &body)? {
        Expr::Row(e) => {
            if kind_of(&e, shaped.pipeline.column_kinds()) == Some(ValueKind::Bool) {
                Ok(e)
            } else {
                Err(CompileError::InvalidTranslation(format!(
                    "{} predicate did not translate to a condition",
                    call.op
                )))
            }
        }
        _ => Err(CompileError::InvalidTranslation(format!(
            "{} predicate did not translate to a row expression",
            call.op
        ))),
    }
}

/// translates a non-lambda value argument (count, probe value).
fn translate_value(
    shaped: &mut MemoryShapedQuery,
    call: &CallExpr,
) -> Result<RowExpr, CompileError> {
    let arg = call.args.first().ok_or_else(|| {
        CompileError::InvalidTranslation(format!("operator {} expects an argument", call.op))
    })?;
    let arg = substitute(arg, &shaped.shape);
    match translate_memory(&mut shaped.pipeline, &arg)? {
        Expr::Row(e) => Ok(e),
        _ => Err(CompileError::InvalidTranslation(format!(
            "operator {} argument did not translate to a row expression",
            call.op
        ))),
    }
}

fn translate_key(
    shaped: &mut MemoryShapedQuery,
    call: &CallExpr,
) -> Result<RowExpr, CompileError> {
    let body = substitute(lambda_body(call, 0)?, &shaped.shape);
    match translate_memory(&mut shaped.pipeline, &body)? {
        Expr::Row(e) => Ok(e),
        _ => Err(CompileError::InvalidTranslation(format!(
            "{} key selector did not translate to a row expression",
            call.op
        ))),
    }
}

/// resolves the operand for an aggregate: the translated selector when one
/// is given, otherwise the already-bound scalar projection.
fn aggregate_operand(
    shaped: &mut MemoryShapedQuery,
    call: &CallExpr,
) -> Result<RowExpr, CompileError> {
    if call.args.is_empty() {
        return shaped
            .pipeline
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
    match translate_memory(&mut shaped.pipeline, &body)? {
        Expr::Row(e) => Ok(e),
        _ => Err(CompileError::InvalidTranslation(format!(
            "{} selector did not translate to a row expression",
            call.op
        ))),
    }
}

/// installs a value reduction: the projection collapses to one scalar slot
/// at the root member and the shape becomes a placeholder for it.
fn install_scalar_reduction(shaped: &mut MemoryShapedQuery, reduction: Reduction, kind: ValueKind) {
    shaped.pipeline.set_reduction(reduction);
    shaped.pipeline.make_single_projection(kind);
    shaped.shape = Expr::Binding {
        member: ProjectionMember::root(),
        kind: Some(kind),
    };
}
