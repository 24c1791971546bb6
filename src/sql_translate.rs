//! Lowers host-level scalar and predicate expressions into the relational
//! scalar IR, binding member accesses to columns through the current
//! `Select` and running type-mapping inference over every rebuilt binary
//! node.
//!
//! Translation rebuilds bottom-up and embeds finished fragments back into
//! the host tree as `Expr::Sql`. Anything that does not reach backend
//! scalar form is passed through unchanged; callers decide whether that is
//! an error (a `Where` body that is not a condition, a projection leaf that
//! is not a scalar).

use crate::error::CompileError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::select::{ProjectionValue, Select};
use crate::sql_expr::{SqlNode, SqlScalar};
use crate::type_mapping::{default_mapping, TypeMapping};

pub struct SqlTranslator<'a> {
    select: &'a mut Select,
    infer: TypeInference,
}

impl<'a> SqlTranslator<'a> {
    pub fn new(select: &'a mut Select) -> SqlTranslator<'a> {
        SqlTranslator {
            select,
            infer: TypeInference::new(),
        }
    }

    pub fn translate(&mut self, expr: &Expr) -> Result<Expr, CompileError> {
        match expr {
            Expr::Member { object, member } => {
                let inner = self.translate(object)?;
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
                        let scalar = self.select.bind_property(&shaper.binding, &property)?;
                        Ok(Expr::Sql(scalar))
                    }
                    // Member access over a constructed shape picks the
                    // corresponding construction argument.
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
                let left = self.translate(left)?;
                let right = self.translate(right)?;
                Ok(self.infer.visit_binary(*op, left, right))
            }
            Expr::Unary { op, operand } => {
                let operand = self.translate(operand)?;
                if let (UnaryOp::Convert(Some(target)), Expr::Sql(scalar)) = (op, &operand) {
                    let mapping = default_mapping(*target);
                    return Ok(Expr::Sql(SqlScalar::value(
                        SqlNode::Cast {
                            operand: Box::new(scalar.clone()),
                            store_type: mapping.store_type.clone(),
                        },
                        Some(mapping),
                    )));
                }
                Ok(Expr::Unary {
                    op: *op,
                    operand: Box::new(operand),
                })
            }
            Expr::Binding { member, kind } => match self.select.projection_value(member) {
                Some(ProjectionValue::Scalar(s)) => Ok(Expr::Sql(s.clone())),
                Some(ProjectionValue::Entity(ep)) => {
                    Ok(Expr::EntityShaper(crate::expr::EntityShaperExpr {
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
                    args.push(self.translate(arg)?);
                }
                Ok(Expr::New(crate::expr::NewExpr {
                    type_name: n.type_name.clone(),
                    members: n.members.clone(),
                    args,
                }))
            }
            // Entity shapers pass through for the binder and member access
            // to consume; everything else keeps its host form and is
            // rejected by the caller if a scalar was required.
            other => Ok(other.clone()),
        }
    }
}

/// Propagates a known storage mapping across comparisons so constants and
/// parameters on the untyped side acquire it. One ambient mapping is live
/// at a time; each binary node saves and restores it around its own walk,
/// so nesting cannot leak a mapping into sibling sub-expressions.
struct TypeInference {
    current: Option<TypeMapping>,
}

impl TypeInference {
    fn new() -> TypeInference {
        TypeInference { current: None }
    }

    fn visit_binary(&mut self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let parent = self.current.take();
        let mut left = left;
        let mut right = right;
        if op.is_comparison() {
            if let Some(mapping) = scalar_mapping(&left) {
                self.current = Some(mapping);
                if !matches!(right, Expr::Sql(_)) {
                    right = self.visit(right);
                }
            } else if let Some(mapping) = scalar_mapping(&right) {
                self.current = Some(mapping);
                left = self.visit(left);
            }
        }
        self.current = parent;

        match (left, right) {
            (Expr::Sql(l), Expr::Sql(r)) => {
                let node = SqlNode::Binary {
                    op,
                    left: Box::new(l.clone()),
                    right: Box::new(r.clone()),
                };
                if op.is_comparison() {
                    Expr::Sql(SqlScalar::condition(node))
                } else if matches!(op, BinaryOp::And | BinaryOp::Or) {
                    if l.is_condition && r.is_condition {
                        Expr::Sql(SqlScalar::condition(node))
                    } else {
                        Expr::binary(op, Expr::Sql(l), Expr::Sql(r))
                    }
                } else if !l.is_condition && !r.is_condition {
                    Expr::Sql(SqlScalar::value(node, None))
                } else {
                    Expr::binary(op, Expr::Sql(l), Expr::Sql(r))
                }
            }
            (left, right) => Expr::binary(op, left, right),
        }
    }

    fn visit(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Constant(v) => match &self.current {
                Some(mapping) => Expr::Sql(SqlScalar::value(
                    SqlNode::Literal(v),
                    Some(mapping.clone()),
                )),
                None => Expr::Constant(v),
            },
            Expr::Parameter {
                name,
                kind,
                nullable,
            } => match &self.current {
                Some(mapping) => Expr::Sql(SqlScalar::value(
                    SqlNode::Parameter {
                        name,
                        nullable,
                    },
                    Some(mapping.clone()),
                )),
                None => Expr::Parameter {
                    name,
                    kind,
                    nullable,
                },
            },
            Expr::Binary { op, left, right } => self.visit_binary(op, *left, *right),
            other => other,
        }
    }
}

fn scalar_mapping(expr: &Expr) -> Option<TypeMapping> {
    match expr {
        Expr::Sql(s) => s.mapping.clone(),
        _ => None,
    }
}
