//! Projection bookkeeping: stable paths for every leaf of a nested output
//! shape, and the binders that walk a shape template, record a translation
//! per leaf, and replace each leaf with a deferred placeholder.
//!
//! A `ProjectionMember` is an ordered chain of member names; the empty
//! chain is the whole result. Paths are compared structurally and never
//! mutated; extending a path produces a new one.

use itertools::Itertools;

use crate::error::CompileError;
use crate::expr::{Expr, NewExpr};
use crate::pipeline::{MemoryProjectionValue, PipelineQuery};
use crate::row_expr;
use crate::select::{ProjectionValue, Select};
use crate::sql_translate::SqlTranslator;
use crate::type_mapping::ValueKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProjectionMember {
    chain: Vec<String>,
}

impl ProjectionMember {
    /// the empty path: the whole result.
    pub fn root() -> ProjectionMember {
        ProjectionMember { chain: vec![] }
    }

    /// extends the path by one member, leaving `self` untouched.
    pub fn add_member(&self, member: &str) -> ProjectionMember {
        let mut chain = self.chain.clone();
        chain.push(String::from(member));
        ProjectionMember { chain }
    }

    pub fn is_root(&self) -> bool {
        self.chain.is_empty()
    }
}

impl std::fmt::Display for ProjectionMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.chain.is_empty() {
            "(root)".fmt(f)
        } else {
            self.chain.iter().join(".").fmt(f)
        }
    }
}

/// Walks an output-shape template for the relational backend, translating
/// each leaf and installing the accumulated projection mapping on the
/// `Select` (replacing any previous mapping).
pub struct RelationalProjectionBinder<'a> {
    select: &'a mut Select,
    mapping: Vec<(ProjectionMember, ProjectionValue)>,
    members: Vec<ProjectionMember>,
}

impl<'a> RelationalProjectionBinder<'a> {
    pub fn new(select: &'a mut Select) -> RelationalProjectionBinder<'a> {
        RelationalProjectionBinder {
            select,
            mapping: vec![],
            members: vec![],
        }
    }

    pub fn translate(mut self, shape: &Expr) -> Result<Expr, CompileError> {
        self.members.push(ProjectionMember::root());
        let rewritten = self.visit(shape)?;
        self.select.install_projection(self.mapping);
        Ok(rewritten)
    }

    fn current(&self) -> ProjectionMember {
        // The stack is seeded in translate and popped only by visit_new.
        self.members
            .last()
            .cloned()
            .unwrap_or_else(ProjectionMember::root)
    }

    fn visit(&mut self, expr: &Expr) -> Result<Expr, CompileError> {
        match expr {
            Expr::New(n) => self.visit_new(n),
            other => {
                let member = self.current();
                let translation = SqlTranslator::new(self.select).translate(other)?;
                match translation {
                    Expr::Sql(scalar) => {
                        let kind = if scalar.is_condition {
                            Some(ValueKind::Bool)
                        } else {
                            scalar.mapping.as_ref().map(|m| m.kind)
                        };
                        self.mapping
                            .push((member.clone(), ProjectionValue::Scalar(scalar)));
                        Ok(Expr::Binding { member, kind })
                    }
                    Expr::EntityShaper(shaper) => {
                        // A whole-entity leaf defers to the entity projection
                        // already recorded for this occurrence.
                        let value = match self.select.projection_value(&shaper.binding) {
                            Some(ProjectionValue::Entity(ep)) => ep.clone(),
                            _ => {
                                return Err(CompileError::InvalidTranslation(format!(
                                    "no entity projection at member {}",
                                    shaper.binding
                                )))
                            }
                        };
                        self.mapping
                            .push((member.clone(), ProjectionValue::Entity(value)));
                        Ok(Expr::EntityShaper(crate::expr::EntityShaperExpr {
                            entity: shaper.entity,
                            binding: member,
                        }))
                    }
                    _ => Err(CompileError::InvalidTranslation(format!(
                        "projection member {} did not resolve to a backend scalar",
                        member
                    ))),
                }
            }
        }
    }

    fn visit_new(&mut self, shape: &NewExpr) -> Result<Expr, CompileError> {
        let mut args = Vec::with_capacity(shape.args.len());
        for (member_name, arg) in shape.members.iter().zip(shape.args.iter()) {
            let member = self.current().add_member(member_name);
            self.members.push(member);
            args.push(self.visit(arg)?);
            self.members.pop();
        }
        Ok(Expr::New(NewExpr {
            type_name: shape.type_name.clone(),
            members: shape.members.clone(),
            args,
        }))
    }
}

/// The in-memory counterpart: same walk, recording row expressions into the
/// pipeline's projection mapping.
pub struct MemoryProjectionBinder<'a> {
    pipeline: &'a mut PipelineQuery,
    mapping: Vec<(ProjectionMember, MemoryProjectionValue)>,
    members: Vec<ProjectionMember>,
}

impl<'a> MemoryProjectionBinder<'a> {
    pub fn new(pipeline: &'a mut PipelineQuery) -> MemoryProjectionBinder<'a> {
        MemoryProjectionBinder {
            pipeline,
            mapping: vec![],
            members: vec![],
        }
    }

    pub fn translate(mut self, shape: &Expr) -> Result<Expr, CompileError> {
        self.members.push(ProjectionMember::root());
        let rewritten = self.visit(shape)?;
        self.pipeline.install_projection(self.mapping);
        Ok(rewritten)
    }

    fn current(&self) -> ProjectionMember {
        self.members
            .last()
            .cloned()
            .unwrap_or_else(ProjectionMember::root)
    }

    fn visit(&mut self, expr: &Expr) -> Result<Expr, CompileError> {
        match expr {
            Expr::New(n) => self.visit_new(n),
            other => {
                let member = self.current();
                let translation = crate::lower_memory::translate_memory(self.pipeline, other)?;
                match translation {
                    Expr::Row(row_expr) => {
                        let kind = row_expr::kind_of(&row_expr, self.pipeline.column_kinds());
                        self.mapping
                            .push((member.clone(), MemoryProjectionValue::Scalar(row_expr)));
                        Ok(Expr::Binding { member, kind })
                    }
                    Expr::EntityShaper(shaper) => {
                        let value = match self.pipeline.projection_value(&shaper.binding) {
                            Some(MemoryProjectionValue::Entity(ep)) => ep.clone(),
                            _ => {
                                return Err(CompileError::InvalidTranslation(format!(
                                    "no entity projection at member {}",
                                    shaper.binding
                                )))
                            }
                        };
                        self.mapping
                            .push((member.clone(), MemoryProjectionValue::Entity(value)));
                        Ok(Expr::EntityShaper(crate::expr::EntityShaperExpr {
                            entity: shaper.entity,
                            binding: member,
                        }))
                    }
                    _ => Err(CompileError::InvalidTranslation(format!(
                        "projection member {} did not resolve to a row expression",
                        member
                    ))),
                }
            }
        }
    }

    fn visit_new(&mut self, shape: &NewExpr) -> Result<Expr, CompileError> {
        let mut args = Vec::with_capacity(shape.args.len());
        for (member_name, arg) in shape.members.iter().zip(shape.args.iter()) {
            let member = self.current().add_member(member_name);
            self.members.push(member);
            args.push(self.visit(arg)?);
            self.members.pop();
        }
        Ok(Expr::New(NewExpr {
            type_name: shape.type_name.clone(),
            members: shape.members.clone(),
            args,
        }))
    }
}

#[test]
fn test_member_equality_is_structural() {
    let a = ProjectionMember::root().add_member("X").add_member("Y");
    let b = ProjectionMember::root().add_member("X").add_member("Y");
    let c = ProjectionMember::root().add_member("X");
    assert_eq!(a, b);
    assert_ne!(a, c); // common prefix, different length
    assert_ne!(c, ProjectionMember::root());
}

#[test]
fn test_add_member_does_not_mutate() {
    let base = ProjectionMember::root().add_member("X");
    let extended = base.add_member("Y");
    assert_eq!(base, ProjectionMember::root().add_member("X"));
    assert_ne!(base, extended);
    assert_eq!(format!("{}", extended), "X.Y");
    assert_eq!(format!("{}", ProjectionMember::root()), "(root)");
}

#[cfg(test)]
mod binder_tests {
    use super::*;
    use crate::expr::{EntityShaperExpr, Expr};
    use crate::schema::test_entity;

    fn shaper_over(entity: std::sync::Arc<crate::schema::EntityType>) -> Expr {
        Expr::EntityShaper(EntityShaperExpr {
            entity,
            binding: ProjectionMember::root(),
        })
    }

    #[test]
    fn relational_binder_records_nested_paths_in_order() {
        let entity = test_entity();
        let mut select = Select::for_entity(entity.clone());
        let shape = Expr::new_shape(
            "Summary",
            vec![
                ("N", Expr::member(shaper_over(entity.clone()), "Name")),
                (
                    "Pair",
                    Expr::new_shape(
                        "Pair",
                        vec![
                            ("A", Expr::member(shaper_over(entity.clone()), "Age")),
                            ("I", Expr::member(shaper_over(entity), "Id")),
                        ],
                    ),
                ),
            ],
        );
        let rewritten = RelationalProjectionBinder::new(&mut select)
            .translate(&shape)
            .unwrap();

        let n = ProjectionMember::root().add_member("N");
        let a = ProjectionMember::root().add_member("Pair").add_member("A");
        let i = ProjectionMember::root().add_member("Pair").add_member("I");
        let starts = select.apply_projection();
        assert_eq!(
            starts,
            vec![(n.clone(), 0), (a.clone(), 1), (i.clone(), 2)]
        );

        // Leaves were replaced by placeholders carrying their paths.
        let new = rewritten.as_new().unwrap();
        match &new.args[0] {
            Expr::Binding { member, .. } => assert_eq!(*member, n),
            other => panic!("expected binding, got {:?}", other),
        }
        let inner = new.args[1].as_new().unwrap();
        match &inner.args[1] {
            Expr::Binding { member, .. } => assert_eq!(*member, i),
            other => panic!("expected binding, got {:?}", other),
        }
    }

    #[test]
    fn relational_binder_replaces_previous_mapping() {
        let entity = test_entity();
        let mut select = Select::for_entity(entity.clone());
        let first = Expr::new_shape(
            "First",
            vec![("N", Expr::member(shaper_over(entity.clone()), "Name"))],
        );
        let first_shape = RelationalProjectionBinder::new(&mut select)
            .translate(&first)
            .unwrap();

        // The second projection consumes the first one's placeholders.
        let n = ProjectionMember::root().add_member("N");
        let second = Expr::new_shape(
            "Second",
            vec![("Renamed", first_shape.as_new().unwrap().args[0].clone())],
        );
        RelationalProjectionBinder::new(&mut select)
            .translate(&second)
            .unwrap();

        let renamed = ProjectionMember::root().add_member("Renamed");
        assert!(select.projection_value(&renamed).is_some());
        assert!(select.projection_value(&n).is_none());
    }

    #[test]
    fn relational_binder_keeps_whole_entity_leaves() {
        let entity = test_entity();
        let mut select = Select::for_entity(entity.clone());
        let shape = Expr::new_shape(
            "WithEntity",
            vec![
                ("C", shaper_over(entity.clone())),
                ("N", Expr::member(shaper_over(entity), "Name")),
            ],
        );
        let rewritten = RelationalProjectionBinder::new(&mut select)
            .translate(&shape)
            .unwrap();
        let c = ProjectionMember::root().add_member("C");
        match select.projection_value(&c) {
            Some(ProjectionValue::Entity(_)) => {}
            other => panic!("expected entity projection, got {:?}", other),
        }
        // Entity leaf expands positionally; scalar leaf follows it.
        let starts = select.apply_projection();
        assert_eq!(starts[0], (c.clone(), 0));
        assert_eq!(starts[1], (ProjectionMember::root().add_member("N"), 3));
        match rewritten.as_new().unwrap().args[0] {
            Expr::EntityShaper(ref shaper) => assert_eq!(shaper.binding, c),
            ref other => panic!("expected entity shaper, got {:?}", other),
        }
    }
}
