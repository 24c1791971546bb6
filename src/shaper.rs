//! The materialization pass: lowers an output-shape template into a
//! `Shaper`, the direct construction logic a plan applies to each raw row.
//!
//! Entity-shaper nodes become entity constructions (row-buffer view,
//! external materialization, identity-tracking registration); placeholders
//! become positional row lookups; shape constructors become composites. A
//! template with no entity shaper performs no tracking at all.

use std::sync::Arc;

use itertools::Itertools;

use crate::context::QueryContext;
use crate::error::{CompileError, ExecError};
use crate::expr::Expr;
use crate::projection::ProjectionMember;
use crate::row_expr::Row;
use crate::schema::{EntityInstance, EntityType};
use crate::value::Value;

/// The lowered construction plan for one result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaper {
    /// Construct an entity from the row slots starting at `start`, then
    /// register it for tracking.
    Entity {
        entity: Arc<EntityType>,
        start: usize,
    },
    /// Read the value at one row position.
    Slot { index: usize },
    /// Build a named composite from member shapers, in construction order.
    Composite {
        type_name: String,
        members: Vec<(String, Shaper)>,
    },
}

/// A materialized result value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Scalar(Value),
    Entity(EntityInstance),
    Composite {
        type_name: String,
        members: Vec<(String, ResultValue)>,
    },
}

impl std::fmt::Display for ResultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultValue::Scalar(v) => v.fmt(f),
            ResultValue::Entity(instance) => write!(
                f,
                "{} {{ {} }}",
                instance.entity,
                instance
                    .values
                    .iter()
                    .map(|(n, v)| format!("{}: {}", n, v))
                    .join(", ")
            ),
            ResultValue::Composite { type_name, members } => write!(
                f,
                "{} {{ {} }}",
                type_name,
                members
                    .iter()
                    .map(|(n, v)| format!("{}: {}", n, v))
                    .join(", ")
            ),
        }
    }
}

/// lowers a shape template against the positional layout produced by
/// `apply_projection`.
pub fn lower_shape(
    shape: &Expr,
    starts: &[(ProjectionMember, usize)],
) -> Result<Shaper, CompileError> {
    match shape {
        Expr::EntityShaper(shaper) => Ok(Shaper::Entity {
            entity: shaper.entity.clone(),
            start: start_of(&shaper.binding, starts)?,
        }),
        Expr::Binding { member, .. } => Ok(Shaper::Slot {
            index: start_of(member, starts)?,
        }),
        Expr::New(n) => {
            let mut members = Vec::with_capacity(n.args.len());
            for (name, arg) in n.members.iter().zip(n.args.iter()) {
                members.push((name.clone(), lower_shape(arg, starts)?));
            }
            Ok(Shaper::Composite {
                type_name: n.type_name.clone(),
                members,
            })
        }
        other => Err(CompileError::Internal(format!(
            "unexpected node in shape template: {:?}",
            other
        ))),
    }
}

fn start_of(
    member: &ProjectionMember,
    starts: &[(ProjectionMember, usize)],
) -> Result<usize, CompileError> {
    starts
        .iter()
        .find(|(m, _)| m == member)
        .map(|(_, i)| *i)
        .ok_or_else(|| {
            CompileError::Internal(format!("no projection slot for member {}", member))
        })
}

/// applies a shaper to one raw row, constructing the result value and
/// registering every constructed entity instance exactly once.
pub fn shape_row(shaper: &Shaper, row: &Row, ctx: &QueryContext) -> Result<ResultValue, ExecError> {
    match shaper {
        Shaper::Slot { index } => row.items.get(*index).cloned().map(ResultValue::Scalar).ok_or_else(|| {
            ExecError::TypeError(format!(
                "row of width {} has no slot {}",
                row.items.len(),
                index
            ))
        }),
        Shaper::Entity { entity, start } => {
            let end = start + entity.properties.len();
            let view = row.items.get(*start..end).ok_or_else(|| {
                ExecError::TypeError(format!(
                    "row of width {} cannot supply slots {}..{} for entity {}",
                    row.items.len(),
                    start,
                    end,
                    entity.name
                ))
            })?;
            let instance = entity.materialize(view)?;
            ctx.track(entity, &instance);
            Ok(ResultValue::Entity(instance))
        }
        Shaper::Composite { type_name, members } => {
            let mut out = Vec::with_capacity(members.len());
            for (name, member_shaper) in members {
                out.push((name.clone(), shape_row(member_shaper, row, ctx)?));
            }
            Ok(ResultValue::Composite {
                type_name: type_name.clone(),
                members: out,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::EntityShaperExpr;
    use crate::schema::test_entity;
    use std::cell::RefCell;

    struct RecordingTracker {
        tracked: RefCell<Vec<(String, EntityInstance)>>,
    }

    impl RecordingTracker {
        fn new() -> RecordingTracker {
            RecordingTracker {
                tracked: RefCell::new(vec![]),
            }
        }
    }

    impl crate::context::Tracker for RecordingTracker {
        fn start_tracking(&self, entity: &EntityType, instance: &EntityInstance) {
            self.tracked
                .borrow_mut()
                .push((entity.name.clone(), instance.clone()));
        }
    }

    fn entity_row() -> Row {
        Row {
            items: vec![Value::Int(1), Value::Text("Ada".into()), Value::Int(36)],
        }
    }

    #[test]
    fn entity_shaper_constructs_and_tracks_once() {
        let entity = test_entity();
        let template = Expr::EntityShaper(EntityShaperExpr {
            entity: entity.clone(),
            binding: ProjectionMember::root(),
        });
        let shaper = lower_shape(&template, &[(ProjectionMember::root(), 0)]).unwrap();
        let tracker = RecordingTracker::new();
        let ctx = QueryContext::new().with_tracker(&tracker);
        let result = shape_row(&shaper, &entity_row(), &ctx).unwrap();
        match result {
            ResultValue::Entity(instance) => {
                assert_eq!(instance.get("Name"), Some(&Value::Text("Ada".into())));
            }
            other => panic!("expected entity, got {:?}", other),
        }
        assert_eq!(tracker.tracked.borrow().len(), 1);
        assert_eq!(tracker.tracked.borrow()[0].0, "Customer");
    }

    #[test]
    fn scalar_template_performs_no_tracking() {
        let template = Expr::Binding {
            member: ProjectionMember::root(),
            kind: None,
        };
        let shaper = lower_shape(&template, &[(ProjectionMember::root(), 0)]).unwrap();
        let tracker = RecordingTracker::new();
        let ctx = QueryContext::new().with_tracker(&tracker);
        let row = Row {
            items: vec![Value::Int(7)],
        };
        assert_eq!(
            shape_row(&shaper, &row, &ctx).unwrap(),
            ResultValue::Scalar(Value::Int(7))
        );
        assert!(tracker.tracked.borrow().is_empty());
    }

    #[test]
    fn composite_shapes_members_in_order() {
        let n = ProjectionMember::root().add_member("N");
        let a = ProjectionMember::root().add_member("A");
        let template = Expr::new_shape(
            "NameAge",
            vec![
                (
                    "N",
                    Expr::Binding {
                        member: n.clone(),
                        kind: None,
                    },
                ),
                (
                    "A",
                    Expr::Binding {
                        member: a.clone(),
                        kind: None,
                    },
                ),
            ],
        );
        let shaper = lower_shape(&template, &[(n, 0), (a, 1)]).unwrap();
        let ctx = QueryContext::new();
        let row = Row {
            items: vec![Value::Text("Ada".into()), Value::Int(36)],
        };
        match shape_row(&shaper, &row, &ctx).unwrap() {
            ResultValue::Composite { type_name, members } => {
                assert_eq!(type_name, "NameAge");
                assert_eq!(members[0].1, ResultValue::Scalar(Value::Text("Ada".into())));
                assert_eq!(members[1].1, ResultValue::Scalar(Value::Int(36)));
            }
            other => panic!("expected composite, got {:?}", other),
        }
    }

    #[test]
    fn missing_slot_is_internal_error() {
        let template = Expr::Binding {
            member: ProjectionMember::root().add_member("Missing"),
            kind: None,
        };
        assert!(matches!(
            lower_shape(&template, &[(ProjectionMember::root(), 0)]),
            Err(CompileError::Internal(_))
        ));
    }
}
