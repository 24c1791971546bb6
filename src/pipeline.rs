//! The in-memory backend's query representation: a source scan followed by
//! a chain of sequence operators over row tuples, with an optional terminal
//! reduction, plus the interpreter that executes the chain against rows
//! supplied by a `MemoryStore`.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use streaming_iterator::StreamingIterator;

use crate::context::{MemoryStore, QueryContext};
use crate::error::{CompileError, ExecError};
use crate::projection::ProjectionMember;
use crate::row_expr::{eval, eval_binary, kind_of, Row, RowExpr};
use crate::schema::{EntityType, Property};
use crate::type_mapping::ValueKind;
use crate::value::{compare, equal, Value};

/// Per-occurrence cache of property -> row position bindings for one entity
/// in the pipeline. `base` is the offset of the entity's first slot in the
/// current row layout.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntityProjection {
    pub entity: Arc<EntityType>,
    base: usize,
    cache: HashMap<String, RowExpr>,
}

impl MemoryEntityProjection {
    pub fn new(entity: Arc<EntityType>, base: usize) -> MemoryEntityProjection {
        MemoryEntityProjection {
            entity,
            base,
            cache: HashMap::new(),
        }
    }

    pub fn get_property(&mut self, property: &Property) -> Result<RowExpr, CompileError> {
        if let Some(cached) = self.cache.get(&property.name) {
            return Ok(cached.clone());
        }
        let (position, _) = self.entity.property(&property.name).ok_or_else(|| {
            CompileError::Internal(format!(
                "entity {} has no property {}",
                self.entity.name, property.name
            ))
        })?;
        let expr = RowExpr::Column {
            index: self.base + position,
        };
        self.cache.insert(property.name.clone(), expr.clone());
        Ok(expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryProjectionValue {
    Scalar(RowExpr),
    Entity(MemoryEntityProjection),
}

/// One sequence operator in the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Filter(RowExpr),
    OrderBy { key: RowExpr, descending: bool },
    ThenBy { key: RowExpr, descending: bool },
    Skip(RowExpr),
    Take(RowExpr),
    Distinct,
    Project(Vec<RowExpr>),
}

/// A terminal single-result reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    All { predicate: RowExpr },
    Any,
    Count,
    LongCount,
    /// `kind` fixes the zero for an empty input.
    Sum { selector: RowExpr, kind: ValueKind },
    Min { selector: RowExpr },
    Max { selector: RowExpr },
    Average { selector: RowExpr },
    Contains { selector: RowExpr, value: RowExpr },
    First { or_default: bool },
    Last { or_default: bool },
    Single { or_default: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineQuery {
    pub source: Arc<EntityType>,
    ops: Vec<PipelineOp>,
    mapping: Vec<(ProjectionMember, MemoryProjectionValue)>,
    column_kinds: Vec<ValueKind>,
    reduction: Option<Reduction>,
}

impl PipelineQuery {
    /// a pipeline scanning one entity's rows, projecting the whole entity
    /// at the root projection member.
    pub fn for_entity(entity: Arc<EntityType>) -> PipelineQuery {
        let column_kinds = entity.properties.iter().map(|p| p.kind).collect();
        let root = MemoryEntityProjection::new(entity.clone(), 0);
        PipelineQuery {
            source: entity,
            ops: vec![],
            mapping: vec![(
                ProjectionMember::root(),
                MemoryProjectionValue::Entity(root),
            )],
            column_kinds,
            reduction: None,
        }
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn push_op(&mut self, op: PipelineOp) {
        self.ops.push(op);
    }

    pub fn reduction(&self) -> Option<&Reduction> {
        self.reduction.as_ref()
    }

    pub fn set_reduction(&mut self, reduction: Reduction) {
        self.reduction = Some(reduction);
    }

    pub fn is_single_result(&self) -> bool {
        self.reduction.is_some()
    }

    /// the kinds of the current row layout, position by position.
    pub fn column_kinds(&self) -> &[ValueKind] {
        &self.column_kinds
    }

    pub fn has_ordering(&self) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, PipelineOp::OrderBy { .. }))
    }

    pub fn projection_value(&self, member: &ProjectionMember) -> Option<&MemoryProjectionValue> {
        self.mapping
            .iter()
            .find(|(m, _)| m == member)
            .map(|(_, v)| v)
    }

    /// the scalar bound at the root member, for reductions that reuse the
    /// current scalar projection.
    pub fn scalar_projection(&self) -> Option<&RowExpr> {
        match self.projection_value(&ProjectionMember::root()) {
            Some(MemoryProjectionValue::Scalar(e)) => Some(e),
            _ => None,
        }
    }

    pub fn bind_property(
        &mut self,
        member: &ProjectionMember,
        property: &Property,
    ) -> Result<RowExpr, CompileError> {
        match self.mapping.iter_mut().find(|(m, _)| m == member) {
            Some((_, MemoryProjectionValue::Entity(ep))) => ep.get_property(property),
            Some((_, MemoryProjectionValue::Scalar(_))) => Err(CompileError::InvalidTranslation(
                format!("projection member {} is not an entity", member),
            )),
            None => Err(CompileError::Internal(format!(
                "no projection mapping for member {}",
                member
            ))),
        }
    }

    /// installs a new projection mapping, replacing the previous one
    /// wholesale.
    pub fn install_projection(&mut self, mapping: Vec<(ProjectionMember, MemoryProjectionValue)>) {
        self.mapping = mapping;
    }

    /// collapses the projection to a single scalar of the given kind at the
    /// root member, the shape every reduction leaves behind.
    pub fn make_single_projection(&mut self, kind: ValueKind) {
        self.mapping = vec![(
            ProjectionMember::root(),
            MemoryProjectionValue::Scalar(RowExpr::Column { index: 0 }),
        )];
        self.column_kinds = vec![kind];
    }

    /// forces the projection to be materialized positionally: appends a
    /// `Project` operator computing one slot per leaf (entity leaves expand
    /// to one slot per declared property) and re-points the mapping at the
    /// new layout. Returns the member -> starting-index map. A mapping that
    /// is already the identity over the current layout is left untouched.
    pub fn apply_projection(&mut self) -> Vec<(ProjectionMember, usize)> {
        let mut exprs: Vec<RowExpr> = vec![];
        let mut starts = vec![];
        for (member, value) in self.mapping.iter() {
            starts.push((member.clone(), exprs.len()));
            match value {
                MemoryProjectionValue::Entity(ep) => {
                    for (position, _) in ep.entity.properties.iter().enumerate() {
                        exprs.push(RowExpr::Column {
                            index: ep.base + position,
                        });
                    }
                }
                MemoryProjectionValue::Scalar(e) => exprs.push(e.clone()),
            }
        }

        let identity = exprs.len() == self.column_kinds.len()
            && exprs
                .iter()
                .enumerate()
                .all(|(i, e)| matches!(e, RowExpr::Column { index } if *index == i));
        if identity {
            return starts;
        }

        let new_kinds: Vec<ValueKind> = exprs
            .iter()
            .map(|e| kind_of(e, &self.column_kinds).unwrap_or(ValueKind::Int))
            .collect();
        let mut new_mapping = Vec::with_capacity(self.mapping.len());
        for ((member, value), (_, start)) in self.mapping.iter().zip(starts.iter()) {
            let rebased = match value {
                MemoryProjectionValue::Entity(ep) => MemoryProjectionValue::Entity(
                    MemoryEntityProjection::new(ep.entity.clone(), *start),
                ),
                MemoryProjectionValue::Scalar(_) => {
                    MemoryProjectionValue::Scalar(RowExpr::Column { index: *start })
                }
            };
            new_mapping.push((member.clone(), rebased));
        }
        self.ops.push(PipelineOp::Project(exprs));
        self.mapping = new_mapping;
        self.column_kinds = new_kinds;
        starts
    }
}

/// What a pipeline evaluates to before shaping: raw rows, or one scalar
/// from a value reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    Rows(Vec<Row>),
    Scalar(Value),
}

pub fn execute(
    query: &PipelineQuery,
    ctx: &QueryContext,
    store: &dyn MemoryStore,
) -> Result<PipelineOutput, ExecError> {
    let row_set = store.scan(&query.source)?;
    let mut rows: Vec<Row> = vec![];
    let mut it = row_set.streaming_iterator();
    while let Some(row) = it.next() {
        rows.push(row.clone());
    }
    debug!(
        "executing pipeline over {} ({} rows, {} ops)",
        query.source.name,
        rows.len(),
        query.ops.len()
    );

    let ops = query.ops();
    let mut idx = 0;
    while idx < ops.len() {
        match &ops[idx] {
            PipelineOp::Filter(predicate) => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if eval(predicate, &row, ctx)?.is_true() {
                        kept.push(row);
                    }
                }
                rows = kept;
            }
            PipelineOp::OrderBy { key, descending } => {
                // Coalesce the OrderBy and any following ThenBy operators
                // into one composite sort.
                let mut terms = vec![(key, *descending)];
                while let Some(PipelineOp::ThenBy { key, descending }) = ops.get(idx + 1) {
                    terms.push((key, *descending));
                    idx += 1;
                }
                rows = sort_rows(rows, &terms, ctx)?;
            }
            PipelineOp::ThenBy { .. } => {
                return Err(ExecError::Compile(CompileError::Internal(
                    "subordinate ordering without a primary ordering".to_string(),
                )));
            }
            PipelineOp::Skip(count) => {
                let n = eval_count(count, ctx)?.min(rows.len());
                rows = rows.split_off(n);
            }
            PipelineOp::Take(count) => {
                rows.truncate(eval_count(count, ctx)?);
            }
            PipelineOp::Distinct => {
                let mut out: Vec<Row> = vec![];
                for row in rows {
                    if !out.iter().any(|seen| rows_equal(seen, &row)) {
                        out.push(row);
                    }
                }
                rows = out;
            }
            PipelineOp::Project(exprs) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows {
                    let mut items = Vec::with_capacity(exprs.len());
                    for e in exprs {
                        items.push(eval(e, row, ctx)?);
                    }
                    out.push(Row { items });
                }
                rows = out;
            }
        }
        idx += 1;
    }

    let reduction = match query.reduction() {
        None => return Ok(PipelineOutput::Rows(rows)),
        Some(r) => r,
    };
    match reduction {
        Reduction::All { predicate } => {
            for row in &rows {
                if !eval(predicate, row, ctx)?.is_true() {
                    return Ok(PipelineOutput::Scalar(Value::Bool(false)));
                }
            }
            Ok(PipelineOutput::Scalar(Value::Bool(true)))
        }
        Reduction::Any => Ok(PipelineOutput::Scalar(Value::Bool(!rows.is_empty()))),
        Reduction::Count | Reduction::LongCount => {
            Ok(PipelineOutput::Scalar(Value::Int(rows.len() as i64)))
        }
        Reduction::Sum { selector, kind } => {
            let zero = match kind {
                ValueKind::Real => Value::Real(0.0),
                _ => Value::Int(0),
            };
            let mut acc = zero;
            for row in &rows {
                let v = eval(selector, row, ctx)?;
                if !v.is_null() {
                    acc = eval_binary(&crate::expr::BinaryOp::Add, &acc, &v)?;
                }
            }
            Ok(PipelineOutput::Scalar(acc))
        }
        Reduction::Min { selector } => fold_extreme(&rows, selector, ctx, std::cmp::Ordering::Less),
        Reduction::Max { selector } => {
            fold_extreme(&rows, selector, ctx, std::cmp::Ordering::Greater)
        }
        Reduction::Average { selector } => {
            if rows.is_empty() {
                return Err(ExecError::NoElements);
            }
            let mut sum = 0.0;
            let mut count = 0usize;
            for row in &rows {
                match eval(selector, row, ctx)? {
                    Value::Int(i) => sum += i as f64,
                    Value::Real(r) => sum += r,
                    Value::Null => continue,
                    other => {
                        return Err(ExecError::TypeError(format!("cannot average {}", other)))
                    }
                }
                count += 1;
            }
            if count == 0 {
                return Err(ExecError::NoElements);
            }
            Ok(PipelineOutput::Scalar(Value::Real(sum / count as f64)))
        }
        Reduction::Contains { selector, value } => {
            let probe = eval(value, &Row { items: vec![] }, ctx)?;
            for row in &rows {
                if equal(&eval(selector, row, ctx)?, &probe) {
                    return Ok(PipelineOutput::Scalar(Value::Bool(true)));
                }
            }
            Ok(PipelineOutput::Scalar(Value::Bool(false)))
        }
        Reduction::First { or_default } => match rows.into_iter().next() {
            Some(row) => Ok(PipelineOutput::Rows(vec![row])),
            None if *or_default => Ok(PipelineOutput::Rows(vec![])),
            None => Err(ExecError::NoElements),
        },
        Reduction::Last { or_default } => match rows.into_iter().last() {
            Some(row) => Ok(PipelineOutput::Rows(vec![row])),
            None if *or_default => Ok(PipelineOutput::Rows(vec![])),
            None => Err(ExecError::NoElements),
        },
        Reduction::Single { or_default } => {
            if rows.len() > 1 {
                return Err(ExecError::MoreThanOne);
            }
            match rows.into_iter().next() {
                Some(row) => Ok(PipelineOutput::Rows(vec![row])),
                None if *or_default => Ok(PipelineOutput::Rows(vec![])),
                None => Err(ExecError::NoElements),
            }
        }
    }
}

fn eval_count(expr: &RowExpr, ctx: &QueryContext) -> Result<usize, ExecError> {
    match eval(expr, &Row { items: vec![] }, ctx)? {
        Value::Int(i) if i >= 0 => Ok(i as usize),
        other => Err(ExecError::TypeError(format!(
            "expected a non-negative count, got {}",
            other
        ))),
    }
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    a.items.len() == b.items.len()
        && a.items.iter().zip(b.items.iter()).all(|(x, y)| equal(x, y))
}

fn sort_rows(
    rows: Vec<Row>,
    terms: &[(&RowExpr, bool)],
    ctx: &QueryContext,
) -> Result<Vec<Row>, ExecError> {
    let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut keys = Vec::with_capacity(terms.len());
        for (key, _) in terms {
            keys.push(eval(key, &row, ctx)?);
        }
        keyed.push((keys, row));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        for (i, (_, descending)) in terms.iter().enumerate() {
            match compare(&a[i], &b[i]) {
                Ok(std::cmp::Ordering::Equal) => continue,
                Ok(ord) => {
                    return if *descending { ord.reverse() } else { ord };
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                    return std::cmp::Ordering::Equal;
                }
            }
        }
        std::cmp::Ordering::Equal
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, row)| row).collect()),
    }
}

fn fold_extreme(
    rows: &[Row],
    selector: &RowExpr,
    ctx: &QueryContext,
    keep: std::cmp::Ordering,
) -> Result<PipelineOutput, ExecError> {
    let mut best: Option<Value> = None;
    for row in rows {
        let v = eval(selector, row, ctx)?;
        if v.is_null() {
            continue;
        }
        best = Some(match best {
            None => v,
            Some(current) => {
                if compare(&v, &current)? == keep {
                    v
                } else {
                    current
                }
            }
        });
    }
    match best {
        Some(v) => Ok(PipelineOutput::Scalar(v)),
        None => Err(ExecError::NoElements),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::QueryContext;
    use crate::error::ExecError;
    use crate::row_expr::RowSet;
    use crate::schema::test_entity;

    struct FixedStore {
        rows: Vec<Vec<Value>>,
    }

    impl MemoryStore for FixedStore {
        fn scan(&self, _entity: &EntityType) -> Result<RowSet, ExecError> {
            Ok(RowSet {
                rows: self
                    .rows
                    .iter()
                    .map(|items| Row {
                        items: items.clone(),
                    })
                    .collect(),
            })
        }
    }

    fn people_store() -> FixedStore {
        FixedStore {
            rows: vec![
                vec![Value::Int(1), Value::Text("Ada".into()), Value::Int(36)],
                vec![Value::Int(2), Value::Text("Grace".into()), Value::Int(45)],
                vec![Value::Int(3), Value::Text("Alan".into()), Value::Int(41)],
                vec![Value::Int(4), Value::Text("Ada".into()), Value::Int(30)],
            ],
        }
    }

    fn age() -> RowExpr {
        RowExpr::Column { index: 2 }
    }

    fn name() -> RowExpr {
        RowExpr::Column { index: 1 }
    }

    #[test]
    fn filter_order_skip_take() {
        let mut q = PipelineQuery::for_entity(test_entity());
        q.push_op(PipelineOp::Filter(RowExpr::Binary {
            op: crate::expr::BinaryOp::Gt,
            left: Box::new(age()),
            right: Box::new(RowExpr::Literal(Value::Int(30))),
        }));
        q.push_op(PipelineOp::OrderBy {
            key: age(),
            descending: false,
        });
        q.push_op(PipelineOp::Skip(RowExpr::Literal(Value::Int(1))));
        q.push_op(PipelineOp::Take(RowExpr::Literal(Value::Int(1))));
        let ctx = QueryContext::new();
        match execute(&q, &ctx, &people_store()).unwrap() {
            PipelineOutput::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].items[1], Value::Text("Alan".into()));
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn order_by_with_then_by_sorts_composite() {
        let mut q = PipelineQuery::for_entity(test_entity());
        q.push_op(PipelineOp::OrderBy {
            key: name(),
            descending: false,
        });
        q.push_op(PipelineOp::ThenBy {
            key: age(),
            descending: true,
        });
        let ctx = QueryContext::new();
        match execute(&q, &ctx, &people_store()).unwrap() {
            PipelineOutput::Rows(rows) => {
                let ids: Vec<Value> = rows.iter().map(|r| r.items[0].clone()).collect();
                assert_eq!(
                    ids,
                    vec![Value::Int(1), Value::Int(4), Value::Int(3), Value::Int(2)]
                );
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn distinct_after_projection_dedups_rows() {
        let mut q = PipelineQuery::for_entity(test_entity());
        let (_, prop) = test_entity().property("Name").map(|(i, p)| (i, p.clone())).unwrap();
        let scalar = q
            .bind_property(&ProjectionMember::root().add_member("N"), &prop)
            .err();
        assert!(scalar.is_some()); // only the root maps to an entity here
        let name_expr = q
            .bind_property(&ProjectionMember::root(), &prop)
            .unwrap();
        q.install_projection(vec![(
            ProjectionMember::root(),
            MemoryProjectionValue::Scalar(name_expr),
        )]);
        q.apply_projection();
        q.push_op(PipelineOp::Distinct);
        let ctx = QueryContext::new();
        match execute(&q, &ctx, &people_store()).unwrap() {
            PipelineOutput::Rows(rows) => {
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[0].items, vec![Value::Text("Ada".into())]);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn apply_projection_is_identity_when_layout_matches() {
        let mut q = PipelineQuery::for_entity(test_entity());
        let starts = q.apply_projection();
        assert_eq!(starts, vec![(ProjectionMember::root(), 0)]);
        assert!(q.ops().is_empty()); // full-entity scan already positional
        let again = q.apply_projection();
        assert_eq!(again, starts);
        assert!(q.ops().is_empty());
    }

    #[test]
    fn reductions_over_ages() {
        let ctx = QueryContext::new();
        let cases: Vec<(Reduction, Value)> = vec![
            (Reduction::Count, Value::Int(4)),
            (Reduction::Any, Value::Bool(true)),
            (
                Reduction::Sum {
                    selector: age(),
                    kind: ValueKind::Int,
                },
                Value::Int(152),
            ),
            (
                Reduction::Min {
                    selector: age(),
                },
                Value::Int(30),
            ),
            (
                Reduction::Max {
                    selector: age(),
                },
                Value::Int(45),
            ),
            (
                Reduction::Average {
                    selector: age(),
                },
                Value::Real(38.0),
            ),
            (
                Reduction::All {
                    predicate: RowExpr::Binary {
                        op: crate::expr::BinaryOp::Ge,
                        left: Box::new(age()),
                        right: Box::new(RowExpr::Literal(Value::Int(30))),
                    },
                },
                Value::Bool(true),
            ),
            (
                Reduction::Contains {
                    selector: name(),
                    value: RowExpr::Literal(Value::Text("Grace".into())),
                },
                Value::Bool(true),
            ),
        ];
        for (reduction, expected) in cases {
            let mut q = PipelineQuery::for_entity(test_entity());
            q.set_reduction(reduction.clone());
            match execute(&q, &ctx, &people_store()).unwrap() {
                PipelineOutput::Scalar(v) => assert_eq!(v, expected, "{:?}", reduction),
                other => panic!("expected scalar for {:?}, got {:?}", reduction, other),
            }
        }
    }

    #[test]
    fn single_over_many_rows_fails() {
        let mut q = PipelineQuery::for_entity(test_entity());
        q.set_reduction(Reduction::Single { or_default: false });
        let ctx = QueryContext::new();
        assert!(matches!(
            execute(&q, &ctx, &people_store()),
            Err(ExecError::MoreThanOne)
        ));
    }

    #[test]
    fn first_on_empty_input_respects_or_default() {
        let empty = FixedStore { rows: vec![] };
        let ctx = QueryContext::new();
        let mut strict = PipelineQuery::for_entity(test_entity());
        strict.set_reduction(Reduction::First { or_default: false });
        assert!(matches!(
            execute(&strict, &ctx, &empty),
            Err(ExecError::NoElements)
        ));

        let mut lenient = PipelineQuery::for_entity(test_entity());
        lenient.set_reduction(Reduction::First { or_default: true });
        match execute(&lenient, &ctx, &empty).unwrap() {
            PipelineOutput::Rows(rows) => assert!(rows.is_empty()),
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn min_on_empty_input_fails() {
        let empty = FixedStore { rows: vec![] };
        let ctx = QueryContext::new();
        let mut q = PipelineQuery::for_entity(test_entity());
        q.set_reduction(Reduction::Min { selector: age() });
        assert!(matches!(
            execute(&q, &ctx, &empty),
            Err(ExecError::NoElements)
        ));
    }
}
