//! The relational query representation: one `Select` per compiled query,
//! built up by operator lowering and rendered to text by the generator.
//!
//! The `Select` owns its table list, the projection mapping from projection
//! members to translated expressions, the positional projection list built
//! by `apply_projection`, and the predicate. It is an owned value threaded
//! through the lowering pipeline, never shared.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CompileError;
use crate::projection::ProjectionMember;
use crate::schema::{EntityType, Property};
use crate::sql_expr::{SqlNode, SqlScalar, TableRef};

/// A per-occurrence cache of property -> column expression bindings for one
/// entity appearing in the query. Populated lazily on first request; owned
/// by the `Select` whose mapping holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityProjection {
    pub entity: Arc<EntityType>,
    table_alias: String,
    cache: HashMap<String, SqlScalar>,
}

impl EntityProjection {
    pub fn new(entity: Arc<EntityType>, table_alias: &str) -> EntityProjection {
        EntityProjection {
            entity,
            table_alias: String::from(table_alias),
            cache: HashMap::new(),
        }
    }

    /// the column expression for one declared property of this occurrence.
    pub fn get_property(&mut self, property: &Property) -> SqlScalar {
        if let Some(cached) = self.cache.get(&property.name) {
            return cached.clone();
        }
        let scalar = SqlScalar::value(
            SqlNode::Column {
                table_alias: self.table_alias.clone(),
                column: property.column.clone(),
            },
            Some(property.mapping()),
        );
        self.cache.insert(property.name.clone(), scalar.clone());
        scalar
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// One value in the projection mapping: a translated scalar, or an entity
/// projection for a whole-entity leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionValue {
    Scalar(SqlScalar),
    Entity(EntityProjection),
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingTerm {
    pub expr: SqlScalar,
    pub descending: bool,
}

/// How a single-result query resolves its rows into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleRule {
    /// An aggregate; the backend returns exactly one row.
    Aggregate,
    First { or_default: bool },
    Single { or_default: bool },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    tables: Vec<TableRef>,
    mapping: Vec<(ProjectionMember, ProjectionValue)>,
    projection: Vec<SqlScalar>,
    index_map: Vec<(ProjectionMember, usize)>,
    projection_applied: bool,
    predicate: Option<SqlScalar>,
    ordering: Vec<OrderingTerm>,
    limit: Option<SqlScalar>,
    offset: Option<SqlScalar>,
    distinct: bool,
    single_rule: Option<SingleRule>,
}

impl Select {
    /// a select over one entity's table, projecting the whole entity at the
    /// root projection member.
    pub fn for_entity(entity: Arc<EntityType>) -> Select {
        let alias: String = entity.table.to_lowercase().chars().take(1).collect();
        let table = TableRef::new(&entity.table, entity.schema.as_deref(), &alias);
        let root_projection = EntityProjection::new(entity, &alias);
        Select {
            tables: vec![table],
            mapping: vec![(
                ProjectionMember::root(),
                ProjectionValue::Entity(root_projection),
            )],
            ..Select::default()
        }
    }

    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    pub fn projection(&self) -> &[SqlScalar] {
        &self.projection
    }

    pub fn predicate(&self) -> Option<&SqlScalar> {
        self.predicate.as_ref()
    }

    pub fn ordering(&self) -> &[OrderingTerm] {
        &self.ordering
    }

    pub fn limit(&self) -> Option<&SqlScalar> {
        self.limit.as_ref()
    }

    pub fn offset(&self) -> Option<&SqlScalar> {
        self.offset.as_ref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn single_rule(&self) -> Option<SingleRule> {
        self.single_rule
    }

    pub fn is_single_result(&self) -> bool {
        self.single_rule.is_some()
    }

    /// resolves a deferred placeholder to the column expression for one
    /// property of the entity projection recorded at the placeholder's path.
    pub fn bind_property(
        &mut self,
        member: &ProjectionMember,
        property: &Property,
    ) -> Result<SqlScalar, CompileError> {
        match self.mapping.iter_mut().find(|(m, _)| m == member) {
            Some((_, ProjectionValue::Entity(ep))) => Ok(ep.get_property(property)),
            Some((_, ProjectionValue::Scalar(_))) => Err(CompileError::InvalidTranslation(
                format!("projection member {} is not an entity", member),
            )),
            None => Err(CompileError::Internal(format!(
                "no projection mapping for member {}",
                member
            ))),
        }
    }

    /// the translated expression recorded at a projection member, if any.
    pub fn projection_value(&self, member: &ProjectionMember) -> Option<&ProjectionValue> {
        self.mapping
            .iter()
            .find(|(m, _)| m == member)
            .map(|(_, v)| v)
    }

    /// the scalar bound at the root member, for reductions that reuse the
    /// current scalar projection.
    pub fn scalar_projection(&self) -> Option<&SqlScalar> {
        match self.projection_value(&ProjectionMember::root()) {
            Some(ProjectionValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// installs a new projection mapping, replacing the previous one
    /// wholesale and invalidating any positional projection built from it.
    pub fn install_projection(&mut self, mapping: Vec<(ProjectionMember, ProjectionValue)>) {
        self.mapping = mapping;
        self.projection.clear();
        self.index_map.clear();
        self.projection_applied = false;
    }

    /// flattens the current mapping into the ordered positional projection
    /// list. Entity leaves expand to one column expression per declared
    /// property in declaration order; scalar leaves contribute one slot.
    /// Returns the member -> starting-index map. Idempotent until the
    /// mapping is replaced.
    pub fn apply_projection(&mut self) -> Vec<(ProjectionMember, usize)> {
        if self.projection_applied {
            return self.index_map.clone();
        }
        let mut index = 0;
        for (member, value) in self.mapping.iter_mut() {
            self.index_map.push((member.clone(), index));
            match value {
                ProjectionValue::Entity(ep) => {
                    let properties = ep.entity.properties.clone();
                    for property in &properties {
                        self.projection.push(ep.get_property(property));
                        index += 1;
                    }
                }
                ProjectionValue::Scalar(s) => {
                    self.projection.push(s.clone());
                    index += 1;
                }
            }
        }
        self.projection_applied = true;
        self.index_map.clone()
    }

    /// conjoins a predicate with any already present.
    pub fn add_predicate(&mut self, expr: SqlScalar) {
        self.predicate = Some(match self.predicate.take() {
            None => expr,
            Some(existing) => SqlScalar::condition(SqlNode::Binary {
                op: crate::expr::BinaryOp::And,
                left: Box::new(existing),
                right: Box::new(expr),
            }),
        });
    }

    /// starts a fresh ordering, discarding any previous one.
    pub fn order_by(&mut self, term: OrderingTerm) {
        self.ordering.clear();
        self.ordering.push(term);
    }

    /// appends a subordinate ordering term.
    pub fn then_by(&mut self, term: OrderingTerm) {
        self.ordering.push(term);
    }

    pub fn set_limit(&mut self, expr: SqlScalar) {
        self.limit = Some(expr);
    }

    pub fn set_offset(&mut self, expr: SqlScalar) {
        self.offset = Some(expr);
    }

    pub fn set_distinct(&mut self) {
        self.distinct = true;
    }

    pub fn set_single(&mut self, rule: SingleRule) {
        self.single_rule = Some(rule);
    }
}

#[cfg(test)]
use crate::schema::test_entity;

#[test]
fn test_bind_property_memoizes() {
    let entity = test_entity();
    let mut select = Select::for_entity(entity.clone());
    let (_, name) = entity.property("Name").unwrap();
    let first = select.bind_property(&ProjectionMember::root(), name).unwrap();
    let second = select.bind_property(&ProjectionMember::root(), name).unwrap();
    assert_eq!(first, second);
    match select.projection_value(&ProjectionMember::root()).unwrap() {
        ProjectionValue::Entity(ep) => assert_eq!(ep.cached_len(), 1),
        _ => panic!("expected entity projection at root"),
    }
}

#[test]
fn test_apply_projection_expands_entity() {
    let entity = test_entity();
    let mut select = Select::for_entity(entity);
    let starts = select.apply_projection();
    assert_eq!(starts, vec![(ProjectionMember::root(), 0)]);
    // One column expression per declared property, in declaration order.
    let columns: Vec<&str> = select
        .projection()
        .iter()
        .map(|s| match &s.node {
            SqlNode::Column { column, .. } => column.as_str(),
            _ => panic!("expected column expression"),
        })
        .collect();
    assert_eq!(columns, vec!["ID", "NAME", "AGE"]);
}

#[test]
fn test_install_projection_replaces_not_merges() {
    use crate::type_mapping::{default_mapping, ValueKind};
    use crate::value::Value;
    let mut select = Select::for_entity(test_entity());
    select.apply_projection();
    let member = ProjectionMember::root().add_member("A");
    select.install_projection(vec![(
        member.clone(),
        ProjectionValue::Scalar(SqlScalar::value(
            SqlNode::Literal(Value::Int(1)),
            Some(default_mapping(ValueKind::Int)),
        )),
    )]);
    assert!(select.projection_value(&ProjectionMember::root()).is_none());
    assert!(select.projection_value(&member).is_some());
    let starts = select.apply_projection();
    assert_eq!(starts, vec![(member, 0)]);
    assert_eq!(select.projection().len(), 1);
}

#[test]
fn test_add_predicate_conjoins() {
    use crate::expr::BinaryOp;
    use crate::value::Value;
    let mut select = Select::for_entity(test_entity());
    let p1 = SqlScalar::condition(SqlNode::Literal(Value::Bool(true)));
    let p2 = SqlScalar::condition(SqlNode::Literal(Value::Bool(false)));
    select.add_predicate(p1.clone());
    assert_eq!(select.predicate(), Some(&p1));
    select.add_predicate(p2.clone());
    match &select.predicate().unwrap().node {
        SqlNode::Binary { op, left, right } => {
            assert_eq!(*op, BinaryOp::And);
            assert_eq!(**left, p1);
            assert_eq!(**right, p2);
        }
        _ => panic!("expected conjunction"),
    }
}
