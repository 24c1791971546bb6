//! The model surface the compiler works against: entity descriptions with
//! their table names and declared properties, and the materialization of
//! raw row data back into entity instances.
//!
//! The persistent schema itself lives outside this crate; the host builds
//! `EntityType` values from wherever its model comes from and hands them to
//! the query IR.

use std::sync::Arc;

use crate::error::ExecError;
use crate::type_mapping::{default_mapping, TypeMapping, ValueKind};
use crate::value::Value;

/// One declared property of an entity: its name, the column it maps to,
/// its kind, and an optional storage type override.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub column: String,
    pub kind: ValueKind,
    pub nullable: bool,
    pub store_type: Option<String>,
}

impl Property {
    pub fn new(name: &str, column: &str, kind: ValueKind) -> Property {
        Property {
            name: String::from(name),
            column: String::from(column),
            kind,
            nullable: false,
            store_type: None,
        }
    }

    pub fn nullable(mut self) -> Property {
        self.nullable = true;
        self
    }

    /// the storage mapping for this property: the declared override, or the
    /// default mapping for its kind.
    pub fn mapping(&self) -> TypeMapping {
        match &self.store_type {
            Some(st) => TypeMapping::new(st, self.kind),
            None => default_mapping(self.kind),
        }
    }
}

/// Describes one entity: its backing table and its ordered property list.
/// Property order is the declaration order and fixes the column layout of
/// raw rows for this entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub properties: Vec<Property>,
}

impl EntityType {
    pub fn new(name: &str, table: &str, properties: Vec<Property>) -> Arc<EntityType> {
        Arc::new(EntityType {
            name: String::from(name),
            table: String::from(table),
            schema: None,
            properties,
        })
    }

    /// finds a declared property and its position in declaration order.
    pub fn property(&self, name: &str) -> Option<(usize, &Property)> {
        self.properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    /// constructs an entity instance from a row-buffer view covering this
    /// entity's properties in declaration order.
    pub fn materialize(&self, row_view: &[Value]) -> Result<EntityInstance, ExecError> {
        if row_view.len() != self.properties.len() {
            return Err(ExecError::TypeError(format!(
                "row view for {} has {} values, expected {}",
                self.name,
                row_view.len(),
                self.properties.len()
            )));
        }
        Ok(EntityInstance {
            entity: self.name.clone(),
            values: self
                .properties
                .iter()
                .zip(row_view.iter())
                .map(|(p, v)| (p.name.clone(), v.clone()))
                .collect(),
        })
    }
}

/// A materialized entity: the entity name plus one value per declared
/// property. The host decides what to do with it; identity tracking sees
/// every instance exactly once per execution.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    pub entity: String,
    pub values: Vec<(String, Value)>,
}

impl EntityInstance {
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == property)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
pub fn test_entity() -> Arc<EntityType> {
    EntityType::new(
        "Customer",
        "CUSTOMERS",
        vec![
            Property::new("Id", "ID", ValueKind::Int),
            Property::new("Name", "NAME", ValueKind::Text),
            Property::new("Age", "AGE", ValueKind::Int).nullable(),
        ],
    )
}

#[test]
fn test_property_lookup() {
    let entity = test_entity();
    let (idx, prop) = entity.property("Name").unwrap();
    assert_eq!(idx, 1);
    assert_eq!(prop.column, "NAME");
    assert!(entity.property("Missing").is_none());
}

#[test]
fn test_materialize() {
    let entity = test_entity();
    let row = vec![
        Value::Int(7),
        Value::Text("Ada".to_string()),
        Value::Null,
    ];
    let instance = entity.materialize(&row).unwrap();
    assert_eq!(instance.entity, "Customer");
    assert_eq!(instance.get("Name"), Some(&Value::Text("Ada".to_string())));
    assert_eq!(instance.get("Age"), Some(&Value::Null));
}

#[test]
fn test_materialize_arity_mismatch() {
    let entity = test_entity();
    assert!(entity.materialize(&[Value::Int(1)]).is_err());
}
