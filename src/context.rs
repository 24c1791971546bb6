//! The runtime context a compiled plan executes against, and the traits
//! the external collaborators implement: storage access for both backends
//! and identity tracking.

use std::collections::HashMap;

use crate::error::ExecError;
use crate::row_expr::RowSet;
use crate::schema::{EntityInstance, EntityType};
use crate::sql_gen::SqlCommand;
use crate::value::Value;

/// Identity tracking. Called exactly once per materialized entity instance
/// per execution; the core consumes no return value.
pub trait Tracker {
    fn start_tracking(&self, entity: &EntityType, instance: &EntityInstance);
}

/// Relational storage access: executes rendered command text with resolved
/// parameter values and returns raw rows.
pub trait SqlStore {
    fn query(
        &self,
        command: &SqlCommand,
        parameter_values: &[(String, Value)],
    ) -> Result<RowSet, ExecError>;
}

/// In-memory storage access: supplies the raw rows of one entity, laid out
/// one slot per declared property in declaration order.
pub trait MemoryStore {
    fn scan(&self, entity: &EntityType) -> Result<RowSet, ExecError>;
}

/// One execution's runtime state: the parameter snapshot and the optional
/// tracking collaborator. Each execution builds its own context; nothing
/// here is shared across executions.
#[derive(Default)]
pub struct QueryContext<'a> {
    params: HashMap<String, Value>,
    tracker: Option<&'a dyn Tracker>,
}

impl<'a> QueryContext<'a> {
    pub fn new() -> QueryContext<'a> {
        QueryContext {
            params: HashMap::new(),
            tracker: None,
        }
    }

    pub fn with_param(mut self, name: &str, value: Value) -> QueryContext<'a> {
        self.params.insert(String::from(name), value);
        self
    }

    pub fn with_tracker(mut self, tracker: &'a dyn Tracker) -> QueryContext<'a> {
        self.tracker = Some(tracker);
        self
    }

    pub fn param(&self, name: &str) -> Result<&Value, ExecError> {
        self.params
            .get(name)
            .ok_or_else(|| ExecError::MissingParameter(String::from(name)))
    }

    pub fn track(&self, entity: &EntityType, instance: &EntityInstance) {
        if let Some(tracker) = self.tracker {
            tracker.start_tracking(entity, instance);
        }
    }
}

#[test]
fn test_param_lookup() {
    let ctx = QueryContext::new().with_param("p", Value::Int(1));
    assert_eq!(ctx.param("p").unwrap(), &Value::Int(1));
    assert!(matches!(
        ctx.param("q"),
        Err(ExecError::MissingParameter(_))
    ));
}
