use std::cell::RefCell;
use std::sync::Arc;

use diyorm::context::{MemoryStore, SqlStore, Tracker};
use diyorm::error::{CompileError, ExecError};
use diyorm::expr::{BinaryOp, Expr, OperatorKind};
use diyorm::row_expr::{Row, RowSet};
use diyorm::schema::{EntityInstance, EntityType, Property};
use diyorm::shaper::ResultValue;
use diyorm::type_mapping::ValueKind;
use diyorm::{
    compile_memory, compile_relational, QueryContext, QueryOutput, SqlCommand, SqlDialect, Value,
};

fn customer() -> Arc<EntityType> {
    EntityType::new(
        "Customer",
        "CUSTOMERS",
        vec![
            Property::new("Id", "ID", ValueKind::Int),
            Property::new("Name", "NAME", ValueKind::Text),
            Property::new("Age", "AGE", ValueKind::Int),
        ],
    )
}

fn customer_rows() -> Vec<Row> {
    vec![
        vec![Value::Int(1), Value::Text("Ada".into()), Value::Int(36)],
        vec![Value::Int(2), Value::Text("Grace".into()), Value::Int(45)],
        vec![Value::Int(3), Value::Text("Alan".into()), Value::Int(41)],
        vec![Value::Int(4), Value::Text("Ada".into()), Value::Int(30)],
    ]
    .into_iter()
    .map(|items| Row { items })
    .collect()
}

struct FixedMemoryStore;

impl MemoryStore for FixedMemoryStore {
    fn scan(&self, _entity: &EntityType) -> Result<RowSet, ExecError> {
        Ok(RowSet {
            rows: customer_rows(),
        })
    }
}

struct CannedSqlStore {
    rows: Vec<Row>,
    seen: RefCell<Vec<(String, Vec<(String, Value)>)>>,
}

impl CannedSqlStore {
    fn new(rows: Vec<Row>) -> CannedSqlStore {
        CannedSqlStore {
            rows,
            seen: RefCell::new(vec![]),
        }
    }
}

impl SqlStore for CannedSqlStore {
    fn query(
        &self,
        command: &SqlCommand,
        parameter_values: &[(String, Value)],
    ) -> Result<RowSet, ExecError> {
        self.seen
            .borrow_mut()
            .push((command.text.clone(), parameter_values.to_vec()));
        Ok(RowSet {
            rows: self.rows.clone(),
        })
    }
}

struct RecordingTracker {
    tracked: RefCell<Vec<EntityInstance>>,
}

impl RecordingTracker {
    fn new() -> RecordingTracker {
        RecordingTracker {
            tracked: RefCell::new(vec![]),
        }
    }
}

impl Tracker for RecordingTracker {
    fn start_tracking(&self, _entity: &EntityType, instance: &EntityInstance) {
        self.tracked.borrow_mut().push(instance.clone());
    }
}

fn adults_by_name() -> Expr {
    Expr::call(
        OperatorKind::Select,
        Expr::call(
            OperatorKind::OrderBy,
            Expr::call(
                OperatorKind::Where,
                Expr::source(customer()),
                vec![Expr::lambda(Expr::binary(
                    BinaryOp::Gt,
                    Expr::member(Expr::Var, "Age"),
                    Expr::constant(Value::Int(35)),
                ))],
            ),
            vec![Expr::lambda(Expr::member(Expr::Var, "Name"))],
        ),
        vec![Expr::lambda(Expr::new_shape(
            "NameAge",
            vec![
                ("Name", Expr::member(Expr::Var, "Name")),
                ("Age", Expr::member(Expr::Var, "Age")),
            ],
        ))],
    )
}

#[test]
fn test_memory_end_to_end_projection() {
    let plan = compile_memory(&adults_by_name()).unwrap();
    let ctx = QueryContext::new();
    let output = plan.execute(&ctx, &FixedMemoryStore).unwrap();
    match output {
        QueryOutput::Rows(values) => {
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            assert_eq!(
                rendered,
                vec![
                    "NameAge { Name: Ada, Age: 36 }",
                    "NameAge { Name: Alan, Age: 41 }",
                    "NameAge { Name: Grace, Age: 45 }",
                ]
            );
        }
        other => panic!("expected rows, got {:?}", other),
    }
}

#[test]
fn test_relational_renders_expected_sql() {
    let plan = compile_relational(&adults_by_name(), SqlDialect::default()).unwrap();
    let command = plan.sql().unwrap();
    assert_eq!(
        command.text,
        "SELECT \"c\".\"NAME\", \"c\".\"AGE\"\nFROM \"CUSTOMERS\" AS \"c\"\nWHERE \"c\".\"AGE\" > 35\nORDER BY \"c\".\"NAME\""
    );
    assert!(command.parameters.is_empty());
}

#[test]
fn test_compiling_twice_is_deterministic() {
    let query = adults_by_name();
    let a = compile_relational(&query, SqlDialect::default())
        .unwrap()
        .sql()
        .unwrap();
    let b = compile_relational(&query, SqlDialect::default())
        .unwrap()
        .sql()
        .unwrap();
    assert_eq!(a.text, b.text);
    assert_eq!(a.parameters, b.parameters);
}

#[test]
fn test_relational_execution_materializes_and_tracks_entities() {
    let query = Expr::call(
        OperatorKind::Where,
        Expr::source(customer()),
        vec![Expr::lambda(Expr::binary(
            BinaryOp::Eq,
            Expr::member(Expr::Var, "Name"),
            Expr::parameter("name", ValueKind::Text),
        ))],
    );
    let plan = compile_relational(&query, SqlDialect::default()).unwrap();
    let store = CannedSqlStore::new(vec![
        Row {
            items: vec![Value::Int(1), Value::Text("Ada".into()), Value::Int(36)],
        },
        Row {
            items: vec![Value::Int(4), Value::Text("Ada".into()), Value::Int(30)],
        },
    ]);
    let tracker = RecordingTracker::new();
    let ctx = QueryContext::new()
        .with_param("name", Value::Text("Ada".into()))
        .with_tracker(&tracker);
    let output = plan.execute(&ctx, &store).unwrap();

    match output {
        QueryOutput::Rows(values) => {
            assert_eq!(values.len(), 2);
            match &values[0] {
                ResultValue::Entity(instance) => {
                    assert_eq!(instance.entity, "Customer");
                    assert_eq!(instance.get("Id"), Some(&Value::Int(1)));
                }
                other => panic!("expected entity, got {:?}", other),
            }
        }
        other => panic!("expected rows, got {:?}", other),
    }

    // One tracking registration per materialized instance.
    assert_eq!(tracker.tracked.borrow().len(), 2);

    // The store saw the rendered command with the resolved parameter.
    let seen = store.seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].0.ends_with("WHERE \"c\".\"NAME\" = @name"));
    assert_eq!(
        seen[0].1,
        vec![("name".to_string(), Value::Text("Ada".into()))]
    );
}

#[test]
fn test_memory_tracking_per_entity_instance() {
    let query = Expr::call(
        OperatorKind::Where,
        Expr::source(customer()),
        vec![Expr::lambda(Expr::binary(
            BinaryOp::Eq,
            Expr::member(Expr::Var, "Name"),
            Expr::constant(Value::Text("Ada".into())),
        ))],
    );
    let plan = compile_memory(&query).unwrap();
    let tracker = RecordingTracker::new();
    let ctx = QueryContext::new().with_tracker(&tracker);
    let output = plan.execute(&ctx, &FixedMemoryStore).unwrap();
    match output {
        QueryOutput::Rows(values) => assert_eq!(values.len(), 2),
        other => panic!("expected rows, got {:?}", other),
    }
    assert_eq!(tracker.tracked.borrow().len(), 2);
}

#[test]
fn test_memory_aggregates_and_reductions() {
    let ages = Expr::call(
        OperatorKind::Select,
        Expr::source(customer()),
        vec![Expr::lambda(Expr::member(Expr::Var, "Age"))],
    );
    let ctx = QueryContext::new();

    let sum = compile_memory(&Expr::call(OperatorKind::Sum, ages.clone(), vec![]))
        .unwrap()
        .execute(&ctx, &FixedMemoryStore)
        .unwrap();
    assert_eq!(sum, QueryOutput::Single(ResultValue::Scalar(Value::Int(152))));

    let max = compile_memory(&Expr::call(
        OperatorKind::Max,
        Expr::source(customer()),
        vec![Expr::lambda(Expr::member(Expr::Var, "Age"))],
    ))
    .unwrap()
    .execute(&ctx, &FixedMemoryStore)
    .unwrap();
    assert_eq!(max, QueryOutput::Single(ResultValue::Scalar(Value::Int(45))));

    let contains = compile_memory(&Expr::call(
        OperatorKind::Contains,
        Expr::call(
            OperatorKind::Select,
            Expr::source(customer()),
            vec![Expr::lambda(Expr::member(Expr::Var, "Name"))],
        ),
        vec![Expr::constant(Value::Text("Grace".into()))],
    ))
    .unwrap()
    .execute(&ctx, &FixedMemoryStore)
    .unwrap();
    assert_eq!(
        contains,
        QueryOutput::Single(ResultValue::Scalar(Value::Bool(true)))
    );

    let first = compile_memory(&Expr::call(
        OperatorKind::FirstOrDefault,
        Expr::call(
            OperatorKind::Where,
            Expr::source(customer()),
            vec![Expr::lambda(Expr::binary(
                BinaryOp::Gt,
                Expr::member(Expr::Var, "Age"),
                Expr::constant(Value::Int(100)),
            ))],
        ),
        vec![],
    ))
    .unwrap()
    .execute(&ctx, &FixedMemoryStore)
    .unwrap();
    assert_eq!(first, QueryOutput::Single(ResultValue::Scalar(Value::Null)));
}

#[test]
fn test_memory_distinct_on_projection() {
    let query = Expr::call(
        OperatorKind::Distinct,
        Expr::call(
            OperatorKind::Select,
            Expr::source(customer()),
            vec![Expr::lambda(Expr::member(Expr::Var, "Name"))],
        ),
        vec![],
    );
    let plan = compile_memory(&query).unwrap();
    let ctx = QueryContext::new();
    match plan.execute(&ctx, &FixedMemoryStore).unwrap() {
        QueryOutput::Rows(values) => {
            let names: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            assert_eq!(names, vec!["Ada", "Grace", "Alan"]);
        }
        other => panic!("expected rows, got {:?}", other),
    }
}

#[test]
fn test_relational_aggregate_with_parameterized_count() {
    let query = Expr::call(
        OperatorKind::Count,
        Expr::call(
            OperatorKind::Where,
            Expr::source(customer()),
            vec![Expr::lambda(Expr::binary(
                BinaryOp::Ge,
                Expr::member(Expr::Var, "Age"),
                Expr::parameter("min_age", ValueKind::Int),
            ))],
        ),
        vec![],
    );
    let plan = compile_relational(&query, SqlDialect::default()).unwrap();
    assert_eq!(
        plan.sql().unwrap().text,
        "SELECT COUNT(*)\nFROM \"CUSTOMERS\" AS \"c\"\nWHERE \"c\".\"AGE\" >= @min_age"
    );

    let store = CannedSqlStore::new(vec![Row {
        items: vec![Value::Int(3)],
    }]);
    let ctx = QueryContext::new().with_param("min_age", Value::Int(36));
    assert_eq!(
        plan.execute(&ctx, &store).unwrap(),
        QueryOutput::Single(ResultValue::Scalar(Value::Int(3)))
    );
}

#[test]
fn test_unsupported_operator_fails_compile_on_both_backends() {
    let query = Expr::call(OperatorKind::GroupBy, Expr::source(customer()), vec![]);
    assert!(matches!(
        compile_relational(&query, SqlDialect::default()),
        Err(CompileError::NotImplemented(_))
    ));
    assert!(matches!(
        compile_memory(&query),
        Err(CompileError::NotImplemented(_))
    ));
}

#[test]
fn test_skip_take_with_parameters_in_memory() {
    let query = Expr::call(
        OperatorKind::Take,
        Expr::call(
            OperatorKind::Skip,
            Expr::call(
                OperatorKind::OrderBy,
                Expr::source(customer()),
                vec![Expr::lambda(Expr::member(Expr::Var, "Age"))],
            ),
            vec![Expr::parameter("offset", ValueKind::Int)],
        ),
        vec![Expr::constant(Value::Int(2))],
    );
    let plan = compile_memory(&query).unwrap();
    let ctx = QueryContext::new().with_param("offset", Value::Int(1));
    match plan.execute(&ctx, &FixedMemoryStore).unwrap() {
        QueryOutput::Rows(values) => {
            assert_eq!(values.len(), 2);
            match &values[0] {
                ResultValue::Entity(instance) => {
                    assert_eq!(instance.get("Age"), Some(&Value::Int(36)));
                }
                other => panic!("expected entity, got {:?}", other),
            }
        }
        other => panic!("expected rows, got {:?}", other),
    }
}
