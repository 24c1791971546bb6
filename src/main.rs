//! Small demo: build a model, compile one query per backend, print the
//! rendered SQL and the in-memory results.

use anyhow::Result;

use diyorm::context::MemoryStore;
use diyorm::error::ExecError;
use diyorm::expr::{BinaryOp, Expr, OperatorKind};
use diyorm::row_expr::{Row, RowSet};
use diyorm::schema::{EntityType, Property};
use diyorm::type_mapping::ValueKind;
use diyorm::{compile_memory, compile_relational, formatting, QueryContext, SqlDialect, Value};

struct DemoStore;

impl MemoryStore for DemoStore {
    fn scan(&self, _entity: &EntityType) -> Result<RowSet, ExecError> {
        let rows = vec![
            vec![Value::Int(1), Value::Text("Ada".into()), Value::Int(36)],
            vec![Value::Int(2), Value::Text("Grace".into()), Value::Int(45)],
            vec![Value::Int(3), Value::Text("Alan".into()), Value::Int(41)],
        ];
        Ok(RowSet {
            rows: rows.into_iter().map(|items| Row { items }).collect(),
        })
    }
}

fn main() -> Result<()> {
    let customer = EntityType::new(
        "Customer",
        "CUSTOMERS",
        vec![
            Property::new("Id", "ID", ValueKind::Int),
            Property::new("Name", "NAME", ValueKind::Text),
            Property::new("Age", "AGE", ValueKind::Int),
        ],
    );

    let query = Expr::call(
        OperatorKind::Select,
        Expr::call(
            OperatorKind::OrderBy,
            Expr::call(
                OperatorKind::Where,
                Expr::source(customer),
                vec![Expr::lambda(Expr::binary(
                    BinaryOp::Gt,
                    Expr::member(Expr::Var, "Age"),
                    Expr::constant(Value::Int(40)),
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
    );

    println!("-----");
    println!("Relational backend renders:");
    let relational = compile_relational(&query, SqlDialect::default())?;
    println!("{}", relational.sql()?.text);

    println!("-----");
    println!("In-memory backend evaluates:");
    let memory = compile_memory(&query)?;
    let ctx = QueryContext::new();
    let output = memory.execute(&ctx, &DemoStore)?;
    formatting::print_output(&output);
    Ok(())
}
