//! Renders a `Select` representation into backend command text plus a
//! bound-parameter list.
//!
//! Rendering order: `SELECT` and the comma-joined projection, `FROM` and
//! the newline-joined table list (each table as delimited-name `AS`
//! delimited-alias), then `WHERE`, `ORDER BY`, `LIMIT`, and `OFFSET`, each
//! on its own line and only when present. Binary operators come from a
//! fixed token table; an operator missing from the table is an internal
//! failure, not a recoverable one.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::debug;

use crate::error::CompileError;
use crate::expr::BinaryOp;
use crate::select::Select;
use crate::sql_expr::{SqlNode, SqlScalar, TableRef};
use crate::type_mapping::TypeMapping;

lazy_static! {
    static ref OPERATOR_TOKENS: HashMap<BinaryOp, &'static str> = {
        use BinaryOp::*;
        let mut m = HashMap::new();
        m.insert(Eq, " = ");
        m.insert(Ne, " <> ");
        m.insert(Gt, " > ");
        m.insert(Ge, " >= ");
        m.insert(Lt, " < ");
        m.insert(Le, " <= ");
        m.insert(And, " AND ");
        m.insert(Or, " OR ");
        m.insert(Add, " + ");
        m.insert(Sub, " - ");
        m.insert(Mul, " * ");
        m.insert(Div, " / ");
        m.insert(Mod, " % ");
        m.insert(BitAnd, " & ");
        m.insert(BitOr, " | ");
        m
    };
}

/// Identifier delimiting and parameter naming for one backend dialect.
#[derive(Debug, Clone)]
pub struct SqlDialect {
    pub quote_open: char,
    pub quote_close: char,
    pub parameter_prefix: String,
}

impl Default for SqlDialect {
    fn default() -> SqlDialect {
        SqlDialect {
            quote_open: '"',
            quote_close: '"',
            parameter_prefix: String::from("@"),
        }
    }
}

impl SqlDialect {
    pub fn delimit(&self, identifier: &str) -> String {
        format!("{}{}{}", self.quote_open, identifier, self.quote_close)
    }

    pub fn placeholder(&self, name: &str) -> String {
        format!("{}{}", self.parameter_prefix, name)
    }
}

/// One registered command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    pub name: String,
    pub placeholder: String,
    pub mapping: Option<TypeMapping>,
    pub nullable: bool,
}

/// The rendered command: text plus its parameter list, in first-use order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub text: String,
    pub parameters: Vec<SqlParameter>,
}

pub fn generate_sql(select: &Select, dialect: &SqlDialect) -> Result<SqlCommand, CompileError> {
    let mut generator = Generator {
        dialect,
        sql: String::new(),
        parameters: vec![],
    };
    generator.visit_select(select)?;
    debug!("generated SQL: {}", generator.sql);
    Ok(SqlCommand {
        text: generator.sql,
        parameters: generator.parameters,
    })
}

struct Generator<'a> {
    dialect: &'a SqlDialect,
    sql: String,
    parameters: Vec<SqlParameter>,
}

impl<'a> Generator<'a> {
    fn visit_select(&mut self, select: &Select) -> Result<(), CompileError> {
        if select.projection().is_empty() {
            return Err(CompileError::Internal(
                "select has no applied projection".to_string(),
            ));
        }
        self.sql.push_str("SELECT ");
        if select.is_distinct() {
            self.sql.push_str("DISTINCT ");
        }
        for (i, item) in select.projection().iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit_scalar(item)?;
        }
        self.sql.push_str("\nFROM ");
        for (i, table) in select.tables().iter().enumerate() {
            if i > 0 {
                self.sql.push('\n');
            }
            self.visit_table(table);
        }
        if let Some(predicate) = select.predicate() {
            self.sql.push_str("\nWHERE ");
            self.visit_scalar(predicate)?;
        }
        if !select.ordering().is_empty() {
            self.sql.push_str("\nORDER BY ");
            for (i, term) in select.ordering().iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.visit_scalar(&term.expr)?;
                if term.descending {
                    self.sql.push_str(" DESC");
                }
            }
        }
        if let Some(limit) = select.limit() {
            self.sql.push_str("\nLIMIT ");
            self.visit_scalar(limit)?;
        }
        if let Some(offset) = select.offset() {
            self.sql.push_str("\nOFFSET ");
            self.visit_scalar(offset)?;
        }
        Ok(())
    }

    fn visit_table(&mut self, table: &TableRef) {
        if let Some(schema) = &table.schema {
            self.sql.push_str(&self.dialect.delimit(schema));
            self.sql.push('.');
        }
        self.sql.push_str(&self.dialect.delimit(&table.table));
        self.sql.push_str(" AS ");
        self.sql.push_str(&self.dialect.delimit(&table.alias));
    }

    fn visit_scalar(&mut self, scalar: &SqlScalar) -> Result<(), CompileError> {
        match &scalar.node {
            SqlNode::Column {
                table_alias,
                column,
            } => {
                self.sql.push_str(&self.dialect.delimit(table_alias));
                self.sql.push('.');
                self.sql.push_str(&self.dialect.delimit(column));
                Ok(())
            }
            SqlNode::Literal(value) => {
                let mapping = scalar.mapping.as_ref().ok_or_else(|| {
                    CompileError::Internal(format!(
                        "literal {} reached the generator without a type mapping",
                        value
                    ))
                })?;
                self.sql.push_str(&mapping.literal(value)?);
                Ok(())
            }
            SqlNode::Parameter { name, nullable } => {
                let placeholder = self.dialect.placeholder(name);
                if !self.parameters.iter().any(|p| p.name == *name) {
                    self.parameters.push(SqlParameter {
                        name: name.clone(),
                        placeholder: placeholder.clone(),
                        mapping: scalar.mapping.clone(),
                        nullable: *nullable,
                    });
                }
                self.sql.push_str(&placeholder);
                Ok(())
            }
            SqlNode::Binary { op, left, right } => {
                self.visit_scalar(left)?;
                let token = OPERATOR_TOKENS.get(op).ok_or_else(|| {
                    CompileError::Internal(format!("no rendering token for operator {:?}", op))
                })?;
                self.sql.push_str(token);
                self.visit_scalar(right)
            }
            SqlNode::Cast {
                operand,
                store_type,
            } => {
                self.sql.push_str("CAST(");
                self.visit_scalar(operand)?;
                self.sql.push_str(" AS ");
                self.sql.push_str(store_type);
                self.sql.push(')');
                Ok(())
            }
            SqlNode::Aggregate { func, arg } => {
                self.sql.push_str(func.name());
                self.sql.push('(');
                match arg {
                    Some(inner) => self.visit_scalar(inner)?,
                    None => self.sql.push('*'),
                }
                self.sql.push(')');
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionMember;
    use crate::schema::{EntityType, Property};
    use crate::select::{OrderingTerm, ProjectionValue};
    use crate::sql_expr::AggregateFunc;
    use crate::type_mapping::{default_mapping, ValueKind};
    use crate::value::Value;

    fn column_select() -> (Select, SqlScalar) {
        let entity = EntityType::new("T", "T", vec![Property::new("C", "C", ValueKind::Int)]);
        let mut select = Select::for_entity(entity.clone());
        let (_, prop) = entity.property("C").unwrap();
        let column = select
            .bind_property(&ProjectionMember::root(), prop)
            .unwrap();
        select.install_projection(vec![(
            ProjectionMember::root(),
            ProjectionValue::Scalar(column.clone()),
        )]);
        (select, column)
    }

    fn parameter(name: &str) -> SqlScalar {
        SqlScalar::value(
            SqlNode::Parameter {
                name: String::from(name),
                nullable: false,
            },
            Some(default_mapping(ValueKind::Int)),
        )
    }

    fn eq(left: SqlScalar, right: SqlScalar) -> SqlScalar {
        SqlScalar::condition(SqlNode::Binary {
            op: BinaryOp::Eq,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    #[test]
    fn renders_select_from_where_with_one_parameter() {
        let (mut select, column) = column_select();
        select.add_predicate(eq(column, parameter("p")));
        select.apply_projection();
        let command = generate_sql(&select, &SqlDialect::default()).unwrap();
        assert_eq!(
            command.text,
            "SELECT \"t\".\"C\"\nFROM \"T\" AS \"t\"\nWHERE \"t\".\"C\" = @p"
        );
        assert_eq!(command.parameters.len(), 1);
        assert_eq!(command.parameters[0].name, "p");
        assert_eq!(command.parameters[0].placeholder, "@p");
    }

    #[test]
    fn registers_repeated_parameter_name_once() {
        let (mut select, column) = column_select();
        let both = SqlScalar::condition(SqlNode::Binary {
            op: BinaryOp::And,
            left: Box::new(eq(column.clone(), parameter("p"))),
            right: Box::new(eq(parameter("p"), column)),
        });
        select.add_predicate(both);
        select.apply_projection();
        let command = generate_sql(&select, &SqlDialect::default()).unwrap();
        assert_eq!(command.parameters.len(), 1);
        assert!(command.text.contains("@p = \"t\".\"C\""));
    }

    #[test]
    fn renders_cast_and_literal() {
        let (mut select, column) = column_select();
        let cast = SqlScalar::value(
            SqlNode::Cast {
                operand: Box::new(column),
                store_type: String::from("REAL"),
            },
            Some(default_mapping(ValueKind::Real)),
        );
        let lit = SqlScalar::value(
            SqlNode::Literal(Value::Real(1.5)),
            Some(default_mapping(ValueKind::Real)),
        );
        select.add_predicate(SqlScalar::condition(SqlNode::Binary {
            op: BinaryOp::Gt,
            left: Box::new(cast),
            right: Box::new(lit),
        }));
        select.apply_projection();
        let command = generate_sql(&select, &SqlDialect::default()).unwrap();
        assert!(command
            .text
            .ends_with("WHERE CAST(\"t\".\"C\" AS REAL) > 1.5"));
    }

    #[test]
    fn renders_ordering_limit_offset_distinct() {
        let (mut select, column) = column_select();
        select.set_distinct();
        select.order_by(OrderingTerm {
            expr: column.clone(),
            descending: true,
        });
        select.set_limit(SqlScalar::value(
            SqlNode::Literal(Value::Int(10)),
            Some(default_mapping(ValueKind::Int)),
        ));
        select.set_offset(SqlScalar::value(
            SqlNode::Literal(Value::Int(5)),
            Some(default_mapping(ValueKind::Int)),
        ));
        select.apply_projection();
        let command = generate_sql(&select, &SqlDialect::default()).unwrap();
        assert_eq!(
            command.text,
            "SELECT DISTINCT \"t\".\"C\"\nFROM \"T\" AS \"t\"\nORDER BY \"t\".\"C\" DESC\nLIMIT 10\nOFFSET 5"
        );
    }

    #[test]
    fn renders_count_star() {
        let (mut select, _) = column_select();
        select.install_projection(vec![(
            ProjectionMember::root(),
            ProjectionValue::Scalar(SqlScalar::value(
                SqlNode::Aggregate {
                    func: AggregateFunc::Count,
                    arg: None,
                },
                Some(default_mapping(ValueKind::Int)),
            )),
        )]);
        select.apply_projection();
        let command = generate_sql(&select, &SqlDialect::default()).unwrap();
        assert_eq!(command.text, "SELECT COUNT(*)\nFROM \"T\" AS \"t\"");
    }

    #[test]
    fn untyped_literal_is_internal_error() {
        let (mut select, _) = column_select();
        select.add_predicate(SqlScalar::condition(SqlNode::Literal(Value::Bool(true))));
        select.apply_projection();
        let err = generate_sql(&select, &SqlDialect::default()).unwrap_err();
        assert!(matches!(err, CompileError::Internal(_)));
    }
}
