//! Compiled plans: the product of lowering plus materialization, invoked
//! repeatedly with fresh runtime contexts.
//!
//! A relational plan renders its `Select` to command text at execution
//! time, resolves registered parameters against the context's snapshot,
//! hands both to the `SqlStore`, and shapes the returned rows. An
//! in-memory plan interprets its pipeline against the `MemoryStore` and
//! shapes the result the same way.

use streaming_iterator::StreamingIterator;

use crate::context::{MemoryStore, QueryContext, SqlStore};
use crate::error::{CompileError, ExecError};
use crate::pipeline::{self, PipelineOutput, PipelineQuery};
use crate::row_expr::Row;
use crate::select::{Select, SingleRule};
use crate::shaper::{shape_row, ResultValue, Shaper};
use crate::sql_gen::{generate_sql, SqlCommand, SqlDialect};
use crate::value::Value;

/// What executing a plan produces: a sequence of values, or one value for
/// single-result queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<ResultValue>),
    Single(ResultValue),
}

#[derive(Debug, Clone)]
pub struct RelationalPlan {
    pub select: Select,
    pub shaper: Shaper,
    pub dialect: SqlDialect,
}

impl RelationalPlan {
    /// renders the command for this plan. Generation happens per execution;
    /// the parameter list is part of the rendered command.
    pub fn sql(&self) -> Result<SqlCommand, CompileError> {
        generate_sql(&self.select, &self.dialect)
    }

    pub fn execute(
        &self,
        ctx: &QueryContext,
        store: &dyn SqlStore,
    ) -> Result<QueryOutput, ExecError> {
        let command = self.sql()?;
        let mut values = Vec::with_capacity(command.parameters.len());
        for parameter in &command.parameters {
            values.push((parameter.name.clone(), ctx.param(&parameter.name)?.clone()));
        }
        let row_set = store.query(&command, &values)?;
        let mut rows: Vec<Row> = vec![];
        let mut it = row_set.streaming_iterator();
        while let Some(row) = it.next() {
            rows.push(row.clone());
        }
        finish(rows, &self.shaper, self.select.single_rule(), ctx)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPlan {
    pub pipeline: PipelineQuery,
    pub shaper: Shaper,
}

impl MemoryPlan {
    pub fn execute(
        &self,
        ctx: &QueryContext,
        store: &dyn MemoryStore,
    ) -> Result<QueryOutput, ExecError> {
        match pipeline::execute(&self.pipeline, ctx, store)? {
            PipelineOutput::Scalar(value) => {
                let row = Row { items: vec![value] };
                Ok(QueryOutput::Single(shape_row(&self.shaper, &row, ctx)?))
            }
            PipelineOutput::Rows(rows) => {
                if self.pipeline.is_single_result() {
                    // Strict reductions already failed in the interpreter;
                    // an empty result here means or-default.
                    match rows.first() {
                        Some(row) => Ok(QueryOutput::Single(shape_row(&self.shaper, row, ctx)?)),
                        None => Ok(QueryOutput::Single(ResultValue::Scalar(Value::Null))),
                    }
                } else {
                    let mut out = Vec::with_capacity(rows.len());
                    for row in &rows {
                        out.push(shape_row(&self.shaper, row, ctx)?);
                    }
                    Ok(QueryOutput::Rows(out))
                }
            }
        }
    }
}

fn finish(
    rows: Vec<Row>,
    shaper: &Shaper,
    single_rule: Option<SingleRule>,
    ctx: &QueryContext,
) -> Result<QueryOutput, ExecError> {
    let rule = match single_rule {
        None => {
            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                out.push(shape_row(shaper, row, ctx)?);
            }
            return Ok(QueryOutput::Rows(out));
        }
        Some(rule) => rule,
    };
    match rule {
        SingleRule::Aggregate => match rows.first() {
            Some(row) => Ok(QueryOutput::Single(shape_row(shaper, row, ctx)?)),
            None => Err(ExecError::NoElements),
        },
        SingleRule::First { or_default } => match rows.first() {
            Some(row) => Ok(QueryOutput::Single(shape_row(shaper, row, ctx)?)),
            None if or_default => Ok(QueryOutput::Single(ResultValue::Scalar(Value::Null))),
            None => Err(ExecError::NoElements),
        },
        SingleRule::Single { or_default } => {
            if rows.len() > 1 {
                return Err(ExecError::MoreThanOne);
            }
            match rows.first() {
                Some(row) => Ok(QueryOutput::Single(shape_row(shaper, row, ctx)?)),
                None if or_default => Ok(QueryOutput::Single(ResultValue::Scalar(Value::Null))),
                None => Err(ExecError::NoElements),
            }
        }
    }
}
