//! diyorm is the query-compilation core of a data-access layer.
//!
//! A query arrives as operator-level IR (see [`expr`]): an entity source
//! wrapped in calls from a fixed algebra (filter, project, sort, paging,
//! distinct, aggregates, single-result reductions, containment). Compiling
//! lowers that IR once, ahead of execution, onto one of two backends:
//!
//! - the relational backend builds a [`select::Select`] and renders it to
//!   command text plus a parameter list at execution time;
//! - the in-memory backend builds a [`pipeline::PipelineQuery`], a chain of
//!   sequence operators over positional row tuples.
//!
//! Either way the result is a plan that, given a runtime context and the
//! matching storage collaborator, executes the backend query and rebuilds
//! typed result values from raw rows, registering every materialized
//! entity instance with the identity-tracking collaborator.
//!
//! Storage access, the persistent schema, and identity tracking are
//! external: the host implements the traits in [`context`] and builds
//! [`schema::EntityType`] descriptions from its model.

pub mod context;
pub mod error;
pub mod expr;
pub mod formatting;
mod lower;
pub mod lower_memory;
pub mod lower_relational;
pub mod pipeline;
pub mod plan;
pub mod projection;
pub mod row_expr;
pub mod schema;
pub mod select;
pub mod shaper;
pub mod sql_expr;
pub mod sql_gen;
pub mod sql_translate;
pub mod type_mapping;
pub mod value;

use log::debug;

pub use context::{MemoryStore, QueryContext, SqlStore, Tracker};
pub use error::{CompileError, ExecError};
pub use expr::{Expr, OperatorKind};
pub use plan::{MemoryPlan, QueryOutput, RelationalPlan};
pub use shaper::ResultValue;
pub use sql_gen::{SqlCommand, SqlDialect};
pub use value::Value;

/// Compiles a query against the relational backend. The returned plan
/// renders SQL and resolves parameters per execution.
pub fn compile_relational(
    query: &Expr,
    dialect: SqlDialect,
) -> Result<RelationalPlan, CompileError> {
    let mut shaped = lower_relational::lower(query)?;
    let starts = shaped.select.apply_projection();
    let shaper = shaper::lower_shape(&shaped.shape, &starts)?;
    debug!("compiled relational plan over {} slots", starts.len());
    Ok(RelationalPlan {
        select: shaped.select,
        shaper,
        dialect,
    })
}

/// Compiles a query against the in-memory backend.
pub fn compile_memory(query: &Expr) -> Result<MemoryPlan, CompileError> {
    let mut shaped = lower_memory::lower(query)?;
    let starts = shaped.pipeline.apply_projection();
    let shaper = shaper::lower_shape(&shaped.shape, &starts)?;
    debug!("compiled in-memory plan over {} slots", starts.len());
    Ok(MemoryPlan {
        pipeline: shaped.pipeline,
        shaper,
    })
}
