//! Error types for query compilation and plan execution.
//!
//! Compilation failures come in three classes: an operator or expression
//! shape with no lowering rule (`NotImplemented`), a sub-expression that was
//! expected to lower to a backend scalar or predicate but did not
//! (`InvalidTranslation`), and internal-consistency failures that should be
//! unreachable when the earlier gates hold (`Internal`).  All three abort the
//! single compile or generate call; none are retried or degraded to partial
//! results.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Operator {0} is not implemented.")]
    NotImplemented(String),
    #[error("Invalid translation: {0}.")]
    InvalidTranslation(String),
    #[error("Internal error: {0}.")]
    Internal(String),
}

/// Errors raised while executing a compiled plan against a runtime context.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("No value supplied for parameter {0}.")]
    MissingParameter(String),
    #[error("The result contained no elements.")]
    NoElements,
    #[error("The result contained more than one element.")]
    MoreThanOne,
    #[error("Type error: {0}.")]
    TypeError(String),
    #[error("Storage error: {0}.")]
    Storage(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
}
