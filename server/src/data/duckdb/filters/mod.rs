//! Query expression compiler
//!
//! Turns a [`Query`](crate::data::types::Query) expression tree into a DuckDB
//! boolean predicate with `?` placeholders. Field names are resolved by a
//! [`FieldResolver`], so the same compiler serves call queries (both physical
//! layouts) and feedback queries.
//!
//! ## Usage
//!
//! ```no_run
//! use stitch_server::data::duckdb::filters::{CallsFieldResolver, SqlParams, compile_predicate};
//! use stitch_server::data::types::Expr;
//!
//! let expr = Expr::field_eq("inputs.model", "gpt-4o");
//! let mut params = SqlParams::default();
//! let sql = compile_predicate(&expr, &CallsFieldResolver::merged("c"), &mut params).unwrap();
//! assert_eq!(params.values, vec!["gpt-4o".to_string()]);
//! ```

mod compiler;
mod fields;

pub use compiler::{compile_predicate, compile_sort};
pub use fields::{
    CallsFieldResolver, CallsLayout, FeedbackFieldResolver, FieldKind, FieldResolver,
    ResolvedField, RowSet, Ty, split_field_path,
};

use thiserror::Error;

/// Bound parameter values, in placeholder order
///
/// Every value is bound as text; the generated SQL casts where a typed
/// comparison is needed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlParams {
    pub values: Vec<String>,
}

impl SqlParams {
    pub fn push(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }

    pub fn extend(&mut self, other: SqlParams) {
        self.values.extend(other.values);
    }

    /// Borrow the values in the shape `duckdb` expects for binding
    pub fn as_sql_refs(&self) -> Vec<&dyn duckdb::ToSql> {
        self.values.iter().map(|v| v as &dyn duckdb::ToSql).collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid field path: {0}")]
    InvalidPath(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid operand count: {0}")]
    Arity(String),

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("Expression does not evaluate to a boolean: {0}")]
    NotPredicate(String),

    /// Valid query shape the current storage layout cannot answer
    #[error("{0}")]
    Unsupported(String),
}
