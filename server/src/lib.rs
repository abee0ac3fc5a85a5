//! Stitch: trace storage and query engine
//!
//! Calls, versioned objects, tables, feedback and files stored in an
//! embedded DuckDB database and served through the [`data::traits::TraceServer`]
//! protocol.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
