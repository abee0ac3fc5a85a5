//! Data storage layer
//!
//! - `duckdb` - embedded columnar store: schema, migrations, repositories and
//!   the query-expression compiler
//! - `files` - content-addressed file bytes with DuckDB metadata
//! - `cache` - byte-oriented LRU backends behind a typed service
//! - `caching` - read-through caching decorator over any `TraceServer`
//! - `bridge` - MessagePack request/response bridge to a `TraceServer` in
//!   another task or process
//! - `types` - request/response types shared by every `TraceServer`
//! - `traits` - the `TraceServer` protocol
//! - `error` - unified error type

pub mod bridge;
pub mod cache;
pub mod caching;
pub mod duckdb;
pub mod error;
pub mod files;
pub mod traits;
pub mod types;

pub use caching::CachingTraceServer;
pub use duckdb::DuckdbService;
pub use error::DataError;
pub use traits::{RowStream, TraceServer};
