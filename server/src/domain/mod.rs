//! Trace storage domain
//!
//! - `calls` - call lifecycle events and reads over both layouts
//! - `objects` - versioned, content-addressed objects
//! - `tables` - content-addressed tables and chunked upload
//! - `feedback` - feedback validation, queries and purge
//! - `refs` - `weave:///` ref parsing and resolution
//! - `router` - per-project storage version routing
//! - `digest` - content digests
//! - `service` - `TraceService`, the DuckDB-backed `TraceServer`

pub mod calls;
pub mod digest;
pub mod feedback;
pub mod objects;
pub mod refs;
pub mod router;
pub mod service;
pub mod tables;

pub use refs::{RefTarget, WeaveRef};
pub use router::{StorageRouter, StorageVersion};
pub use service::TraceService;
pub use tables::create_table_chunked;
