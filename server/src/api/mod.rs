//! Transport shims around the trace server

#[cfg(unix)]
pub mod sidecar;
