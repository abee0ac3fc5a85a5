//! Utility functions for the application

pub mod crypto;
pub mod debug;
pub mod file;
pub mod json;
pub mod sql;
pub mod time;
