//! Shared Utilities

pub mod error;
pub mod sanitize;
pub mod snowflake;
