//! # Configuration Module
//!
//! Configuration loading and management. Settings can come from:
//! - Environment variables (prefixed with CONVOY__)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)

mod settings;

pub use settings::*;
