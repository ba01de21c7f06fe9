//! # Application Layer
//!
//! Services implementing the delivery core's business rules.

pub mod services;

pub use services::*;
