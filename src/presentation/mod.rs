//! # Presentation Layer
//!
//! HTTP surface and the websocket gateway.

pub mod http;
pub mod websocket;
