//! # Convoy
//!
//! Multi-tenant chat delivery core: conversation access control, a
//! transactional message pipeline with per-recipient inbox fan-out, and a
//! real-time websocket gateway.
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Entities and the `ChatStore` persistence port
//! - **Application Layer**: Access control, message pipeline, read tracking
//! - **Infrastructure Layer**: PostgreSQL and in-memory store implementations
//! - **Presentation Layer**: HTTP probes and the websocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! convoy/
//! +-- config/         Configuration management
//! +-- domain/         Entities and the persistence port
//! +-- application/    Delivery-core services
//! +-- infrastructure/ Store implementations and metrics
//! +-- presentation/   HTTP routes and the websocket gateway
//! +-- shared/         Common utilities (errors, sanitization, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Entities and the persistence port
pub mod domain;

// Application layer - Delivery-core services
pub mod application;

// Infrastructure layer - Store implementations
pub mod infrastructure;

// Presentation layer - HTTP and websocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
