//! # Infrastructure Layer
//!
//! Persistence implementations and operational plumbing behind the
//! domain's `ChatStore` port.

pub mod database;
pub mod memory;
pub mod metrics;

pub use database::PgChatStore;
pub use memory::MemoryChatStore;
