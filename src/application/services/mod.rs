//! Application Services
//!
//! Business logic over the persistence port, wired by explicit constructor
//! injection and generic over the `ChatStore` implementation.

pub mod access_control;
pub mod conversation_service;
pub mod message_pipeline;
pub mod read_tracker;

pub use access_control::AccessControl;
pub use conversation_service::ConversationService;
pub use message_pipeline::{MessagePipeline, MAX_CONTENT_CHARS};
pub use read_tracker::ReadTracker;
