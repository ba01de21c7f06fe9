//! # Domain Layer
//!
//! Core entities of the delivery subsystem and the persistence port they are
//! stored through. No dependencies on infrastructure or presentation.

pub mod entities;
pub mod store;

pub use entities::*;
pub use store::{ChatStore, NewMessage, NewParticipant};
