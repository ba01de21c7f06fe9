//! Domain Entities
//!
//! Plain data records for the chat delivery core. Behavior lives in free
//! functions and the application services, not on the entities themselves.

pub mod attachment;
pub mod conversation;
pub mod inbox;
pub mod message;
pub mod participant;

pub use attachment::{is_bindable, Attachment, AttachmentStatus};
pub use conversation::{direct_key, is_active, Conversation, ConversationKind, ReadCursor};
pub use inbox::InboxEntry;
pub use message::{
    find_reaction, is_deleted, is_reply, EditRecord, Message, MessageKind, MessageStatus, Reaction,
};
pub use participant::{
    has_admin_role, is_active_member, Participant, ParticipantRole, ParticipantStatus,
};
