//! Conversation log
//!
//! Stored turns per conversation plus the message-entity links recorded
//! for each turn.

pub mod handler;
pub mod store;
pub mod types;

pub use handler::{conversation_router, ConversationState};
pub use store::ConversationStore;
pub use types::*;
