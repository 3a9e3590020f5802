//! Conversation, participant and message operations

mod bot;
mod locks;
mod service;

pub use bot::{find_bot, BotResponder};
pub use locks::{ConversationGuard, ConversationLocks};
pub use service::{Actor, ChatStart, ConversationService, SendOutcome};
