//! Common types used across Chatdesk

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle status of a conversation
///
/// Transitions are caller-directed; the store never moves a conversation
/// between states on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Pending,
    Closed,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Closed => "closed",
        }
    }
}

/// Kind of actor attached to a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantType {
    /// Human agent (stored as `user`)
    #[sqlx(rename = "user")]
    #[serde(rename = "user")]
    Agent,
    /// Anonymous website visitor
    Visitor,
    /// Automated responder
    Bot,
}

impl ParticipantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "user",
            Self::Visitor => "visitor",
            Self::Bot => "bot",
        }
    }
}

/// Message payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }
}

/// Delivery status of a message
///
/// Only ever moves forward: sent -> delivered -> read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl Default for MessageStatus {
    fn default() -> Self {
        Self::Sent
    }
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Whether moving from `self` to `next` is a forward step
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        next > *self
    }

    /// Statuses that may be advanced to `self` (used for guarded SQL updates)
    pub fn predecessors(&self) -> &'static [&'static str] {
        match self {
            Self::Sent => &[],
            Self::Delivered => &["sent"],
            Self::Read => &["sent", "delivered"],
        }
    }
}

/// Per-tenant feature toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Bots,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bots => "bots",
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Isolation boundary for all data
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Routing destination inside a tenant (usually one per widget)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Inbox {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub bot_id: Option<Uuid>,
}

/// Automated responder configured at inbox or tenant level
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub inbox_id: Option<Uuid>,
    pub name: String,
    pub is_active: bool,
}

/// Human agent as seen by the realtime core
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub is_online: bool,
}

/// Anonymous website visitor
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visitor {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Data needed to register a visitor session
#[derive(Debug, Clone, Default)]
pub struct NewVisitor {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer_url: Option<String>,
}

/// Tenant owning a widget identity key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetTenant {
    pub tenant_id: Uuid,
    pub tenant_active: bool,
}

/// (type, id) pair identifying a conversation member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct ParticipantRef {
    pub participant_type: ParticipantType,
    pub participant_id: Uuid,
}

impl ParticipantRef {
    pub fn agent(id: Uuid) -> Self {
        Self {
            participant_type: ParticipantType::Agent,
            participant_id: id,
        }
    }

    pub fn visitor(id: Uuid) -> Self {
        Self {
            participant_type: ParticipantType::Visitor,
            participant_id: id,
        }
    }

    pub fn bot(id: Uuid) -> Self {
        Self {
            participant_type: ParticipantType::Bot,
            participant_id: id,
        }
    }
}

/// The central aggregate
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub inbox_id: Uuid,
    pub status: ConversationStatus,
    pub assigned_user_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Immutable message record (only `status` ever changes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_type: ParticipantType,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input for appending a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub sender: ParticipantRef,
    pub content: String,
    pub message_type: MessageType,
}

/// Agent inbox view filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxFilter {
    /// Assigned to the requesting agent
    Mine,
    /// Assigned to some other agent
    Others,
    /// Not assigned to anyone
    Unattended,
}

impl Default for InboxFilter {
    fn default() -> Self {
        Self::Mine
    }
}

/// Page request for message listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    /// Build a page, clamping to sane bounds
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_status_only_advances() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Read));

        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Delivered));
    }

    #[test]
    fn test_status_predecessors() {
        assert!(MessageStatus::Sent.predecessors().is_empty());
        assert_eq!(MessageStatus::Delivered.predecessors(), &["sent"]);
        assert_eq!(MessageStatus::Read.predecessors(), &["sent", "delivered"]);
    }

    #[test]
    fn test_agent_participant_serializes_as_user() {
        let json = serde_json::to_string(&ParticipantRef::agent(Uuid::nil())).unwrap();
        assert!(json.contains(r#""participant_type":"user""#));

        let parsed: ParticipantType = serde_json::from_str(r#""visitor""#).unwrap();
        assert_eq!(parsed, ParticipantType::Visitor);
    }

    #[test]
    fn test_page_clamps() {
        let page = Page::new(0, 1000);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, Page::MAX_LIMIT);
        assert_eq!(page.offset(), 0);

        assert_eq!(Page::new(3, 20).offset(), 40);
    }
}
