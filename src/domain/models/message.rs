//! Inter-agent message envelope and the closed set of message types/priorities
//! exchanged over a [`crate::services::message_bus::MessageBus`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Closed set of message type tags agents exchange over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Alert,
    Warning,
    Data,
    Finding,
    Insight,
    Request,
    Query,
    Help,
    Response,
    Proposal,
    Vote,
    Consensus,
    Perspective,
    TaskDelegate,
    TaskComplete,
    TaskFailed,
    PriorityChange,
    AgentReady,
    AgentStarted,
    AgentComplete,
    AgentError,
    Status,
    Acknowledgment,
    Heartbeat,
}

/// Message priority. Variant declaration order doubles as delivery order
/// (`Critical` < `High` < `Medium` < `Low`), matching `#[derive(Ord)]`'s
/// top-to-bottom ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Lifecycle state of a single message as tracked by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Acknowledged,
    Failed,
    Expired,
}

/// A single unit of inter-agent communication.
///
/// `recipient` absent means broadcast: every agent subscribed to `kind`,
/// other than `sender`, receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub recipient: Option<String>,
    pub kind: MessageType,
    pub priority: MessagePriority,
    pub subject: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub requires_response: bool,
    pub response_to: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub tags: HashSet<String>,
    pub delivery_status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl Message {
    /// Starts a new message builder for `sender`. `recipient` defaults to
    /// broadcast (`None`); narrow with [`MessageBuilder::to`].
    #[must_use]
    pub fn builder(sender: impl Into<String>, kind: MessageType) -> MessageBuilder {
        MessageBuilder::new(sender, kind)
    }

    /// `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    /// Builds a reply to this message, preserving `priority` and defaulting
    /// `conversation_id` to the original message's id when absent — mirrors
    /// `AgentMessage.create_response` in the reference implementation.
    #[must_use]
    pub fn create_response(&self, from: impl Into<String>, payload: JsonValue) -> Self {
        let from = from.into();
        Self {
            id: Uuid::new_v4(),
            sender: from,
            recipient: Some(self.sender.clone()),
            kind: MessageType::Response,
            priority: self.priority,
            subject: format!("Re: {}", self.subject),
            payload,
            created_at: Utc::now(),
            expires_at: None,
            requires_response: false,
            response_to: Some(self.id),
            conversation_id: Some(self.conversation_id.unwrap_or(self.id)),
            correlation_id: self.correlation_id,
            tags: HashSet::new(),
            delivery_status: DeliveryStatus::Pending,
            delivered_at: None,
            retry_count: 0,
        }
    }
}

/// Fluent constructor for [`Message`]; keeps the large field list out of
/// call sites that only care about a handful of them.
pub struct MessageBuilder {
    sender: String,
    recipient: Option<String>,
    kind: MessageType,
    priority: MessagePriority,
    subject: String,
    payload: JsonValue,
    requires_response: bool,
    conversation_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    tags: HashSet<String>,
    ttl: Option<chrono::Duration>,
}

impl MessageBuilder {
    fn new(sender: impl Into<String>, kind: MessageType) -> Self {
        Self {
            sender: sender.into(),
            recipient: None,
            kind,
            priority: MessagePriority::default(),
            subject: String::new(),
            payload: JsonValue::Null,
            requires_response: false,
            conversation_id: None,
            correlation_id: None,
            tags: HashSet::new(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub const fn requires_response(mut self, requires: bool) -> Self {
        self.requires_response = requires;
        self
    }

    #[must_use]
    pub const fn conversation_id(mut self, id: Uuid) -> Self {
        self.conversation_id = Some(id);
        self
    }

    #[must_use]
    pub const fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: HashSet<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn build(self) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            sender: self.sender,
            recipient: self.recipient,
            kind: self.kind,
            priority: self.priority,
            subject: self.subject,
            payload: self.payload,
            created_at: now,
            expires_at: self.ttl.map(|d| now + d),
            requires_response: self.requires_response,
            response_to: None,
            conversation_id: self.conversation_id,
            correlation_id: self.correlation_id,
            tags: self.tags,
            delivery_status: DeliveryStatus::Pending,
            delivered_at: None,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_first() {
        let mut priorities = vec![
            MessagePriority::Low,
            MessagePriority::Critical,
            MessagePriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                MessagePriority::Critical,
                MessagePriority::High,
                MessagePriority::Low
            ]
        );
    }

    #[test]
    fn create_response_preserves_priority_and_links_conversation() {
        let original = Message::builder("scout", MessageType::Request)
            .to("analyst")
            .priority(MessagePriority::High)
            .subject("please review")
            .build();

        let response = original.create_response("analyst", serde_json::json!({"ok": true}));

        assert_eq!(response.priority, MessagePriority::High);
        assert_eq!(response.response_to, Some(original.id));
        assert_eq!(response.conversation_id, Some(original.id));
        assert_eq!(response.subject, "Re: please review");
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let msg = Message::builder("scout", MessageType::Data).build();
        assert!(!msg.is_expired(Utc::now()));
    }
}
