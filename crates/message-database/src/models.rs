//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a message body, in characters.
pub const MAX_CONTENT_LEN: usize = 160;

/// Outbound message record.
///
/// A message is created unsent and transitions to sent exactly once, via
/// [`Message::mark_sent`]. `sent` is true if and only if `message_id` is
/// non-empty and `sent_at` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Dispatch identifier assigned on a successful send.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Record a successful dispatch.
    pub fn mark_sent(&mut self, message_id: String, sent_at: DateTime<Utc>) {
        self.message_id = message_id;
        self.sent_at = Some(sent_at);
        self.sent = true;
    }

    /// Whether the sent flag agrees with the dispatch fields.
    pub fn is_consistent(&self) -> bool {
        self.sent == (!self.message_id.is_empty() && self.sent_at.is_some())
    }
}

/// Input for inserting a new pending message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub to: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            content: content.into(),
        }
    }
}
