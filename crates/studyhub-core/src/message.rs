//! Conversation messages and the per-persona message log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique message identifier.
///
/// Ids come from a counter that survives log clears, so an id never refers
/// to two different messages during a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The student.
    User,
    /// The persona's model.
    Model,
}

/// Illustration attached to a model reply after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualAid {
    /// Slide title extracted from the reply.
    pub title: String,
    /// Bullet points extracted from the reply.
    pub points: Vec<String>,
    /// Generated image, as a `data:` URL.
    pub image_url: String,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier, unique for the process lifetime.
    pub id: MessageId,
    /// Author of the message.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Image the student attached, as a `data:` URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_image: Option<String>,
    /// Visual aid generated for this reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_aid: Option<VisualAid>,
}

/// Append-only message log for the active persona.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    next_id: u64,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, role: Role, content: String, attached_image: Option<String>) -> &Message {
        self.next_id += 1;
        self.messages.push(Message {
            id: MessageId(self.next_id),
            role,
            content,
            created_at: Utc::now(),
            attached_image,
            visual_aid: None,
        });
        // Just pushed, so the log is non-empty.
        &self.messages[self.messages.len() - 1]
    }

    /// Appends a student message.
    pub fn push_user(&mut self, content: impl Into<String>, attached_image: Option<String>) -> &Message {
        self.push(Role::User, content.into(), attached_image)
    }

    /// Appends a model reply.
    pub fn push_model(&mut self, content: impl Into<String>) -> &Message {
        self.push(Role::Model, content.into(), None)
    }

    /// Attaches a visual aid to the message with `id`.
    ///
    /// Returns `false` and leaves the log untouched if the message is gone or
    /// already carries a visual aid.
    pub fn attach_visual_aid(&mut self, id: MessageId, aid: VisualAid) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if message.visual_aid.is_none() => {
                message.visual_aid = Some(aid);
                true
            }
            _ => false,
        }
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Removes every message. Ids keep counting from where they were.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All messages in append order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the log has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
