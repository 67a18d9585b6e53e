//! Chat message and stream request types.
//!
//! ```
//! use muse::stream::message::{ChatMessage, Role, StreamRequest};
//!
//! let request = StreamRequest::new(vec![ChatMessage::user("hi")])
//!     .with_context("FIRSTNAME", "Sam");
//! assert_eq!(request.messages[0].role, Role::User);
//! assert!(!request.request_id.is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user input.
    User,
    /// Assistant output.
    Assistant,
    /// System instructions.
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One message in the conversation. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A single streaming chat request.
///
/// `request_id` is generated once at construction and identifies the whole
/// session, including a fallback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// Ordered conversation history.
    pub messages: Vec<ChatMessage>,
    /// Free-form user facts (`FIRSTNAME`, `PLAN`, ...).
    pub user_context: BTreeMap<String, String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Opaque per-session identifier.
    #[serde(skip)]
    pub request_id: String,
}

impl StreamRequest {
    /// Default temperature when the caller does not set one.
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// Build a request with a fresh request id.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            user_context: BTreeMap::new(),
            temperature: Self::DEFAULT_TEMPERATURE,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Add one user-context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_context.insert(key.into(), value.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}
