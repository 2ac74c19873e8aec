//! Message domain types.
//!
//! Client conversations use [`Message`], whose [`Role`] includes the
//! transport-only `context` role. Providers only ever see [`ProviderMessage`],
//! whose [`ProviderRole`] has no such variant, so a `context` message cannot
//! reach a backend without passing through [`into_provider_messages`].

use serde::{Deserialize, Serialize};

/// The role of a message sender in a client conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Extra material to show the model as user-visible content
    Context,
}

/// A single message in a client conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self::new(Role::Context, content)
    }
}

/// Roles a backend model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
}

impl ProviderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in the form sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: ProviderRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ProviderRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ProviderRole::System, content)
    }
}

impl From<Message> for ProviderMessage {
    fn from(msg: Message) -> Self {
        let role = match msg.role {
            Role::System => ProviderRole::System,
            Role::User | Role::Context => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        };
        Self {
            role,
            content: msg.content,
        }
    }
}

/// Convert a client conversation into the provider form, rewriting
/// `context` messages to `user`. Content is passed through untouched.
pub fn into_provider_messages(messages: Vec<Message>) -> Vec<ProviderMessage> {
    messages.into_iter().map(ProviderMessage::from).collect()
}

/// Index of the most recent user message, if any.
pub fn last_user_index(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}
