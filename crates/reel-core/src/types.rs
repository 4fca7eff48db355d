//! Core types shared by the completion client, the renderer and the session loop.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one render attempt.
///
/// Random (`UUIDv4`) so that concurrent sessions cannot collide on scratch
/// files or media directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScratchId(pub String);

impl ScratchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// File stem shared by the scene file, its log and its media directory.
    pub fn stem(&self) -> String {
        format!("scene_{}", self.0)
    }
}

impl Default for ScratchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScratchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ScratchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Conversation ---

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only conversation history for one generation session.
///
/// There is no way to remove or rewrite a message once pushed; a new session
/// starts from a new transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transcript from a system + user pair.
    pub fn seeded(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// --- Rendering ---

/// Named renderer quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "low_quality")]
    Low,
    #[serde(rename = "medium_quality")]
    Medium,
    #[serde(rename = "high_quality")]
    High,
    #[default]
    #[serde(rename = "production_quality")]
    Production,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low_quality",
            Self::Medium => "medium_quality",
            Self::High => "high_quality",
            Self::Production => "production_quality",
        }
    }

    /// Command-line flag passed to the renderer.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Low => "-ql",
            Self::Medium => "-qm",
            Self::High => "-qh",
            Self::Production => "-qp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low_quality" | "low" => Some(Self::Low),
            "medium_quality" | "medium" => Some(Self::Medium),
            "high_quality" | "high" => Some(Self::High),
            "production_quality" | "production" => Some(Self::Production),
            _ => None,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
