use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ZenError;

/// A stored conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for the session
    pub id: String,
    /// User-friendly title
    pub title: String,
    /// Model id used for completions in this session
    pub model_id: String,
    /// Display name of the model at the time it was selected
    pub model_name: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last updated
    pub updated_at: DateTime<Utc>,
    /// Number of messages stored for the session
    pub message_count: usize,
    /// Pinned sessions sort first in the UI
    pub is_pinned: bool,
    /// Archived sessions are hidden from the active list
    pub is_archived: bool,
}

impl Session {
    /// Build a fresh session with a new UUID and zero messages
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::storage::Session;
    ///
    /// let session = Session::new("Refactor ideas", "opencode/sonic", "Sonic");
    /// assert_eq!(session.message_count, 0);
    /// assert!(!session.is_pinned);
    /// ```
    pub fn new(
        title: impl Into<String>,
        model_id: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            model_id: model_id.into(),
            model_name: model_name.into(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            is_pinned: false,
            is_archived: false,
        }
    }
}

/// Which sessions a listing query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionFilter {
    /// Every session
    All,
    /// Sessions that are not archived
    #[default]
    Active,
    /// Archived sessions only
    Archived,
    /// Pinned, non-archived sessions
    Pinned,
}

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user
    User,
    /// Model output
    Assistant,
    /// System prompt
    System,
    /// Tool result
    Tool,
}

impl Role {
    /// Wire/database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ZenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(ZenError::Storage(format!("Unknown message role: {}", other))),
        }
    }
}

/// A stored message belonging to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique identifier
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Author role
    pub role: Role,
    /// Message text; only grows while `is_streaming`
    pub content: String,
    /// Tool call this message answers, for `Role::Tool`
    pub tool_call_id: Option<String>,
    /// Tokens attributed at finalization
    pub token_count: usize,
    /// Creation time; primary sort key within a session
    pub created_at: DateTime<Utc>,
    /// Content is still arriving
    pub is_streaming: bool,
    /// No further content will be written
    pub is_complete: bool,
}

impl StoredMessage {
    fn build(session_id: &str, role: Role, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content,
            tool_call_id: None,
            token_count: 0,
            created_at: Utc::now(),
            is_streaming: false,
            is_complete: true,
        }
    }

    /// A complete user message
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::storage::{Role, StoredMessage};
    ///
    /// let msg = StoredMessage::user("session-1", "Hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert!(msg.is_complete);
    /// assert!(!msg.is_streaming);
    /// ```
    pub fn user(session_id: &str, content: impl Into<String>) -> Self {
        Self::build(session_id, Role::User, content.into())
    }

    /// A complete tool result
    pub fn tool_result(
        session_id: &str,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::build(session_id, Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// An empty assistant message that is still receiving content
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::storage::StoredMessage;
    ///
    /// let msg = StoredMessage::assistant_placeholder("session-1");
    /// assert!(msg.content.is_empty());
    /// assert!(msg.is_streaming);
    /// assert!(!msg.is_complete);
    /// ```
    pub fn assistant_placeholder(session_id: &str) -> Self {
        let mut msg = Self::build(session_id, Role::Assistant, String::new());
        msg.is_streaming = true;
        msg.is_complete = false;
        msg
    }
}

/// A key/value setting row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    /// Setting key
    pub key: String,
    /// Setting value
    pub value: String,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

/// Change notification published after every committed store write
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Session row inserted or updated (title, flags, counters)
    SessionChanged {
        /// Session id
        session_id: String,
    },
    /// Session and all its messages removed
    SessionDeleted {
        /// Session id
        session_id: String,
    },
    /// Every session removed
    AllSessionsDeleted,
    /// Message inserted or rewritten
    MessageChanged {
        /// Owning session
        session_id: String,
        /// Message id
        message_id: String,
    },
    /// A delta was appended to a streaming message
    ContentAppended {
        /// Owning session
        session_id: String,
        /// Message id
        message_id: String,
        /// The appended fragment
        delta: String,
    },
    /// A message stopped streaming
    MessageFinalized {
        /// Owning session
        session_id: String,
        /// Message id
        message_id: String,
    },
    /// Message removed
    MessageDeleted {
        /// Owning session
        session_id: String,
        /// Message id
        message_id: String,
    },
    /// Setting written or removed
    SettingChanged {
        /// Setting key
        key: String,
    },
}

impl StoreEvent {
    /// Session this event concerns, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionChanged { session_id }
            | Self::SessionDeleted { session_id }
            | Self::MessageChanged { session_id, .. }
            | Self::ContentAppended { session_id, .. }
            | Self::MessageFinalized { session_id, .. }
            | Self::MessageDeleted { session_id, .. } => Some(session_id),
            Self::AllSessionsDeleted | Self::SettingChanged { .. } => None,
        }
    }
}
