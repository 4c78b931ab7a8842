//! Local conversation store
//!
//! Sessions, messages and settings live in a SQLite database. The
//! [`ConversationStore`] trait is the seam the synchronizer and the model
//! catalog program against; [`SqliteStorage`] is the production backend.
//!
//! All methods are blocking. Async callers run them through
//! [`crate::sync::WorkerPool`] so database I/O stays off the runtime threads.

use crate::error::Result;
use std::time::Duration;
use tokio::sync::broadcast;

pub mod sqlite;
pub mod types;

pub use sqlite::SqliteStorage;
pub use types::{Role, Session, SessionFilter, Setting, StoreEvent, StoredMessage};

/// Settings key holding the user's preferred model id
pub const SETTING_DEFAULT_MODEL: &str = "default_model";
/// Settings key holding the epoch-millis time of the last remote model fetch
pub const SETTING_MODELS_CACHE: &str = "models_cache";
/// Settings key holding the free-mode flag
pub const SETTING_FREE_MODE: &str = "free_mode";

/// Durable storage for sessions, messages and settings
///
/// Every committed write publishes a [`StoreEvent`] to subscribers.
pub trait ConversationStore: Send + Sync {
    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Insert a new session
    fn insert_session(&self, session: &Session) -> Result<()>;

    /// Fetch a session by exact id
    fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Resolve a full id or a unique id prefix to a session id
    fn resolve_session_id(&self, id_or_prefix: &str) -> Result<Option<String>>;

    /// List sessions, most recently updated first
    fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>>;

    /// Most recently updated non-archived sessions
    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>>;

    /// Sessions whose title contains `query`
    fn search_sessions(&self, query: &str) -> Result<Vec<Session>>;

    /// Rename a session; returns false when it does not exist
    fn update_session_title(&self, id: &str, title: &str) -> Result<bool>;

    /// Pin or unpin a session
    fn set_session_pinned(&self, id: &str, pinned: bool) -> Result<bool>;

    /// Archive or unarchive a session
    fn set_session_archived(&self, id: &str, archived: bool) -> Result<bool>;

    /// Change the model a session sends to
    fn set_session_model(&self, id: &str, model_id: &str, model_name: &str) -> Result<bool>;

    /// Delete a session and its messages in one transaction
    fn delete_session(&self, id: &str) -> Result<bool>;

    /// Delete every session and message; returns the number of sessions removed
    fn delete_all_sessions(&self) -> Result<usize>;

    /// Insert a message, optionally bumping the session counter in the same
    /// transaction
    fn insert_message(&self, message: &StoredMessage, bump_session: bool) -> Result<()>;

    /// Fetch a message by id
    fn get_message(&self, id: &str) -> Result<Option<StoredMessage>>;

    /// Messages of a session, oldest first
    fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>>;

    /// Append a delta to a message that is not yet complete
    fn append_content(&self, message_id: &str, delta: &str) -> Result<()>;

    /// Mark a message complete and no longer streaming
    ///
    /// `content`, when given, replaces the body in the same write. When
    /// `bump_session` is set the owning session's counter is incremented in
    /// the same transaction. Returns false when the message no longer exists.
    fn finalize_message(
        &self,
        message_id: &str,
        content: Option<&str>,
        token_count: usize,
        bump_session: bool,
    ) -> Result<bool>;

    /// Delete one message and decrement the session counter
    fn delete_message(&self, id: &str) -> Result<bool>;

    /// Number of stored messages for a session
    fn count_messages(&self, session_id: &str) -> Result<usize>;

    /// Sum of token counts for a session
    fn total_tokens(&self, session_id: &str) -> Result<usize>;

    /// Messages whose content contains `query`, newest first
    fn search_messages(&self, query: &str) -> Result<Vec<StoredMessage>>;

    /// Newest assistant message in a session
    fn last_assistant_message(&self, session_id: &str) -> Result<Option<StoredMessage>>;

    /// Read a setting
    fn get_setting(&self, key: &str) -> Result<Option<Setting>>;

    /// Insert or replace a setting
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a setting
    fn delete_setting(&self, key: &str) -> Result<bool>;

    /// Finalize messages left streaming by a process that went away
    ///
    /// Only messages with no write for at least `stale_after` are touched, so
    /// a reply another process is still streaming survives. Every session's
    /// `message_count` is recomputed from its complete messages. Returns the
    /// number of messages fixed.
    fn recover_interrupted(&self, stale_after: Duration) -> Result<usize>;
}
