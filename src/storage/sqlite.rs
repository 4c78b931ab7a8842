use crate::error::{Result, ZenError};
use crate::storage::types::{Role, Session, SessionFilter, Setting, StoreEvent, StoredMessage};
use crate::storage::ConversationStore;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// Environment variable that overrides the database location
pub const DB_PATH_ENV: &str = "ZENCHAT_DB";

const EVENT_CAPACITY: usize = 256;

const SESSION_COLUMNS: &str =
    "id, title, model_id, model_name, created_at, updated_at, message_count, is_pinned, is_archived";

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, tool_call_id, token_count, created_at, is_streaming, is_complete";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        model_id TEXT NOT NULL,
        model_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        is_pinned INTEGER NOT NULL DEFAULT 0,
        is_archived INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_call_id TEXT,
        token_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        is_streaming INTEGER NOT NULL DEFAULT 0,
        is_complete INTEGER NOT NULL DEFAULT 1,
        touched_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_messages_session_created
        ON messages (session_id, created_at);
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

/// Maps any displayable error into `ZenError::Storage` with a short prefix
trait StorageContext<T> {
    fn storage(self, what: &str) -> Result<T>;
}

impl<T, E: Display> StorageContext<T> for std::result::Result<T, E> {
    fn storage(self, what: &str) -> Result<T> {
        self.map_err(|e| ZenError::Storage(format!("{}: {}", what, e)))
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    let message_count: i64 = row.get(6)?;
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        model_id: row.get(2)?,
        model_name: row.get(3)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        message_count: message_count.max(0) as usize,
        is_pinned: row.get(7)?,
        is_archived: row.get(8)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let role = role.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let token_count: i64 = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        tool_call_id: row.get(4)?,
        token_count: token_count.max(0) as usize,
        created_at: parse_timestamp(&created_at),
        is_streaming: row.get(7)?,
        is_complete: row.get(8)?,
    })
}

/// Look up `(session_id, is_complete)` for a message inside a transaction
fn message_state(tx: &Transaction<'_>, message_id: &str) -> Result<Option<(String, bool)>> {
    tx.query_row(
        "SELECT session_id, is_complete FROM messages WHERE id = ?1",
        params![message_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .storage("Failed to look up message")
}

/// SQLite-backed [`ConversationStore`]
pub struct SqliteStorage {
    db_path: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteStorage {
    /// Open the default database
    ///
    /// Honors `ZENCHAT_DB`; otherwise the file lives in the platform data
    /// directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var(DB_PATH_ENV) {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("ai", "opencode", "zenchat")
            .ok_or_else(|| ZenError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("zenchat.db"))
    }

    /// Open (creating if needed) the database at `db_path`
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("chat.db")).unwrap();
    /// assert!(storage.db_path().exists());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .storage("Failed to create parent directory for database")?;
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let storage = Self { db_path, events };
        storage.init()?;
        Ok(storage)
    }

    /// Location of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).storage("Failed to open database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .storage("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .storage("Failed to enable foreign keys")?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .storage("Failed to enable WAL")?;
        conn.execute_batch(SCHEMA)
            .storage("Failed to create tables")?;
        // Databases created before the heartbeat column existed.
        if conn.prepare("SELECT touched_at FROM messages LIMIT 0").is_err() {
            conn.execute_batch("ALTER TABLE messages ADD COLUMN touched_at TEXT")
                .storage("Failed to add messages.touched_at")?;
        }
        Ok(())
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn query_sessions(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Session>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql).storage("Failed to prepare statement")?;
        let rows = stmt
            .query_map(args, session_from_row)
            .storage("Failed to query sessions")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .storage("Failed to read session row")
    }

    fn query_messages(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql).storage("Failed to prepare statement")?;
        let rows = stmt
            .query_map(args, message_from_row)
            .storage("Failed to query messages")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .storage("Failed to read message row")
    }

    fn update_session_column(&self, id: &str, sql: &str, value: &dyn rusqlite::ToSql) -> Result<bool> {
        let conn = self.open()?;
        let changed = conn
            .execute(sql, params![value, id])
            .storage("Failed to update session")?;
        if changed > 0 {
            self.publish(StoreEvent::SessionChanged {
                session_id: id.to_string(),
            });
        }
        Ok(changed > 0)
    }
}

impl ConversationStore for SqliteStorage {
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            &format!(
                "INSERT INTO sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                SESSION_COLUMNS
            ),
            params![
                session.id,
                session.title,
                session.model_id,
                session.model_name,
                timestamp(&session.created_at),
                timestamp(&session.updated_at),
                session.message_count as i64,
                session.is_pinned,
                session.is_archived,
            ],
        )
        .storage("Failed to insert session")?;

        self.publish(StoreEvent::SessionChanged {
            session_id: session.id.clone(),
        });
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            params![id],
            session_from_row,
        )
        .optional()
        .storage("Failed to query session")
    }

    fn resolve_session_id(&self, id_or_prefix: &str) -> Result<Option<String>> {
        if id_or_prefix.is_empty() || id_or_prefix.contains(|c| c == '%' || c == '_') {
            return Ok(None);
        }
        if let Some(session) = self.get_session(id_or_prefix)? {
            return Ok(Some(session.id));
        }

        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT id FROM sessions WHERE id LIKE ?1 LIMIT 2")
            .storage("Failed to prepare statement")?;
        let ids = stmt
            .query_map(params![format!("{}%", id_or_prefix)], |row| {
                row.get::<_, String>(0)
            })
            .storage("Failed to query session ids")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage("Failed to read session id")?;

        // Ambiguous prefixes resolve to nothing.
        Ok(match ids.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        })
    }

    fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>> {
        let condition = match filter {
            SessionFilter::All => "1 = 1",
            SessionFilter::Active => "is_archived = 0",
            SessionFilter::Archived => "is_archived = 1",
            SessionFilter::Pinned => "is_pinned = 1 AND is_archived = 0",
        };
        self.query_sessions(
            &format!(
                "SELECT {} FROM sessions WHERE {} ORDER BY updated_at DESC, rowid DESC",
                SESSION_COLUMNS, condition
            ),
            &[],
        )
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.query_sessions(
            &format!(
                "SELECT {} FROM sessions WHERE is_archived = 0 \
                 ORDER BY updated_at DESC, rowid DESC LIMIT ?1",
                SESSION_COLUMNS
            ),
            &[&(limit as i64)],
        )
    }

    fn search_sessions(&self, query: &str) -> Result<Vec<Session>> {
        self.query_sessions(
            &format!(
                "SELECT {} FROM sessions WHERE title LIKE '%' || ?1 || '%' \
                 ORDER BY updated_at DESC, rowid DESC",
                SESSION_COLUMNS
            ),
            &[&query],
        )
    }

    fn update_session_title(&self, id: &str, title: &str) -> Result<bool> {
        self.update_session_column(id, "UPDATE sessions SET title = ?1 WHERE id = ?2", &title)
    }

    fn set_session_pinned(&self, id: &str, pinned: bool) -> Result<bool> {
        self.update_session_column(id, "UPDATE sessions SET is_pinned = ?1 WHERE id = ?2", &pinned)
    }

    fn set_session_archived(&self, id: &str, archived: bool) -> Result<bool> {
        self.update_session_column(
            id,
            "UPDATE sessions SET is_archived = ?1 WHERE id = ?2",
            &archived,
        )
    }

    fn set_session_model(&self, id: &str, model_id: &str, model_name: &str) -> Result<bool> {
        let conn = self.open()?;
        let changed = conn
            .execute(
                "UPDATE sessions SET model_id = ?1, model_name = ?2 WHERE id = ?3",
                params![model_id, model_name, id],
            )
            .storage("Failed to update session model")?;
        if changed > 0 {
            self.publish(StoreEvent::SessionChanged {
                session_id: id.to_string(),
            });
        }
        Ok(changed > 0)
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![id])
            .storage("Failed to delete session messages")?;
        let removed = tx
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .storage("Failed to delete session")?;
        tx.commit().storage("Failed to commit transaction")?;

        if removed > 0 {
            self.publish(StoreEvent::SessionDeleted {
                session_id: id.to_string(),
            });
        }
        Ok(removed > 0)
    }

    fn delete_all_sessions(&self) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;
        tx.execute("DELETE FROM messages", [])
            .storage("Failed to delete messages")?;
        let removed = tx
            .execute("DELETE FROM sessions", [])
            .storage("Failed to delete sessions")?;
        tx.commit().storage("Failed to commit transaction")?;

        self.publish(StoreEvent::AllSessionsDeleted);
        Ok(removed)
    }

    fn insert_message(&self, message: &StoredMessage, bump_session: bool) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;
        tx.execute(
            &format!(
                "INSERT INTO messages ({}, touched_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                MESSAGE_COLUMNS
            ),
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content,
                message.tool_call_id,
                message.token_count as i64,
                timestamp(&message.created_at),
                message.is_streaming,
                message.is_complete,
                timestamp(&Utc::now()),
            ],
        )
        .storage("Failed to insert message")?;

        if bump_session {
            tx.execute(
                "UPDATE sessions SET message_count = message_count + 1, updated_at = ?1 WHERE id = ?2",
                params![timestamp(&Utc::now()), message.session_id],
            )
            .storage("Failed to update session counter")?;
        }
        tx.commit().storage("Failed to commit transaction")?;

        self.publish(StoreEvent::MessageChanged {
            session_id: message.session_id.clone(),
            message_id: message.id.clone(),
        });
        if bump_session {
            self.publish(StoreEvent::SessionChanged {
                session_id: message.session_id.clone(),
            });
        }
        Ok(())
    }

    fn get_message(&self, id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            params![id],
            message_from_row,
        )
        .optional()
        .storage("Failed to query message")
    }

    fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
                MESSAGE_COLUMNS
            ),
            &[&session_id],
        )
    }

    fn append_content(&self, message_id: &str, delta: &str) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;
        let session_id = match message_state(&tx, message_id)? {
            None => {
                return Err(ZenError::Storage(format!(
                    "Cannot append to missing message {}",
                    message_id
                )))
            }
            Some((_, true)) => {
                return Err(ZenError::Storage(format!(
                    "Cannot append to message {}: already complete",
                    message_id
                )))
            }
            Some((session_id, false)) => session_id,
        };
        tx.execute(
            "UPDATE messages SET content = content || ?1, touched_at = ?2 WHERE id = ?3",
            params![delta, timestamp(&Utc::now()), message_id],
        )
        .storage("Failed to append content")?;
        tx.commit().storage("Failed to commit transaction")?;

        self.publish(StoreEvent::ContentAppended {
            session_id,
            message_id: message_id.to_string(),
            delta: delta.to_string(),
        });
        Ok(())
    }

    fn finalize_message(
        &self,
        message_id: &str,
        content: Option<&str>,
        token_count: usize,
        bump_session: bool,
    ) -> Result<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;
        let Some((session_id, already_complete)) = message_state(&tx, message_id)? else {
            return Ok(false);
        };
        if already_complete && content.is_some() {
            return Err(ZenError::InvalidInput(format!(
                "Message {} is already complete",
                message_id
            )));
        }
        tx.execute(
            "UPDATE messages SET content = COALESCE(?1, content), is_complete = 1, \
             is_streaming = 0, token_count = ?2, touched_at = ?3 WHERE id = ?4",
            params![content, token_count as i64, timestamp(&Utc::now()), message_id],
        )
        .storage("Failed to finalize message")?;
        let bump = bump_session && !already_complete;
        if bump {
            tx.execute(
                "UPDATE sessions SET message_count = message_count + 1, updated_at = ?1 WHERE id = ?2",
                params![timestamp(&Utc::now()), session_id],
            )
            .storage("Failed to update session counter")?;
        }
        tx.commit().storage("Failed to commit transaction")?;

        self.publish(StoreEvent::MessageFinalized {
            session_id: session_id.clone(),
            message_id: message_id.to_string(),
        });
        if bump {
            self.publish(StoreEvent::SessionChanged { session_id });
        }
        Ok(true)
    }

    fn delete_message(&self, id: &str) -> Result<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;
        let Some((session_id, complete)) = message_state(&tx, id)? else {
            return Ok(false);
        };
        tx.execute("DELETE FROM messages WHERE id = ?1", params![id])
            .storage("Failed to delete message")?;
        // Incomplete messages were never counted.
        if complete {
            tx.execute(
                "UPDATE sessions SET message_count = MAX(message_count - 1, 0), updated_at = ?1 \
                 WHERE id = ?2",
                params![timestamp(&Utc::now()), session_id],
            )
            .storage("Failed to update session counter")?;
        }
        tx.commit().storage("Failed to commit transaction")?;

        self.publish(StoreEvent::MessageDeleted {
            session_id: session_id.clone(),
            message_id: id.to_string(),
        });
        self.publish(StoreEvent::SessionChanged { session_id });
        Ok(true)
    }

    fn count_messages(&self, session_id: &str) -> Result<usize> {
        let conn = self.open()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .storage("Failed to count messages")?;
        Ok(count.max(0) as usize)
    }

    fn total_tokens(&self, session_id: &str) -> Result<usize> {
        let conn = self.open()?;
        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(token_count), 0) FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .storage("Failed to sum tokens")?;
        Ok(total.max(0) as usize)
    }

    fn search_messages(&self, query: &str) -> Result<Vec<StoredMessage>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE content LIKE '%' || ?1 || '%' \
                 ORDER BY created_at DESC, rowid DESC",
                MESSAGE_COLUMNS
            ),
            &[&query],
        )
    }

    fn last_assistant_message(&self, session_id: &str) -> Result<Option<StoredMessage>> {
        let mut messages = self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE session_id = ?1 AND role = 'assistant' \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                MESSAGE_COLUMNS
            ),
            &[&session_id],
        )?;
        Ok(messages.pop())
    }

    fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT key, value, updated_at FROM settings WHERE key = ?1",
            params![key],
            |row| {
                let updated_at: String = row.get(2)?;
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: parse_timestamp(&updated_at),
                })
            },
        )
        .optional()
        .storage("Failed to query setting")
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, timestamp(&Utc::now())],
        )
        .storage("Failed to write setting")?;

        self.publish(StoreEvent::SettingChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> Result<bool> {
        let conn = self.open()?;
        let removed = conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .storage("Failed to delete setting")?;
        if removed > 0 {
            self.publish(StoreEvent::SettingChanged {
                key: key.to_string(),
            });
        }
        Ok(removed > 0)
    }

    fn recover_interrupted(&self, stale_after: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(stale_after).storage("Invalid recovery age")?;
        // An empty cutoff sorts before every timestamp, so nothing qualifies.
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .map(|t| timestamp(&t))
            .unwrap_or_default();

        let mut conn = self.open()?;
        let tx = conn.transaction().storage("Failed to start transaction")?;

        let stuck: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, session_id FROM messages \
                     WHERE (is_complete = 0 OR is_streaming = 1) \
                     AND COALESCE(touched_at, created_at) < ?1",
                )
                .storage("Failed to prepare statement")?;
            let rows = stmt
                .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))
                .storage("Failed to query interrupted messages")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .storage("Failed to read interrupted message")?
        };

        for (message_id, _) in &stuck {
            tx.execute(
                "UPDATE messages SET is_complete = 1, is_streaming = 0 WHERE id = ?1",
                params![message_id],
            )
            .storage("Failed to finalize interrupted message")?;
        }
        // Only complete messages are counted; live replies bump on finalize.
        tx.execute(
            "UPDATE sessions SET message_count = (SELECT COUNT(*) FROM messages \
             WHERE messages.session_id = sessions.id AND messages.is_complete = 1)",
            [],
        )
        .storage("Failed to recompute message counts")?;
        tx.commit().storage("Failed to commit transaction")?;

        for (message_id, session_id) in &stuck {
            self.publish(StoreEvent::MessageFinalized {
                session_id: session_id.clone(),
                message_id: message_id.clone(),
            });
        }
        Ok(stuck.len())
    }
}
