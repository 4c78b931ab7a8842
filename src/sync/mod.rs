//! Conversation synchronizer
//!
//! Turns a submitted user message into a persisted conversation turn:
//! the user message is stored, the history is sent to the completion
//! service, and the assistant reply is written back either incrementally
//! (streaming) or in one write. At most one send runs per session; a second
//! concurrent send is rejected with `Busy`. Every assistant placeholder is
//! finalized, whatever happens to the remote call.

pub mod pool;

pub use pool::WorkerPool;

use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::credentials::CredentialProvider;
use crate::error::{Result, ZenError};
use crate::providers::{ChatMessage, CompletionClient, CompletionRequest, StreamEvent};
use crate::storage::{
    ConversationStore, Session, SessionFilter, StoreEvent, StoredMessage,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Title given to sessions created without one
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// What a completed send produced
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// Stored user message
    pub user_message_id: String,
    /// Stored assistant message
    pub assistant_message_id: String,
    /// Model the reply came from
    pub model_id: String,
    /// Final assistant content
    pub content: String,
    /// Tokens attributed to the reply
    pub token_count: usize,
    /// Reply was consumed incrementally
    pub streamed: bool,
}

/// Progress of a session delete that interrupted a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deletion {
    NotRequested,
    Pending,
    Done,
    Failed,
}

#[derive(Clone)]
struct InFlight {
    token: CancellationToken,
    deletion: Arc<watch::Sender<Deletion>>,
}

impl InFlight {
    /// Wait out a delete racing this send; true once the session is gone
    async fn session_deleted(&self) -> bool {
        let mut state = self.deletion.subscribe();
        let settled = state.wait_for(|d| *d != Deletion::Pending).await;
        matches!(settled.as_deref(), Ok(Deletion::Done))
    }
}

/// Sends interrupted by a running delete
///
/// Marks still pending when this is dropped are resolved as failed, so an
/// abandoned delete never leaves a send waiting.
struct PendingDeletes(Vec<Arc<watch::Sender<Deletion>>>);

impl PendingDeletes {
    fn resolve(self, deleted: bool) {
        let outcome = if deleted {
            Deletion::Done
        } else {
            Deletion::Failed
        };
        for deletion in &self.0 {
            deletion.send_replace(outcome);
        }
    }
}

impl Drop for PendingDeletes {
    fn drop(&mut self) {
        for deletion in &self.0 {
            deletion.send_if_modified(|state| {
                let pending = *state == Deletion::Pending;
                if pending {
                    *state = Deletion::Failed;
                }
                pending
            });
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock_registry(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, InFlight>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the session's in-flight entry on every exit path
struct InFlightGuard {
    registry: Registry,
    session_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_registry(&self.registry).remove(&self.session_id);
        tracing::debug!("Released in-flight marker for session {}", self.session_id);
    }
}

/// How a remote exchange ended
enum Exchange {
    Completed {
        content: String,
        token_count: usize,
    },
    Failed {
        partial: String,
        error: ZenError,
    },
    Cancelled {
        partial: String,
    },
}

/// Orchestrates sends and session management over the store
pub struct Synchronizer {
    store: Arc<dyn ConversationStore>,
    client: Arc<dyn CompletionClient>,
    credentials: Arc<dyn CredentialProvider>,
    catalog: Arc<ModelCatalog>,
    pool: WorkerPool,
    system_prompt: Option<String>,
    in_flight: Registry,
}

impl Synchronizer {
    /// Wire a synchronizer from its collaborators
    pub fn new(
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        credentials: Arc<dyn CredentialProvider>,
        catalog: Arc<ModelCatalog>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            store,
            client,
            credentials,
            catalog,
            pool,
            system_prompt: None,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Prepend a system prompt to every request; it is not stored
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// Run a blocking store call on the worker pool
    async fn with_store<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&dyn ConversationStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        self.pool.run(move || job(store.as_ref())).await
    }

    fn register(&self, session_id: &str) -> Result<(InFlight, InFlightGuard)> {
        let mut registry = lock_registry(&self.in_flight);
        if registry.contains_key(session_id) {
            return Err(ZenError::Busy(session_id.to_string()));
        }
        let (deletion, _) = watch::channel(Deletion::NotRequested);
        let entry = InFlight {
            token: CancellationToken::new(),
            deletion: Arc::new(deletion),
        };
        registry.insert(session_id.to_string(), entry.clone());
        Ok((
            entry,
            InFlightGuard {
                registry: self.in_flight.clone(),
                session_id: session_id.to_string(),
            },
        ))
    }

    /// Cancel the sends a delete is about to remove; `None` means all
    fn interrupt_for_delete(&self, session_id: Option<&str>) -> PendingDeletes {
        let registry = lock_registry(&self.in_flight);
        let flights: Vec<&InFlight> = match session_id {
            Some(id) => registry.get(id).into_iter().collect(),
            None => registry.values().collect(),
        };
        PendingDeletes(
            flights
                .into_iter()
                .map(|flight| {
                    flight.deletion.send_replace(Deletion::Pending);
                    flight.token.cancel();
                    flight.deletion.clone()
                })
                .collect(),
        )
    }

    /// Send a user message and store the assistant reply
    ///
    /// Streaming is used when `streaming_preferred` is set and the model
    /// supports it. Blank text or an unknown session is rejected before any
    /// write; a send already running for the session yields `Busy`.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        streaming_preferred: bool,
    ) -> Result<SendOutcome> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ZenError::InvalidInput("message text is empty".into()));
        }

        let sid = session_id.to_string();
        let session = self
            .with_store(move |s| s.get_session(&sid))
            .await?
            .ok_or_else(|| ZenError::InvalidInput(format!("unknown session: {}", session_id)))?;

        let (flight, _guard) = self.register(session_id)?;
        tracing::info!("Sending message in session {}", session_id);

        let user_message = StoredMessage::user(session_id, text);
        let user_message_id = user_message.id.clone();
        self.with_store(move |s| s.insert_message(&user_message, true))
            .await?;

        let sid = session_id.to_string();
        let history = self.with_store(move |s| s.list_messages(&sid)).await?;
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(history.iter().filter(|m| m.is_complete).map(ChatMessage::from));

        let model = self.resolve_model(&session).await?;
        let token = self.credentials.token();
        if token.is_none() && !model.is_free {
            tracing::warn!("Model {} needs an API key and none is configured", model.id);
            return Err(ZenError::AuthRequired(format!(
                "model {} requires an API key",
                model.id
            )));
        }

        if flight.token.is_cancelled() {
            return Err(ZenError::Cancelled(format!(
                "send to session {} was cancelled",
                session_id
            )));
        }

        let placeholder = StoredMessage::assistant_placeholder(session_id);
        let assistant_message_id = placeholder.id.clone();
        let inserted = self
            .with_store(move |s| s.insert_message(&placeholder, false))
            .await;
        if let Err(e) = inserted {
            if flight.token.is_cancelled() {
                return Err(ZenError::Cancelled(format!(
                    "session {} was deleted",
                    session_id
                )));
            }
            return Err(e);
        }

        let request = CompletionRequest {
            model: model.id.clone(),
            messages,
        };
        let streamed = streaming_preferred && model.capabilities.streaming;
        if streaming_preferred && !streamed {
            tracing::debug!("Model {} does not stream; using a single response", model.id);
        }

        let exchange = if streamed {
            self.stream_reply(&request, token.as_deref(), &assistant_message_id, &flight)
                .await
        } else {
            self.unary_reply(&request, token.as_deref(), &flight).await
        };

        let final_write = |content: Option<String>, token_count: usize| {
            let message_id = assistant_message_id.clone();
            self.with_store(move |s| {
                s.finalize_message(&message_id, content.as_deref(), token_count, true)
            })
        };

        match exchange {
            Exchange::Completed {
                content,
                token_count,
            } => {
                let body = (!streamed).then(|| content.clone());
                let exists = final_write(body, token_count).await?;
                if !exists {
                    return Err(ZenError::Cancelled(format!(
                        "session {} was deleted",
                        session_id
                    )));
                }
                tracing::info!(
                    "Completed reply in session {} ({} tokens)",
                    session_id,
                    token_count
                );
                Ok(SendOutcome {
                    user_message_id,
                    assistant_message_id,
                    model_id: model.id,
                    content,
                    token_count,
                    streamed,
                })
            }
            Exchange::Failed { partial, error } => {
                tracing::error!(
                    "Reply in session {} failed after {} bytes: {}",
                    session_id,
                    partial.len(),
                    error
                );
                let body = (!streamed).then_some(partial);
                if let Err(e) = final_write(body, 0).await {
                    tracing::error!("Failed to finalize interrupted reply: {}", e);
                }
                Err(error)
            }
            Exchange::Cancelled { partial } => {
                if flight.session_deleted().await {
                    tracing::info!("Session {} deleted during send", session_id);
                    return Err(ZenError::Cancelled(format!(
                        "session {} was deleted",
                        session_id
                    )));
                }
                // A delete that failed leaves the reply to finalize here.
                let body = (!streamed).then_some(partial);
                match final_write(body, 0).await {
                    Ok(false) => {
                        return Err(ZenError::Cancelled(format!(
                            "session {} was deleted",
                            session_id
                        )))
                    }
                    Ok(true) => {}
                    Err(e) => tracing::error!("Failed to finalize cancelled reply: {}", e),
                }
                tracing::info!("Send in session {} cancelled", session_id);
                Err(ZenError::Cancelled(format!(
                    "send to session {} was cancelled",
                    session_id
                )))
            }
        }
    }

    async fn resolve_model(&self, session: &Session) -> Result<ModelDescriptor> {
        let model_id = if session.model_id.trim().is_empty() {
            self.catalog
                .get_default_model()
                .await?
                .ok_or_else(|| ZenError::InvalidInput("no model selected".into()))?
        } else {
            session.model_id.clone()
        };
        Ok(self.catalog.describe(&model_id).await)
    }

    async fn unary_reply(
        &self,
        request: &CompletionRequest,
        token: Option<&str>,
        flight: &InFlight,
    ) -> Exchange {
        let result = tokio::select! {
            biased;
            _ = flight.token.cancelled() => {
                return Exchange::Cancelled { partial: String::new() };
            }
            result = self.client.complete(request, token) => result,
        };
        match result {
            Ok(response) => Exchange::Completed {
                content: response.content,
                token_count: response.usage.map(|u| u.attributed()).unwrap_or(0),
            },
            Err(error) => Exchange::Failed {
                partial: String::new(),
                error,
            },
        }
    }

    async fn stream_reply(
        &self,
        request: &CompletionRequest,
        token: Option<&str>,
        message_id: &str,
        flight: &InFlight,
    ) -> Exchange {
        let mut partial = String::new();

        let opened = tokio::select! {
            biased;
            _ = flight.token.cancelled() => return Exchange::Cancelled { partial },
            opened = self.client.complete_stream(request, token) => opened,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(error) => return Exchange::Failed { partial, error },
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = flight.token.cancelled() => return Exchange::Cancelled { partial },
                next = events.recv() => next,
            };

            match next {
                Some(Ok(StreamEvent::Delta(delta))) => {
                    let id = message_id.to_string();
                    let chunk = delta.clone();
                    if let Err(error) = self
                        .with_store(move |s| s.append_content(&id, &chunk))
                        .await
                    {
                        if flight.token.is_cancelled() {
                            return Exchange::Cancelled { partial };
                        }
                        return Exchange::Failed { partial, error };
                    }
                    partial.push_str(&delta);
                }
                Some(Ok(StreamEvent::Finished { usage, .. })) => {
                    return Exchange::Completed {
                        content: partial,
                        token_count: usage.map(|u| u.attributed()).unwrap_or(0),
                    };
                }
                Some(Err(error)) => return Exchange::Failed { partial, error },
                None => {
                    return Exchange::Failed {
                        partial,
                        error: ZenError::NetworkFailure(
                            "stream ended without a finish signal".into(),
                        ),
                    }
                }
            }
        }
    }

    /// Cancel the send running for a session; false when none is running
    pub fn cancel(&self, session_id: &str) -> bool {
        match lock_registry(&self.in_flight).get(session_id) {
            Some(flight) => {
                tracing::info!("Cancelling send in session {}", session_id);
                flight.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a send is running for the session
    pub fn is_in_flight(&self, session_id: &str) -> bool {
        lock_registry(&self.in_flight).contains_key(session_id)
    }

    /// Subscribe to store change events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Create a session for `model_id`, or the default model
    pub async fn create_session(&self, title: &str, model_id: Option<&str>) -> Result<Session> {
        let model_id = match model_id.map(str::trim).filter(|m| !m.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .catalog
                .get_default_model()
                .await?
                .ok_or_else(|| ZenError::InvalidInput("no model selected".into()))?,
        };
        let model = self.catalog.describe(&model_id).await;
        let title = match title.trim() {
            "" => DEFAULT_SESSION_TITLE,
            t => t,
        };

        let session = Session::new(title, model.id, model.display_name);
        let stored = session.clone();
        self.with_store(move |s| s.insert_session(&stored)).await?;
        tracing::info!("Created session {} ({})", session.id, session.model_id);
        Ok(session)
    }

    /// Delete a session, cancelling any send in progress first
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let interrupted = self.interrupt_for_delete(Some(session_id));
        let sid = session_id.to_string();
        let result = self.with_store(move |s| s.delete_session(&sid)).await;
        interrupted.resolve(result.is_ok());
        let removed = result?;
        if removed {
            tracing::info!("Deleted session {}", session_id);
        }
        Ok(removed)
    }

    /// Delete every session, cancelling all sends
    pub async fn delete_all_sessions(&self) -> Result<usize> {
        let interrupted = self.interrupt_for_delete(None);
        let result = self.with_store(|s| s.delete_all_sessions()).await;
        interrupted.resolve(result.is_ok());
        let removed = result?;
        tracing::info!("Deleted {} sessions", removed);
        Ok(removed)
    }

    /// Rename a session
    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<bool> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ZenError::InvalidInput("title is empty".into()));
        }
        let sid = session_id.to_string();
        self.with_store(move |s| s.update_session_title(&sid, &title))
            .await
    }

    /// Pin or unpin a session
    pub async fn pin_session(&self, session_id: &str, pinned: bool) -> Result<bool> {
        let sid = session_id.to_string();
        self.with_store(move |s| s.set_session_pinned(&sid, pinned))
            .await
    }

    /// Archive or unarchive a session
    pub async fn archive_session(&self, session_id: &str, archived: bool) -> Result<bool> {
        let sid = session_id.to_string();
        self.with_store(move |s| s.set_session_archived(&sid, archived))
            .await
    }

    /// Point a session at another model
    pub async fn set_session_model(&self, session_id: &str, model_id: &str) -> Result<bool> {
        let model = self.catalog.describe(model_id.trim()).await;
        let sid = session_id.to_string();
        self.with_store(move |s| s.set_session_model(&sid, &model.id, &model.display_name))
            .await
    }

    /// Fetch one session
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let sid = session_id.to_string();
        self.with_store(move |s| s.get_session(&sid)).await
    }

    /// Resolve a full id or unique prefix
    pub async fn resolve_session_id(&self, id_or_prefix: &str) -> Result<Option<String>> {
        let needle = id_or_prefix.to_string();
        self.with_store(move |s| s.resolve_session_id(&needle))
            .await
    }

    /// List sessions
    pub async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>> {
        self.with_store(move |s| s.list_sessions(filter)).await
    }

    /// Most recent active sessions
    pub async fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.with_store(move |s| s.recent_sessions(limit)).await
    }

    /// Sessions whose title contains `query`
    pub async fn search_sessions(&self, query: &str) -> Result<Vec<Session>> {
        let query = query.to_string();
        self.with_store(move |s| s.search_sessions(&query)).await
    }

    /// Messages of a session, oldest first
    pub async fn messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let sid = session_id.to_string();
        self.with_store(move |s| s.list_messages(&sid)).await
    }

    /// Delete a single message; a message still receiving content is refused
    pub async fn delete_message(&self, message_id: &str) -> Result<bool> {
        let mid = message_id.to_string();
        let message = self.with_store(move |s| s.get_message(&mid)).await?;
        match message {
            None => Ok(false),
            Some(m) if m.is_streaming => Err(ZenError::Busy(m.session_id)),
            Some(m) => self.with_store(move |s| s.delete_message(&m.id)).await,
        }
    }

    /// Messages containing `query`, newest first
    pub async fn search_messages(&self, query: &str) -> Result<Vec<StoredMessage>> {
        let query = query.to_string();
        self.with_store(move |s| s.search_messages(&query)).await
    }

    /// Sum of token counts in a session
    pub async fn total_tokens(&self, session_id: &str) -> Result<usize> {
        let sid = session_id.to_string();
        self.with_store(move |s| s.total_tokens(&sid)).await
    }

    /// Newest assistant message in a session, complete or still streaming
    pub async fn last_reply(&self, session_id: &str) -> Result<Option<StoredMessage>> {
        let sid = session_id.to_string();
        self.with_store(move |s| s.last_assistant_message(&sid)).await
    }
}
