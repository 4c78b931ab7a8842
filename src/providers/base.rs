//! Completion client abstraction and wire types
//!
//! This module defines the [`CompletionClient`] trait the synchronizer and
//! the model catalog call into, together with the OpenAI-compatible request,
//! response and model-listing shapes spoken by OpenCode Zen.

use crate::error::Result;
use crate::storage::{Role, StoredMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Message as sent to the completion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: String,
    /// Content of the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Optional tool call ID (for tool result messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: Some(content.into()),
            tool_call_id: None,
        }
    }

    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::providers::ChatMessage;
    ///
    /// let msg = ChatMessage::user("Hello, assistant!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }
}

impl From<&StoredMessage> for ChatMessage {
    fn from(stored: &StoredMessage) -> Self {
        Self {
            role: stored.role.as_str().to_string(),
            content: Some(stored.content.clone()),
            tool_call_id: stored.tool_call_id.clone(),
        }
    }
}

/// Token usage information from a completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: usize,
    /// Number of tokens in the completion
    #[serde(default)]
    pub completion_tokens: usize,
    /// Total tokens used (prompt + completion)
    #[serde(default)]
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Tokens to attribute to a finalized message
    ///
    /// Uses `total_tokens` when the server reported it, else the sum.
    pub fn attributed(&self) -> usize {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

/// A completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model id to complete with
    pub model: String,
    /// Ordered conversation history, oldest first
    pub messages: Vec<ChatMessage>,
}

/// Full response from a non-streaming completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Assistant message text
    pub content: String,
    /// Token usage when reported
    pub usage: Option<TokenUsage>,
    /// Why generation stopped
    pub finish_reason: Option<String>,
}

/// One item of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next content fragment, in order
    Delta(String),
    /// Terminal signal; nothing follows
    Finished {
        /// Reported finish reason
        finish_reason: Option<String>,
        /// Usage metadata, when the server sent any
        usage: Option<TokenUsage>,
    },
}

/// Receiving end of a streamed completion
///
/// Yields deltas in order, then either `Ok(StreamEvent::Finished)` or a
/// single `Err`. A closed channel without either means the producer died.
pub type StreamReceiver = mpsc::Receiver<Result<StreamEvent>>;

/// Capability flags reported by the model listing
///
/// A listing that omits `stream` is taken to stream, the same as a model
/// that is not listed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCapabilities {
    /// Supports SSE streaming
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Supports tool calls
    #[serde(default)]
    pub tools: bool,
    /// Accepts image input
    #[serde(default)]
    pub vision: bool,
}

fn default_stream() -> bool {
    true
}

impl Default for RemoteCapabilities {
    fn default() -> Self {
        Self {
            stream: default_stream(),
            tools: false,
            vision: false,
        }
    }
}

/// Raw pricing strings, e.g. `"$0.50"` per million tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePricing {
    /// Prompt price
    #[serde(default)]
    pub prompt_tokens: Option<String>,
    /// Completion price
    #[serde(default)]
    pub completion_tokens: Option<String>,
}

/// A model as returned by `GET /models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteModel {
    /// Model id
    pub id: String,
    /// Owning organisation as reported by the server
    #[serde(default)]
    pub owned_by: Option<String>,
    /// Capability flags
    #[serde(default)]
    pub capabilities: Option<RemoteCapabilities>,
    /// Pricing strings
    #[serde(default)]
    pub pricing: Option<RemotePricing>,
}

/// Remote completion service
///
/// `token` is sent as a Bearer credential when present.
///
/// # Examples
///
/// ```no_run
/// use zenchat::error::Result;
/// use zenchat::providers::{
///     CompletionClient, CompletionRequest, CompletionResponse, RemoteModel, StreamReceiver,
/// };
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl CompletionClient for Echo {
///     async fn complete(
///         &self,
///         request: &CompletionRequest,
///         _token: Option<&str>,
///     ) -> Result<CompletionResponse> {
///         let last = request.messages.last().and_then(|m| m.content.clone());
///         Ok(CompletionResponse {
///             content: last.unwrap_or_default(),
///             usage: None,
///             finish_reason: Some("stop".into()),
///         })
///     }
///
///     async fn complete_stream(
///         &self,
///         _request: &CompletionRequest,
///         _token: Option<&str>,
///     ) -> Result<StreamReceiver> {
///         unimplemented!()
///     }
///
///     async fn list_models(&self, _token: &str) -> Result<Vec<RemoteModel>> {
///         Ok(Vec::new())
///     }
/// }
/// ```
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send the conversation and wait for the whole response
    async fn complete(
        &self,
        request: &CompletionRequest,
        token: Option<&str>,
    ) -> Result<CompletionResponse>;

    /// Send the conversation and receive the response incrementally
    ///
    /// Errors returned directly happen before any delta was produced
    /// (connect failure, non-success status).
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        token: Option<&str>,
    ) -> Result<StreamReceiver>;

    /// List the models the credential can use
    async fn list_models(&self, token: &str) -> Result<Vec<RemoteModel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_chat_message_from_stored_tool_result() {
        let stored = StoredMessage::tool_result("s1", "call_9", "42");
        let msg = ChatMessage::from(&stored);
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(msg.content.as_deref(), Some("42"));
    }

    #[test]
    fn test_token_usage_attributed_prefers_total() {
        assert_eq!(TokenUsage::new(3, 4).attributed(), 7);
        let partial = TokenUsage {
            prompt_tokens: 2,
            completion_tokens: 5,
            total_tokens: 0,
        };
        assert_eq!(partial.attributed(), 7);
    }

    #[test]
    fn test_remote_model_tolerates_missing_fields() {
        let model: RemoteModel = serde_json::from_str(r#"{"id": "gpt-5"}"#).unwrap();
        assert_eq!(model.id, "gpt-5");
        assert!(model.capabilities.is_none());
        assert!(model.pricing.is_none());
    }

    #[test]
    fn test_remote_model_parses_capabilities_and_pricing() {
        let model: RemoteModel = serde_json::from_str(
            r#"{"id": "claude-sonnet-4", "owned_by": "anthropic",
                "capabilities": {"stream": true, "tools": true},
                "pricing": {"prompt_tokens": "$3.00", "completion_tokens": "$15.00"}}"#,
        )
        .unwrap();
        let caps = model.capabilities.unwrap();
        assert!(caps.stream);
        assert!(caps.tools);
        assert!(!caps.vision);
        assert_eq!(
            model.pricing.unwrap().prompt_tokens.as_deref(),
            Some("$3.00")
        );
    }

    #[test]
    fn test_capabilities_without_stream_flag_default_to_streaming() {
        let caps: RemoteCapabilities = serde_json::from_str(r#"{"tools": true}"#).unwrap();
        assert!(caps.stream);
        let caps: RemoteCapabilities = serde_json::from_str(r#"{"stream": false}"#).unwrap();
        assert!(!caps.stream);
    }
}
