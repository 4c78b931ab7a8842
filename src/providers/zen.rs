//! OpenCode Zen HTTP client
//!
//! Speaks the OpenAI-compatible `chat/completions` and `models` endpoints.
//! Requests carry a Bearer header only when a credential is available so the
//! free tier keeps working anonymously.

use crate::config::ProviderConfig;
use crate::error::{Result, ZenError};
use crate::providers::base::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, RemoteModel,
    StreamReceiver, TokenUsage,
};
use crate::providers::sse::forward_sse_stream;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponseBody {
    #[serde(default)]
    data: Vec<RemoteModel>,
}

/// Build an error from a non-success response, logging it
async fn error_from_response(response: Response) -> ZenError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!("OpenCode Zen returned error {}: {}", status, body);
    ZenError::from_status(status.as_u16(), &body)
}

/// Completion client for the OpenCode Zen API
#[derive(Debug, Clone)]
pub struct ZenClient {
    client: Client,
    api_base: String,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
    delta_capacity: usize,
}

impl ZenClient {
    /// Create a client from provider configuration
    ///
    /// `delta_capacity` bounds the channel between the SSE reader task and
    /// the consumer.
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::config::ProviderConfig;
    /// use zenchat::providers::ZenClient;
    ///
    /// let client = ZenClient::new(&ProviderConfig::default(), 64);
    /// assert!(client.is_ok());
    /// ```
    pub fn new(config: &ProviderConfig, delta_capacity: usize) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(concat!("zenchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ZenError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized OpenCode Zen client: api_base={}", config.api_base);

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.timeout_seconds),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_seconds),
            delta_capacity: delta_capacity.max(1),
        })
    }

    fn api_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl CompletionClient for ZenClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        token: Option<&str>,
    ) -> Result<CompletionResponse> {
        let body = ChatRequestBody {
            model: &request.model,
            messages: &request.messages,
            stream: false,
        };

        tracing::debug!(
            "Sending completion request: model={}, {} messages",
            request.model,
            request.messages.len()
        );

        let builder = self
            .client
            .post(self.api_endpoint("chat/completions"))
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .json(&body);
        let response = Self::authorize(builder, token).send().await.map_err(|e| {
            tracing::error!("Completion request failed: {}", e);
            ZenError::from(e)
        })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: ChatResponseBody = response.json().await?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| ZenError::ServerError {
            status: None,
            message: "completion response contained no choices".to_string(),
        })?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: parsed.usage,
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        token: Option<&str>,
    ) -> Result<StreamReceiver> {
        let body = ChatRequestBody {
            model: &request.model,
            messages: &request.messages,
            stream: true,
        };

        tracing::debug!(
            "Sending streaming request: model={}, {} messages",
            request.model,
            request.messages.len()
        );

        let builder = self
            .client
            .post(self.api_endpoint("chat/completions"))
            .header("Accept", "text/event-stream")
            .json(&body);
        let response = Self::authorize(builder, token).send().await.map_err(|e| {
            tracing::error!("Streaming request failed: {}", e);
            ZenError::from(e)
        })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let (events_tx, events_rx) = mpsc::channel(self.delta_capacity);
        let idle_timeout = self.stream_idle_timeout;
        tokio::spawn(forward_sse_stream(
            response.bytes_stream(),
            events_tx,
            idle_timeout,
        ));

        Ok(events_rx)
    }

    async fn list_models(&self, token: &str) -> Result<Vec<RemoteModel>> {
        let response = self
            .client
            .get(self.api_endpoint("models"))
            .header("Accept", "application/json")
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Model listing request failed: {}", e);
                ZenError::from(e)
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: ModelsResponseBody = response.json().await?;
        tracing::debug!("Model listing returned {} models", parsed.data.len());
        Ok(parsed.data)
    }
}
