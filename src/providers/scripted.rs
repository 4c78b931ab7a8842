//! Scripted completion client for tests
//!
//! [`ScriptedClient`] replays a fixed list of [`Step`]s instead of talking to
//! the network, so ordering, failure and cancellation paths can be driven
//! deterministically. Integration tests wire it in place of
//! [`crate::providers::ZenClient`].

use crate::error::{Result, ZenError};
use crate::providers::{
    CompletionClient, CompletionRequest, CompletionResponse, RemoteModel, StreamEvent,
    StreamReceiver, TokenUsage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One step of a scripted stream
#[derive(Debug)]
pub enum Step {
    /// Emit a content delta
    Delta(String),
    /// Emit the terminal signal
    Finish(Option<TokenUsage>),
    /// Emit a mid-stream error
    Fail(ZenError),
    /// Wait before the next step
    Pause(Duration),
    /// Produce nothing until the receiver goes away
    Hang,
}

/// In-process completion client that replays a script
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    reply: Mutex<Option<Result<CompletionResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    stream_calls: AtomicUsize,
    unary_calls: AtomicUsize,
    models: Vec<RemoteModel>,
}

impl ScriptedClient {
    /// Client whose streaming calls replay `steps`
    pub fn streaming(steps: Vec<Step>) -> Self {
        Self::default().then_stream(steps)
    }

    /// Queue `steps` for the next streaming call after those already queued
    pub fn then_stream(self, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(steps);
        self
    }

    /// Report `models` from the model listing
    pub fn with_models(mut self, models: Vec<RemoteModel>) -> Self {
        self.models = models;
        self
    }

    /// Client whose non-streaming calls return `content`
    pub fn replying(content: &str, usage: Option<TokenUsage>) -> Self {
        Self {
            reply: Mutex::new(Some(Ok(CompletionResponse {
                content: content.to_string(),
                usage,
                finish_reason: Some("stop".to_string()),
            }))),
            ..Self::default()
        }
    }

    /// Client whose non-streaming calls fail with `error`
    pub fn failing(error: ZenError) -> Self {
        Self {
            reply: Mutex::new(Some(Err(error))),
            ..Self::default()
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of streaming calls
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of non-streaming calls
    pub fn unary_calls(&self) -> usize {
        self.unary_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        _token: Option<&str>,
    ) -> Result<CompletionResponse> {
        self.unary_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        self.reply.lock().unwrap_or_else(|e| e.into_inner()).take().unwrap_or_else(|| {
            Ok(CompletionResponse {
                content: "ok".to_string(),
                usage: None,
                finish_reason: Some("stop".to_string()),
            })
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        _token: Option<&str>,
    ) -> Result<StreamReceiver> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        let steps = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Delta(text) => {
                        if tx.send(Ok(StreamEvent::Delta(text))).await.is_err() {
                            return;
                        }
                    }
                    Step::Finish(usage) => {
                        let _ = tx
                            .send(Ok(StreamEvent::Finished {
                                finish_reason: Some("stop".to_string()),
                                usage,
                            }))
                            .await;
                        return;
                    }
                    Step::Fail(error) => {
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                    Step::Pause(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => {
                        tx.closed().await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn list_models(&self, _token: &str) -> Result<Vec<RemoteModel>> {
        Ok(self.models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_stream_replays_steps() {
        let client = ScriptedClient::streaming(vec![Step::Delta("a".into()), Step::Finish(None)]);
        let mut rx = client.complete_stream(&request(), None).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap().unwrap(),
            StreamEvent::Delta("a".into())
        );
        assert!(matches!(
            rx.recv().await.unwrap().unwrap(),
            StreamEvent::Finished { .. }
        ));
        assert!(rx.recv().await.is_none());
        assert_eq!(client.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_scripts_are_replayed_per_call() {
        let client = ScriptedClient::streaming(vec![Step::Hang])
            .then_stream(vec![Step::Delta("b".into()), Step::Finish(None)]);
        drop(client.complete_stream(&request(), None).await.unwrap());

        let mut rx = client.complete_stream(&request(), None).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap().unwrap(),
            StreamEvent::Delta("b".into())
        );

        let mut spent = client.complete_stream(&request(), None).await.unwrap();
        assert!(spent.recv().await.is_none());
        assert_eq!(client.stream_calls(), 3);
    }

    #[tokio::test]
    async fn test_reply_is_used_once() {
        let client = ScriptedClient::failing(ZenError::RateLimited("slow down".into()));
        assert!(client.complete(&request(), None).await.is_err());
        let second = client.complete(&request(), None).await.unwrap();
        assert_eq!(second.content, "ok");
        assert_eq!(client.unary_calls(), 2);
        assert_eq!(client.requests().len(), 2);
    }
}
