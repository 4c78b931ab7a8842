//! Remote completion providers
//!
//! [`CompletionClient`] is the seam; [`ZenClient`] talks to OpenCode Zen and
//! [`scripted::ScriptedClient`] replays a fixed script in tests.

pub mod base;
pub mod scripted;
mod sse;
pub mod zen;

pub use base::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, RemoteCapabilities,
    RemoteModel, RemotePricing, StreamEvent, StreamReceiver, TokenUsage,
};
pub use zen::ZenClient;
