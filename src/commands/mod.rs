/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `chat`: Interactive chat and one-shot sends
- `sessions`: Session listing and maintenance
- `models`: Model listing and default selection
- `auth`: API key management
- `special_commands`: Slash commands inside the chat

Handlers build an [`App`] from configuration and return `anyhow::Result`
so failures carry context up to `main`.
*/

use crate::app::App;
use anyhow::{anyhow, Context, Result};

pub mod auth;
pub mod chat;
pub mod models;
pub mod sessions;
pub mod special_commands;

/// Resolve a full session id or unique prefix, failing with a readable error
pub(crate) async fn resolve_session(app: &App, id_or_prefix: &str) -> Result<String> {
    app.sync
        .resolve_session_id(id_or_prefix)
        .await
        .context("Failed to look up session")?
        .ok_or_else(|| anyhow!("No unique session matches '{}'", id_or_prefix))
}

/// First eight characters of an id, for tables
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Shorten `text` to `max` characters, marking the cut with "..."
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long session title", 10), "a long ...");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
