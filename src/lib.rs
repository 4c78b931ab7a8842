//! zenchat - OpenCode Zen chat client library
//!
//! Keeps conversations in a local SQLite store and synchronizes them with
//! the OpenCode Zen completion API, streaming replies into the store as
//! they arrive.
//!
//! # Architecture
//!
//! - `storage`: SQLite conversation store and its change feed
//! - `providers`: completion client abstraction and the Zen HTTP client
//! - `catalog`: model listing, free models and the default model
//! - `sync`: the conversation synchronizer and the blocking worker pool
//! - `credentials`: API key lookup
//! - `app`: composition root wiring the above from `config`
//! - `cli` and `commands`: the command-line surface
//!
//! # Example
//!
//! ```no_run
//! use zenchat::{App, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let app = App::from_config(config).await?;
//!     let session = app.sync.create_session("Scratch", None).await?;
//!     let reply = app.sync.send_message(&session.id, "Hello!", true).await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod providers;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use app::App;
pub use catalog::{ModelCatalog, ModelDescriptor};
pub use config::Config;
pub use error::{ErrorKind, Result, ZenError};
pub use storage::{ConversationStore, SqliteStorage, StoreEvent};
pub use sync::{SendOutcome, Synchronizer};

#[cfg(test)]
pub mod test_utils;
