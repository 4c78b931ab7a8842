//! Command-line interface definition for zenchat
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chatting, session and model management,
//! and API key handling.

use clap::{Parser, Subcommand};

/// zenchat - terminal chat client for OpenCode Zen
///
/// Conversations are stored locally and replies stream in as they are
/// generated. Free models work without an API key.
#[derive(Parser, Debug, Clone)]
#[command(name = "zenchat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the conversation database path
    #[arg(long, env = "ZENCHAT_DB")]
    pub storage_path: Option<String>,

    /// Override the API base URL
    #[arg(long)]
    pub api_base: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat
    Chat {
        /// Session id or unique prefix to continue
        #[arg(short, long)]
        session: Option<String>,

        /// Wait for whole replies instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Send one message and print the reply
    Send {
        /// Session id or unique prefix
        #[arg(short, long)]
        session: String,

        /// Wait for the whole reply instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Message text
        text: String,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Browse models and choose a default
    Models {
        #[command(subcommand)]
        command: ModelCommand,
    },

    /// Manage the OpenCode Zen API key
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List sessions
    List {
        /// Only archived sessions
        #[arg(long, conflicts_with_all = ["pinned", "all"])]
        archived: bool,

        /// Only pinned sessions
        #[arg(long, conflicts_with = "all")]
        pinned: bool,

        /// Archived and active sessions
        #[arg(long)]
        all: bool,
    },

    /// Create a session
    New {
        /// Session title
        #[arg(short, long)]
        title: Option<String>,

        /// Model id; defaults to the configured default model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Print a session's messages
    Show {
        /// Session id or unique prefix
        id: String,
    },

    /// Delete a session and its messages
    Delete {
        /// Session id or unique prefix
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Delete every session
        #[arg(long)]
        all: bool,
    },

    /// Pin or unpin a session
    Pin {
        /// Session id or unique prefix
        id: String,

        /// Remove the pin
        #[arg(long)]
        off: bool,
    },

    /// Archive or unarchive a session
    Archive {
        /// Session id or unique prefix
        id: String,

        /// Restore from the archive
        #[arg(long)]
        off: bool,
    },

    /// Rename a session
    Rename {
        /// Session id or unique prefix
        id: String,

        /// New title
        title: String,
    },

    /// Search session titles and message text
    Search {
        /// Text to look for
        query: String,
    },
}

/// Model subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ModelCommand {
    /// List available models
    List {
        /// Ignore the cached listing
        #[arg(long)]
        refresh: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Only free models
        #[arg(long)]
        free: bool,
    },

    /// Show the default model
    Default,

    /// Set the default model
    SetDefault {
        /// Model id
        id: String,
    },

    /// Turn free mode on or off
    FreeMode {
        /// on or off
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

/// API key subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Store an API key in the system keyring
    Login {
        /// OpenCode Zen API key
        key: String,
    },

    /// Remove the stored API key
    Logout,

    /// Report whether an API key is available
    Status,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            storage_path: None,
            api_base: None,
            command: Commands::Auth {
                command: AuthCommand::Status,
            },
        }
    }
}
