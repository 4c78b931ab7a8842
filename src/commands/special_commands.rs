//! Slash commands for the interactive chat
//!
//! Input starting with `/` is handled locally instead of being sent as a
//! message. Commands are case-insensitive; arguments keep their case.

use colored::Colorize;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Commands handled by the chat loop itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Show the active session, model and token total
    ShowStatus,

    /// Print the command list
    Help,

    /// List models from the catalog
    ListModels,

    /// Point the current session at another model
    SwitchModel(String),

    /// Rename the current session
    Rename(String),

    /// Start a fresh session
    NewSession,

    /// Reprint the current session's messages
    History,

    /// Leave the chat
    Exit,

    /// Not a special command
    None,
}

/// Parse one line of chat input
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` for an unrecognized `/word`, and
/// `CommandError::MissingArgument` when `/model` or `/rename` lack one.
///
/// # Examples
///
/// ```
/// use zenchat::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/exit").unwrap(), SpecialCommand::Exit);
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();

    if matches!(trimmed.to_lowercase().as_str(), "exit" | "quit") {
        return Ok(SpecialCommand::Exit);
    }

    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(SpecialCommand::None);
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name.to_lowercase().as_str() {
        "help" | "h" | "?" => Ok(SpecialCommand::Help),
        "exit" | "quit" | "q" => Ok(SpecialCommand::Exit),
        "status" => Ok(SpecialCommand::ShowStatus),
        "new" => Ok(SpecialCommand::NewSession),
        "history" => Ok(SpecialCommand::History),
        "models" => Ok(SpecialCommand::ListModels),
        "model" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/model".to_string(),
            usage: "/model <model-id>".to_string(),
        }),
        "model" => Ok(SpecialCommand::SwitchModel(arg.to_string())),
        "rename" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/rename".to_string(),
            usage: "/rename <title>".to_string(),
        }),
        "rename" => Ok(SpecialCommand::Rename(arg.to_string())),
        _ => Err(CommandError::UnknownCommand(format!("/{}", name))),
    }
}

/// Print the slash command reference
pub fn print_help() {
    println!("\n{}", "Chat commands".bold());
    println!("  {:<18} Show session, model and token usage", "/status".cyan());
    println!("  {:<18} List available models", "/models".cyan());
    println!("  {:<18} Switch this session's model", "/model <id>".cyan());
    println!("  {:<18} Rename this session", "/rename <title>".cyan());
    println!("  {:<18} Start a new session", "/new".cyan());
    println!("  {:<18} Reprint this session", "/history".cyan());
    println!("  {:<18} Show this help", "/help".cyan());
    println!("  {:<18} Leave the chat", "/exit".cyan());
    println!("\nCtrl-C while a reply is streaming cancels it.\n");
}
