use crate::app::App;
use crate::cli::SessionCommand;
use crate::commands::chat::print_transcript;
use crate::commands::{resolve_session, short_id, truncate};
use crate::storage::{Session, SessionFilter};
use anyhow::{anyhow, Result};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle `zenchat sessions ...`
pub async fn handle_sessions(app: App, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::List {
            archived,
            pinned,
            all,
        } => {
            let filter = session_filter(archived, pinned, all);
            let sessions = app.sync.list_sessions(filter).await?;
            if sessions.is_empty() {
                println!("{}", "No sessions found.".yellow());
                return Ok(());
            }
            print_sessions_table(&sessions);
            println!(
                "Use {} to continue a session.\n",
                "zenchat chat --session <ID>".cyan()
            );
        }
        SessionCommand::New { title, model } => {
            let session = app
                .sync
                .create_session(title.as_deref().unwrap_or(""), model.as_deref())
                .await?;
            println!(
                "{}",
                format!("Created session {} ({})", session.id, session.model_name).green()
            );
        }
        SessionCommand::Show { id } => {
            let id = resolve_session(&app, &id).await?;
            let session = app
                .sync
                .get_session(&id)
                .await?
                .ok_or_else(|| anyhow!("Session {} no longer exists", id))?;
            println!("\n{} ({})", session.title.bold(), session.id.dimmed());
            println!(
                "Model: {} | Messages: {} | Tokens: {}\n",
                session.model_name,
                session.message_count,
                app.sync.total_tokens(&id).await?
            );
            print_transcript(&app.sync.messages(&id).await?);
        }
        SessionCommand::Delete { id, all } => {
            if all {
                let removed = app.sync.delete_all_sessions().await?;
                println!("{}", format!("Deleted {} sessions", removed).green());
            } else if let Some(id) = id {
                let id = resolve_session(&app, &id).await?;
                if app.sync.delete_session(&id).await? {
                    println!("{}", format!("Deleted session {}", id).green());
                }
            }
        }
        SessionCommand::Pin { id, off } => {
            let id = resolve_session(&app, &id).await?;
            app.sync.pin_session(&id, !off).await?;
            println!("{} {}", if off { "Unpinned" } else { "Pinned" }, short_id(&id));
        }
        SessionCommand::Archive { id, off } => {
            let id = resolve_session(&app, &id).await?;
            app.sync.archive_session(&id, !off).await?;
            println!(
                "{} {}",
                if off { "Restored" } else { "Archived" },
                short_id(&id)
            );
        }
        SessionCommand::Rename { id, title } => {
            let id = resolve_session(&app, &id).await?;
            app.sync.rename_session(&id, &title).await?;
            println!("Renamed {} to {}", short_id(&id), title.trim().cyan());
        }
        SessionCommand::Search { query } => {
            let sessions = app.sync.search_sessions(&query).await?;
            let messages = app.sync.search_messages(&query).await?;
            if sessions.is_empty() && messages.is_empty() {
                println!("{}", format!("Nothing matches '{}'.", query).yellow());
                return Ok(());
            }
            if !sessions.is_empty() {
                print_sessions_table(&sessions);
            }
            if !messages.is_empty() {
                println!("{}", "Matching messages:".bold());
                for message in messages {
                    println!(
                        "  {} [{}] {}",
                        short_id(&message.session_id).cyan(),
                        message.role,
                        truncate(&message.content.replace('\n', " "), 70)
                    );
                }
                println!();
            }
        }
    }
    Ok(())
}

fn session_filter(archived: bool, pinned: bool, all: bool) -> SessionFilter {
    if all {
        SessionFilter::All
    } else if archived {
        SessionFilter::Archived
    } else if pinned {
        SessionFilter::Pinned
    } else {
        SessionFilter::Active
    }
}

fn print_sessions_table(sessions: &[Session]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Model".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for session in sessions {
        let mut title = truncate(&session.title, 40);
        if session.is_pinned {
            title = format!("* {}", title);
        }
        table.add_row(prettytable::row![
            short_id(&session.id).cyan(),
            title,
            session.model_name,
            session.message_count,
            session.updated_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    }

    println!();
    table.printstd();
    println!();
}
