//! Interactive chat and one-shot sends
//!
//! Replies are rendered from the store's change feed: every appended delta
//! for the active session is printed as soon as it is committed, so what
//! the terminal shows is exactly what was persisted.

use crate::app::App;
use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
use crate::commands::{models, resolve_session};
use crate::error::ZenError;
use crate::storage::{Role, Session, StoreEvent, StoredMessage};
use crate::sync::SendOutcome;
use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct PrintedDeltas {
    any: bool,
    lagged: bool,
}

/// Print committed deltas for `session_id` until `done` fires
///
/// Events already queued when `done` fires are still printed.
fn spawn_delta_printer(
    events: broadcast::Receiver<StoreEvent>,
    session_id: String,
    done: CancellationToken,
) -> JoinHandle<PrintedDeltas> {
    let mut events = BroadcastStream::new(events);
    tokio::spawn(async move {
        let mut printed = PrintedDeltas::default();
        loop {
            let event = tokio::select! {
                biased;
                event = events.next() => event,
                _ = done.cancelled() => break,
            };
            let Some(event) = event else { break };
            match event {
                Ok(StoreEvent::ContentAppended {
                    session_id: sid,
                    delta,
                    ..
                }) if sid == session_id => {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                    printed.any = true;
                }
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Display skipped {} store events", skipped);
                    printed.lagged = true;
                }
            }
        }
        printed
    })
}

/// Send one message, rendering the reply as it is stored
///
/// Ctrl-C while waiting cancels the send; the partial reply stays stored.
async fn send_and_render(
    app: &App,
    session_id: &str,
    text: &str,
    streaming: bool,
) -> Result<SendOutcome> {
    let done = CancellationToken::new();
    let printer = spawn_delta_printer(app.sync.subscribe(), session_id.to_string(), done.clone());

    let sync = app.sync.clone();
    let sid = session_id.to_string();
    let body = text.to_string();
    let mut send = tokio::spawn(async move { sync.send_message(&sid, &body, streaming).await });

    let joined = tokio::select! {
        joined = &mut send => joined,
        _ = tokio::signal::ctrl_c() => {
            app.sync.cancel(session_id);
            send.await
        }
    };

    done.cancel();
    let printed = printer.await.unwrap_or_default();
    let result = joined.context("Send task failed")?;

    match result {
        Ok(outcome) => {
            if outcome.streamed && printed.any && !printed.lagged {
                println!();
            } else {
                if printed.any {
                    println!();
                }
                println!("{}", outcome.content);
            }
            Ok(outcome)
        }
        Err(e) => {
            if printed.any {
                println!();
            }
            Err(describe_send_error(e))
        }
    }
}

fn describe_send_error(error: ZenError) -> anyhow::Error {
    match &error {
        ZenError::AuthRequired(_) => anyhow!(
            "{}\nRun `zenchat auth login <KEY>` or switch to a free model.",
            error
        ),
        ZenError::Busy(_) => anyhow!("{}\nWait for the current reply to finish.", error),
        _ => anyhow::Error::new(error),
    }
}

/// Send a single message and print the reply
pub async fn run_send(app: App, session: &str, text: &str, streaming: bool) -> Result<()> {
    let session_id = resolve_session(&app, session).await?;
    let outcome = send_and_render(&app, &session_id, text, streaming).await?;
    tracing::debug!(
        "Reply {} stored ({} tokens)",
        outcome.assistant_message_id,
        outcome.token_count
    );
    Ok(())
}

/// Start the interactive chat loop
///
/// Continues `session` when given, otherwise opens a new session on the
/// default model.
pub async fn run_chat(app: App, session: Option<String>, streaming: bool) -> Result<()> {
    tracing::info!("Starting interactive chat mode");

    let mut current = match session {
        Some(id) => {
            let id = resolve_session(&app, &id).await?;
            let session = app
                .sync
                .get_session(&id)
                .await?
                .ok_or_else(|| anyhow!("Session {} no longer exists", id))?;
            print_transcript(&app.sync.messages(&session.id).await?);
            session
        }
        None => app
            .sync
            .create_session("", None)
            .await
            .context("Failed to create session")?,
    };

    let mut rl = DefaultEditor::new()?;
    print_welcome_banner(&current, streaming);

    loop {
        let prompt = format!("{} ", ">".green().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                let command = match parse_special_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{}", e.to_string().yellow());
                        continue;
                    }
                };

                match command {
                    SpecialCommand::Exit => break,
                    SpecialCommand::Help => print_help(),
                    SpecialCommand::ShowStatus => print_status(&app, &current).await?,
                    SpecialCommand::ListModels => {
                        let list = app.catalog.list_models(false).await?;
                        if let Some(advisory) = &list.advisory {
                            eprintln!("{}", format!("Showing free models: {}", advisory).yellow());
                        }
                        models::print_models_table(&list.models);
                    }
                    SpecialCommand::SwitchModel(model_id) => {
                        app.sync.set_session_model(&current.id, &model_id).await?;
                        current = refresh(&app, &current.id).await?;
                        println!("Now using {}", current.model_name.cyan());
                    }
                    SpecialCommand::Rename(title) => {
                        app.sync.rename_session(&current.id, &title).await?;
                        current = refresh(&app, &current.id).await?;
                        println!("Renamed to {}", current.title.cyan());
                    }
                    SpecialCommand::NewSession => {
                        current = app.sync.create_session("", Some(&current.model_id)).await?;
                        println!("Started session {}", current.id.cyan());
                    }
                    SpecialCommand::History => {
                        print_transcript(&app.sync.messages(&current.id).await?);
                    }
                    SpecialCommand::None => {
                        if let Err(e) = send_and_render(&app, &current.id, trimmed, streaming).await
                        {
                            eprintln!("{}", format!("Error: {}", e).red());
                        }
                        println!();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn refresh(app: &App, session_id: &str) -> Result<Session> {
    app.sync
        .get_session(session_id)
        .await?
        .ok_or_else(|| anyhow!("Session {} no longer exists", session_id))
}

fn print_welcome_banner(session: &Session, streaming: bool) {
    println!("\n{}", "zenchat".bold());
    println!("Session: {} ({})", session.title, session.id.dimmed());
    println!("Model:   {}", session.model_name.cyan());
    if !streaming {
        println!("Replies are shown once complete (--no-stream)");
    }
    println!("Type '/help' for available commands, 'exit' to quit\n");
}

async fn print_status(app: &App, session: &Session) -> Result<()> {
    let session = refresh(app, &session.id).await?;
    let tokens = app.sync.total_tokens(&session.id).await?;
    let last_reply = app.sync.last_reply(&session.id).await?;
    println!();
    println!("Session:  {} ({})", session.title, session.id);
    println!("Model:    {} [{}]", session.model_name, session.model_id);
    println!("Messages: {}", session.message_count);
    println!("Tokens:   {}", tokens);
    match last_reply {
        Some(reply) if reply.is_streaming => println!("Last reply: in progress"),
        Some(reply) => println!(
            "Last reply: {} ({} tokens)",
            reply.created_at.format("%Y-%m-%d %H:%M"),
            reply.token_count
        ),
        None => println!("Last reply: none yet"),
    }
    println!(
        "Key:      {}",
        if app.credentials.token().is_some() {
            "configured".green()
        } else {
            "not set (free models only)".yellow()
        }
    );
    println!();
    Ok(())
}

/// Print stored messages in order
pub(crate) fn print_transcript(messages: &[StoredMessage]) {
    for message in messages {
        let label = match message.role {
            Role::User => "you".green().bold(),
            Role::Assistant => "assistant".cyan().bold(),
            Role::System => "system".dimmed(),
            Role::Tool => "tool".dimmed(),
        };
        println!("{}", label);
        if message.content.is_empty() && !message.is_complete {
            println!("{}", "(reply in progress)".dimmed());
        } else {
            println!("{}", message.content);
        }
        println!();
    }
}
