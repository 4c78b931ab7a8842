//! zenchat - terminal chat client for OpenCode Zen

use anyhow::{Context, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zenchat::app::App;
use zenchat::cli::{Cli, Commands};
use zenchat::commands;
use zenchat::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Key management works without a config file or database.
    if let Commands::Auth { command } = &cli.command {
        return commands::auth::handle_auth(command.clone());
    }

    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli).context("Failed to load configuration")?;
    config.validate()?;

    let app = App::from_config(config)
        .await
        .context("Failed to initialize zenchat")?;
    let streaming_default = app.streaming();

    match cli.command {
        Commands::Chat { session, no_stream } => {
            commands::chat::run_chat(app, session, streaming_default && !no_stream).await
        }
        Commands::Send {
            session,
            no_stream,
            text,
        } => {
            commands::chat::run_send(app, &session, &text, streaming_default && !no_stream).await
        }
        Commands::Sessions { command } => commands::sessions::handle_sessions(app, command).await,
        Commands::Models { command } => commands::models::handle_models(app, command).await,
        Commands::Auth { .. } => Ok(()),
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so streamed replies on stdout stay clean.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "zenchat=debug" } else { "zenchat=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
