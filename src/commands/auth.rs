use crate::cli::AuthCommand;
use crate::credentials::{CredentialProvider, EnvCredentials, KeyringCredentials, API_KEY_ENV};
use anyhow::{Context, Result};
use colored::Colorize;

/// Handle `zenchat auth ...`
///
/// Keys live in the OS keyring; `ZENCHAT_API_KEY` takes precedence when set.
pub fn handle_auth(command: AuthCommand) -> Result<()> {
    let keyring = KeyringCredentials::default();
    match command {
        AuthCommand::Login { key } => {
            keyring.store(&key).context("Failed to store API key")?;
            println!("{}", "API key saved to the system keyring".green());
        }
        AuthCommand::Logout => {
            keyring.clear().context("Failed to remove API key")?;
            println!("{}", "API key removed".green());
        }
        AuthCommand::Status => {
            let env = EnvCredentials::default();
            if env.token().is_some() {
                println!("API key: {} (from {})", "configured".green(), API_KEY_ENV);
            } else {
                match keyring.load() {
                    Ok(Some(_)) => println!("API key: {} (keyring)", "configured".green()),
                    Ok(None) => println!(
                        "API key: {} - only free models are available",
                        "not set".yellow()
                    ),
                    Err(e) => println!("API key: {} ({})", "unknown".red(), e),
                }
            }
        }
    }
    Ok(())
}
