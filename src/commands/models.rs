//! Model management commands for zenchat
//!
//! This module provides commands for discovering models, choosing the
//! default model and toggling free mode.

use crate::app::App;
use crate::catalog::{ModelDescriptor, Price};
use crate::cli::ModelCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use prettytable::{row, Table};

/// Handle `zenchat models ...`
pub async fn handle_models(app: App, command: ModelCommand) -> Result<()> {
    match command {
        ModelCommand::List {
            refresh,
            json,
            free,
        } => list_models(&app, refresh, json, free).await,
        ModelCommand::Default => {
            match app.catalog.get_default_model().await? {
                Some(id) => {
                    let model = app.catalog.describe(&id).await;
                    println!("{} ({})", model.id.cyan(), model.display_name);
                }
                None => println!(
                    "{}",
                    "No default model. Use `zenchat models set-default <ID>`.".yellow()
                ),
            }
            Ok(())
        }
        ModelCommand::SetDefault { id } => {
            app.catalog
                .set_default_model(&id)
                .await
                .context("Failed to save default model")?;
            println!("{}", format!("Default model set to {}", id.trim()).green());
            Ok(())
        }
        ModelCommand::FreeMode { state } => {
            let enabled = state == "on";
            app.catalog.set_free_mode(enabled).await?;
            println!("Free mode {}", if enabled { "on".green() } else { "off".yellow() });
            Ok(())
        }
    }
}

/// List models from the catalog
///
/// A remote failure still prints the free set, with the failure on stderr.
async fn list_models(app: &App, refresh: bool, json: bool, free_only: bool) -> Result<()> {
    tracing::info!("Listing models (refresh: {})", refresh);

    let list = app.catalog.list_models(refresh).await?;
    if let Some(advisory) = &list.advisory {
        eprintln!(
            "{}",
            format!("Could not fetch the full model list ({}); showing free models", advisory)
                .yellow()
        );
    }

    let models: Vec<ModelDescriptor> = list
        .models
        .into_iter()
        .filter(|m| !free_only || m.is_free)
        .collect();

    if json {
        output_models_json(&models)?;
        return Ok(());
    }

    if models.is_empty() {
        println!("No models available");
        return Ok(());
    }
    print_models_table(&models);
    Ok(())
}

/// Serialize a serializable value into pretty JSON string.
fn serialize_pretty<T: serde::Serialize + ?Sized>(
    value: &T,
) -> std::result::Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

fn output_models_json(models: &[ModelDescriptor]) -> Result<()> {
    let json = serialize_pretty(models).context("Failed to serialize models")?;
    println!("{}", json);
    Ok(())
}

fn format_price(price: Option<Price>) -> String {
    price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

fn format_flag(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// Print models as a table
pub(crate) fn print_models_table(models: &[ModelDescriptor]) {
    let mut table = Table::new();
    table.add_row(row![
        "Model ID",
        "Name",
        "Provider",
        "Free",
        "Streaming",
        "Prompt $/M",
        "Completion $/M"
    ]);

    for model in models {
        table.add_row(row![
            model.id,
            model.display_name,
            model.provider_name,
            format_flag(model.is_free),
            format_flag(model.capabilities.streaming),
            format_price(model.pricing.prompt),
            format_price(model.pricing.completion)
        ]);
    }

    println!();
    table.printstd();
    println!();
}
