//! Parley - a terminal chat client for hosted LLMs
//!
//! Thin front-end over `parley-core`:
//! - Line-oriented chat REPL with slash commands
//! - Provider listing
//! - Offline API key format check

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use parley_core::ai::providers::builtin_providers;
use parley_core::{paths, CredentialValidator, Settings};

mod repl;

/// Parley - chat with hosted LLMs from the terminal
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat with hosted LLMs from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to ~/.parley/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provider id (openrouter, gemini, openai_compatible)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model id to start with
    #[arg(short, long)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session (default)
    Chat,

    /// List built-in providers and their models
    Providers,

    /// Check the configured API key format without contacting the provider
    CheckKey,
}

/// Log to ~/.parley/logs/parley.log so the terminal stays clean
fn init_logging() {
    let filter = || {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();

    match std::fs::File::create(log_dir.join("parley.log")) {
        Ok(log_file) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::sink)
            .init(),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load_default()?,
    };
    if let Some(provider) = &cli.provider {
        if settings.provider != *provider {
            // a key variable chosen for another provider does not carry over
            settings.api_key_env = None;
            settings.model = None;
        }
        settings.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        settings.model = Some(model.clone());
    }
    Ok(settings)
}

fn print_providers() {
    println!("Built-in providers:");
    for provider in builtin_providers() {
        println!();
        println!(
            "  {} ({}) - {}",
            provider.name,
            provider.id.storage_key(),
            provider.description
        );
        println!("    endpoint: {}{}", provider.base_url, provider.path);
        println!("    key env:  {}", provider.id.default_api_key_env());
        for (i, model) in provider.models.iter().enumerate() {
            let marker = if i == 0 { " (default)" } else { "" };
            println!("    - {} [{}]{}", model.display_name, model.id, marker);
        }
    }
}

fn check_key(settings: &Settings) -> Result<()> {
    let config = settings.into_client_config()?;
    let env = settings.api_key_env_name()?;
    let key = settings.resolve_api_key()?;
    let validator = CredentialValidator::new(config.key_policy.clone());
    let verdict = validator.validate(key.as_deref());
    let message = validator.describe(verdict.reason, &config.provider_name);

    tracing::info!(provider = %config.provider_id, reason = %verdict.reason, "Checked API key format");

    if verdict.valid {
        println!("{} ({})", message, env);
        Ok(())
    } else {
        bail!("{} (from ${})", message, env)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => repl::run(&settings).await?,
        Commands::Providers => print_providers(),
        Commands::CheckKey => check_key(&settings)?,
    }

    Ok(())
}
