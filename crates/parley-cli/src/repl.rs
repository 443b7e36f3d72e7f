//! Line-oriented chat loop
//!
//! Reads stdin a line at a time. Plain lines are sent as messages; lines
//! starting with `/` are commands. All checks happen in the core client; this
//! module only renders what it reports.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::ai::client::SessionView;
use parley_core::ai::providers::get_provider;
use parley_core::{
    CompletionClient, ConversationTurn, ProviderConfig, RateSnapshot, Role, SendOutcome, Settings,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    Key(String),
    Model(String),
    Instructions(String),
    TestKey,
    Status,
    Help,
    Quit,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Command(Command),
    Blank,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Blank;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "new" => Command::New,
        "key" => Command::Key(arg),
        "model" => Command::Model(arg),
        "instructions" | "system" => Command::Instructions(arg),
        "test-key" | "testkey" => Command::TestKey,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    };
    Input::Command(command)
}

const HELP: &str = "\
Commands:
  /new                 start a new chat (keeps your key)
  /key <api-key>       set the API key for this session
  /model <id>          switch model
  /instructions <txt>  set the system instructions (empty resets)
  /test-key            check the key format without sending anything
  /status              show model, key, and rate limit state
  /help                show this help
  /quit                exit";

pub async fn run(settings: &Settings) -> Result<()> {
    let config = settings.into_client_config()?;
    let mut client = CompletionClient::with_default_transport(config)?;

    if let Some(key) = settings.resolve_api_key()? {
        let verdict = client.set_api_key(&key);
        tracing::info!(valid = verdict.valid, "Loaded API key from environment");
    }

    let view = client.view();
    println!("Parley - {} / {}", view.provider, view.model_display_name);
    if !client.has_api_key() {
        println!(
            "No API key found in ${}. Use /key <api-key> to set one.",
            settings.api_key_env_name()?
        );
    }
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let shown = client.conversation().len();
        match parse_input(&line) {
            Input::Blank => continue,
            Input::Message(text) => {
                if let SendOutcome::Ignored = client.send_message(&text).await {
                    continue;
                }
                print_new_turns(&client, shown);
                if let Some(warning) = quota_warning_line(&client.view().rate) {
                    println!("{}", warning);
                }
            }
            Input::Command(Command::Quit) => break,
            Input::Command(command) => {
                handle_command(&mut client, command);
                print_new_turns(&client, shown);
            }
        }
    }

    println!();
    Ok(())
}

fn handle_command(client: &mut CompletionClient, command: Command) {
    match command {
        Command::New => {
            client.start_new_chat();
            println!("Started a new chat.");
        }
        Command::Key(raw) => {
            let verdict = client.set_api_key(&raw);
            if verdict.valid {
                println!("API key set.");
            } else {
                println!("API key set, but it looks wrong ({}). Try /test-key.", verdict.reason);
            }
        }
        Command::Model(id) if id.is_empty() => {
            let view = client.view();
            println!("Current model: {} [{}]", view.model_display_name, view.model);
        }
        Command::Model(id) => match client.set_model(&id) {
            Ok(()) => println!("Model set to {}.", client.view().model_display_name),
            Err(e) => println!("Could not switch model: {}", e),
        },
        Command::Instructions(text) => {
            client.set_instructions(&text);
            if text.is_empty() {
                println!("Instructions reset to the default.");
            } else {
                println!("Instructions updated.");
            }
        }
        Command::TestKey => {
            client.test_api_key();
        }
        Command::Status => print_status(&client.view()),
        Command::Help => println!("{}", HELP),
        Command::Unknown(name) => println!("Unknown command /{}. Type /help.", name),
        Command::Quit => {}
    }
}

fn print_new_turns(client: &CompletionClient, shown: usize) {
    let provider = get_provider(client.config().provider_id);
    let turns = client.conversation().turns();
    for turn in turns.iter().skip(shown) {
        if let Some(line) = render_turn(turn, provider) {
            println!("{}", line);
        }
    }
}

/// User turns are not echoed; the user just typed them
///
/// Assistant turns are labelled with the model's display name when the
/// provider lists it.
pub fn render_turn(turn: &ConversationTurn, provider: Option<&ProviderConfig>) -> Option<String> {
    match (turn.role, turn.error) {
        (Role::User, _) => None,
        (Role::Assistant, _) => {
            let model = turn.model.as_deref().unwrap_or("assistant");
            let label = provider.map_or(model, |p| p.display_name_for(model));
            Some(format!("[{}] {}", label, turn.text))
        }
        (Role::System, Some(_)) => Some(format!("✗ {}", turn.text)),
        (Role::System, None) => Some(format!("· {}", turn.text)),
    }
}

fn print_status(view: &SessionView) {
    println!("Session:  {}", view.session_id);
    println!("Provider: {}", view.provider);
    println!("Model:    {} [{}]", view.model_display_name, view.model);
    println!("Chat:     {} ({} turns)", view.title, view.turns.len());
    println!(
        "Key:      {}",
        if view.credential.valid {
            "ok".to_string()
        } else {
            view.credential.reason.to_string()
        }
    );
    println!(
        "Requests: {} total, {}/{} in window, next spacing {} ms",
        view.rate.request_count,
        view.rate.in_window,
        view.rate.window_limit,
        view.rate.backoff_delay_ms
    );
    if let Some(server) = view.rate.server {
        let remaining = server
            .remaining
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".to_string());
        let reset = server
            .reset_at
            .map(|at| at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("Server:   {} remaining, resets at {}", remaining, reset);
    }
    if let Some(warning) = quota_warning_line(&view.rate) {
        println!("{}", warning);
    }
    if let Some(err) = &view.last_error {
        println!("Last error ({}): {}", err.kind, err.message);
    }
}

pub fn quota_warning_line(rate: &RateSnapshot) -> Option<String> {
    let remaining = rate.quota_warning()?;
    let unit = if remaining == 1 { "request" } else { "requests" };
    Some(format!("⚠ Rate limit warning: {} {} remaining", remaining, unit))
}
