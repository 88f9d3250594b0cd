//! Chat with a model from the terminal, with persistent session memory.
//!
//! # Examples
//!
//! ```sh
//! # One-shot prompt using ./config.json
//! parlance --prompt "What's the weather like in Paris?"
//!
//! # Interactive chat in a named session against a local llama.cpp server
//! parlance config.json --chat --session travel --provider llama_cpp
//!
//! # Verbose logging
//! parlance --chat --log-level parlance=debug
//! ```
//!
//! In chat mode, `/history` prints the context window, `/recall QUERY`
//! searches archived messages, and `/quit` (or Ctrl-D) exits.

use clap::Parser;
use parlance::config::{Config, DEFAULT_CONFIG_PATH, Provider};
use parlance::functions::CurrentWeather;
use parlance::prelude::*;
use parlance::recall::ModelEmbedder;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Chat with a model from the terminal, with persistent session memory.
#[derive(Parser)]
#[command(name = "parlance", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,

    /// Prompt the model once and exit
    #[arg(long, conflicts_with = "chat", required_unless_present = "chat")]
    prompt: Option<String>,

    /// Enter an interactive chat loop
    #[arg(long)]
    chat: bool,

    /// Session name; ledgers are stored per session
    #[arg(long, default_value = "default")]
    session: String,

    /// Model provider: openai or llama_cpp (overrides the config)
    #[arg(long)]
    provider: Option<Provider>,

    /// Log filter directive, e.g. "parlance=debug" (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn show(message: &Message) {
    println!("{}", message.role);
    match (&message.content, &message.function_call_name) {
        (Some(content), _) => println!("{content}"),
        (None, Some(name)) => println!("[function call: {name}]"),
        (None, None) => {}
    }
    println!();
}

fn show_turn(turn: &Turn) {
    if let Some(reply) = &turn.reply {
        show(reply);
    }
    if let Some(notice) = &turn.notice {
        eprintln!("Notice: {notice}");
    }
}

async fn build_conversation(cli: &Cli, config: &Config) -> Result<Conversation, String> {
    let mut dispatcher = FunctionDispatcher::new(config.templates().to_vec());
    if config.function.enabled {
        let weather = CurrentWeather::new().map_err(|e| format!("failed to create weather client: {e}"))?;
        dispatcher.register_function(parlance::functions::weather::FUNCTION_NAME, weather);
    }

    let mut client = OpenAiClient::from_config(&config.model).map_err(|e| e.to_string())?;
    if config.function.enabled {
        client = client.with_functions(dispatcher.definitions());
    }
    info!(
        "Using {} model {} at {}",
        config.model.provider,
        client.model(),
        config.model.endpoint()
    );
    let model: Arc<dyn ChatModel> = Arc::new(client);

    let mut session = SessionManager::new(
        cli.session.as_str(),
        config.ledger_store(),
        config.window_budget(),
        model.clone(),
    )
    .map_err(|e| e.to_string())?;

    if config.recall.enabled {
        let store = LocalVectorStore::open(
            config.recall.collection.as_str(),
            config.recall_dir(),
            Arc::new(ModelEmbedder::new(model.clone())),
        )
        .map_err(|e| e.to_string())?;
        session = session.with_recall(Arc::new(store));
    }

    let resumed = session
        .load(config.system_prompt())
        .await
        .map_err(|e| e.to_string())?;
    info!(
        "Session '{}' {}",
        session.name(),
        if resumed { "resumed" } else { "started" }
    );

    Ok(Conversation::new(session, dispatcher, config.retry_config()))
}

async fn run_prompt(conversation: &mut Conversation, prompt: &str) {
    let result = conversation.respond(prompt).await;
    if !conversation.save() {
        error!("Failed to save session");
    }
    match result {
        Ok(turn) => show_turn(&turn),
        Err(e) => fail(format!("failed to generate a response: {e}")),
    }
}

async fn run_chat(conversation: &mut Conversation, config: &Config) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut failures = 0u32;

    loop {
        println!("user");
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let input = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        };
        let input = input.trim();
        println!();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                if let Err(e) = conversation.session().print(None) {
                    error!("Failed to print history: {e}");
                }
                continue;
            }
            _ => {}
        }
        if let Some(query) = input.strip_prefix("/recall") {
            let recalled = conversation
                .session()
                .recall(query.trim(), config.recall.n_results)
                .await;
            if recalled.is_empty() {
                println!("(nothing recalled)\n");
            }
            for message in &recalled {
                show(message);
            }
            continue;
        }

        match conversation.respond(input).await {
            Ok(turn) => {
                failures = 0;
                show_turn(&turn);
            }
            Err(e) => {
                failures += 1;
                error!(
                    "Turn failed ({failures}/{}): {e}",
                    config.chat.max_consecutive_failures
                );
                if failures >= config.chat.max_consecutive_failures {
                    conversation.save();
                    fail(format!("giving up after {failures} consecutive failures: {e}"));
                }
            }
        }
        if !conversation.save() {
            error!("Failed to save session");
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config_path) {
        Ok(c) => c,
        Err(e) => fail(e),
    };
    if let Some(provider) = cli.provider {
        config.model.provider = provider;
    }

    if let Err(e) = parlance::logging::init(cli.log_level.as_deref(), config.app.log_file.as_deref()) {
        fail(e);
    }

    let mut conversation = match build_conversation(&cli, &config).await {
        Ok(c) => c,
        Err(e) => fail(e),
    };

    if let Err(e) = conversation.session().print(Some(&[Role::System])) {
        fail(e);
    }

    if let Some(prompt) = &cli.prompt {
        run_prompt(&mut conversation, prompt).await;
    } else {
        run_chat(&mut conversation, &config).await;
    }

    conversation.save();
    conversation.close();
}
