//! colloquy - streaming LLM chat on the command line

mod commands;
mod config;
mod files;
mod render;
mod utils;

use clap::Parser;
use colloquy_ai::providers::openai::{DEFAULT_BASE_URL, OpenAIBackend};
use colloquy_ai::{InputType, Model};
use colloquy_engine::store::{SETTING_AUTO_TITLE, SETTING_QUICK_MODEL};
use colloquy_engine::{
    Conversation, ConversationSettings, FileRef, GenerationEvent, InMemoryStore, MessageBody,
    MessageStore, MessageStatus, NewMessage, Orchestrator, OrchestratorConfig, UserPayload,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

const BACKEND_ID: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// colloquy - streaming LLM chat
#[derive(Parser, Debug)]
#[command(name = "colloquy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gpt-4o-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Attach a file to the first message (repeatable)
    #[arg(short, long)]
    attach: Vec<PathBuf>,

    /// Ask for reasoning output
    #[arg(short, long)]
    think: bool,

    /// Prompt token budget
    #[arg(long)]
    context_length: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// One interactive chat over an in-memory store
struct Chat {
    orchestrator: Orchestrator,
    store: Arc<InMemoryStore>,
    settings: ConversationSettings,
    conversation_id: String,
    last_user: Option<String>,
    pending_files: Vec<FileRef>,
    think: bool,
}

impl Chat {
    fn new(orchestrator: Orchestrator, store: Arc<InMemoryStore>, settings: ConversationSettings) -> Self {
        let conversation = Conversation::new("New chat", settings.clone());
        let conversation_id = conversation.id.clone();
        store.insert_conversation(conversation);
        Self {
            orchestrator,
            store,
            settings,
            conversation_id,
            last_user: None,
            pending_files: Vec::new(),
            think: false,
        }
    }

    /// Start over with an empty conversation
    fn reset(&mut self) {
        let conversation = Conversation::new("New chat", self.settings.clone());
        self.conversation_id = conversation.id.clone();
        self.store.insert_conversation(conversation);
        self.last_user = None;
        self.pending_files.clear();
    }

    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        let payload = UserPayload {
            text: text.to_string(),
            files: std::mem::take(&mut self.pending_files),
            think: self.think,
            ..Default::default()
        };
        let user = self
            .store
            .create_message(NewMessage {
                conversation_id: self.conversation_id.clone(),
                parent_id: None,
                status: MessageStatus::Sent,
                body: MessageBody::User(payload),
            })
            .await?;
        self.last_user = Some(user.id);

        stream_generation(
            &self.orchestrator,
            &self.conversation_id,
            0,
            self.orchestrator.start_generation(&self.conversation_id, None),
        )
        .await
    }

    async fn retry(&self) -> anyhow::Result<()> {
        let Some(user_id) = self.last_user.as_deref() else {
            println!("Nothing to retry.");
            return Ok(());
        };
        stream_generation(
            &self.orchestrator,
            &self.conversation_id,
            0,
            self.orchestrator
                .start_generation(&self.conversation_id, Some(user_id)),
        )
        .await
    }

    async fn resume(&self) -> anyhow::Result<()> {
        let Some(user_id) = self.last_user.as_deref() else {
            println!("Nothing to continue.");
            return Ok(());
        };
        let history = self.store.query_history(&self.conversation_id).await?;
        let shown = history
            .iter()
            .filter(|m| m.parent_id.as_deref() == Some(user_id))
            .max_by_key(|m| m.seq)
            .map(|m| render::transcript(m.blocks()).chars().count())
            .unwrap_or(0);
        stream_generation(
            &self.orchestrator,
            &self.conversation_id,
            shown,
            self.orchestrator
                .continue_generation(&self.conversation_id, user_id),
        )
        .await
    }

    async fn info(&self) -> anyhow::Result<String> {
        let conversation = self
            .store
            .get_conversation(&self.conversation_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("conversation disappeared"))?;
        let history = self.store.query_history(&self.conversation_id).await?;
        let (input, output) = history.iter().fold((0u32, 0u32), |(i, o), m| {
            (i + m.metadata.input_tokens, o + m.metadata.output_tokens)
        });
        Ok(format!(
            "Conversation: {}\nModel: {}\nMessages: {}\nTokens: {} in, {} out\nReasoning: {}",
            conversation.title,
            self.settings.model_id,
            history.len(),
            input,
            output,
            if self.think { "on" } else { "off" }
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("colloquy=debug")
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Load config file
    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let base_url = args
        .base_url
        .or(cfg.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export OPENAI_API_KEY=your-key");
        eprintln!("Or add it to config file: colloquy --init-config");
        std::process::exit(1);
    };

    let settings = ConversationSettings {
        system_prompt: args.system.or(cfg.system_prompt.clone()),
        temperature: cfg.temperature,
        max_tokens: cfg.max_tokens,
        context_length: args.context_length.or(cfg.context_length),
        backend_id: BACKEND_ID.to_string(),
        model_id: model_id.clone(),
        artifacts: false,
    };

    let mut input_types = vec![InputType::Text];
    if cfg.vision.unwrap_or(false) {
        input_types.push(InputType::Image);
    }
    let backend = OpenAIBackend::new(api_key, base_url).with_models(vec![Model {
        id: model_id.clone(),
        name: model_id.clone(),
        // capability is unknown up front, so reasoning_effort goes out whenever asked
        reasoning: true,
        input_types,
        context_window: settings.context_length.unwrap_or(0),
        max_tokens: cfg.max_tokens.unwrap_or(4096),
    }]);

    let store = Arc::new(InMemoryStore::new());
    if let Some(ref quick) = cfg.quick_model {
        store.set_setting(SETTING_QUICK_MODEL, quick.clone());
    }
    if cfg.auto_title == Some(false) {
        store.set_setting(SETTING_AUTO_TITLE, "false");
    }

    let orchestrator = Orchestrator::new(store.clone(), OrchestratorConfig::default())
        .with_backend(BACKEND_ID, Arc::new(backend));
    let recovered = orchestrator.recover_interrupted().await?;
    tracing::debug!(recovered, "startup recovery finished");

    let mut chat = Chat::new(orchestrator, store, settings);
    chat.think = args.think;
    for path in &args.attach {
        chat.pending_files.push(files::load_attachment(path)?);
    }

    // Non-interactive mode
    if let Some(command) = args.command {
        return chat.send(&command).await;
    }

    run_interactive(&mut chat).await
}

async fn run_interactive(chat: &mut Chat) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("colloquy ({}) /help for commands", chat.settings.model_id);
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let outcome = match commands::parse_command(input) {
            None => chat.send(input).await,
            Some(commands::CommandResult::New) => {
                chat.reset();
                println!("Started a new conversation.");
                Ok(())
            }
            Some(commands::CommandResult::Retry) => chat.retry().await,
            Some(commands::CommandResult::Continue) => chat.resume().await,
            Some(commands::CommandResult::Attach(path)) => {
                files::load_attachment(std::path::Path::new(&path)).map(|file| {
                    println!("Attached {} ({})", file.name, file.mime_type);
                    chat.pending_files.push(file);
                })
            }
            Some(commands::CommandResult::Think) => {
                chat.think = !chat.think;
                println!("Reasoning {}.", if chat.think { "on" } else { "off" });
                Ok(())
            }
            Some(commands::CommandResult::Info) => chat.info().await.map(|info| println!("{}", info)),
            Some(commands::CommandResult::Message(msg)) => {
                println!("{}", msg);
                Ok(())
            }
            Some(commands::CommandResult::Exit) => break,
            Some(commands::CommandResult::Unknown(cmd)) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            eprintln!("Error: {}", e);
        }
        println!();
    }

    Ok(())
}

/// Drive one generation while printing its events. Ctrl-C stops it.
async fn stream_generation<F>(
    orchestrator: &Orchestrator,
    conversation_id: &str,
    skip: usize,
    generation: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = colloquy_engine::Result<String>>,
{
    let receiver = orchestrator.subscribe();
    let printer = tokio::spawn(print_events(receiver, conversation_id.to_string(), skip));

    let stopper = {
        let orchestrator = orchestrator.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.stop_all_generations(&conversation_id);
            }
        })
    };

    let result = generation.await;
    stopper.abort();
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), printer).await;

    result?;
    Ok(())
}

async fn print_events(
    mut receiver: tokio::sync::broadcast::Receiver<GenerationEvent>,
    conversation_id: String,
    skip: usize,
) {
    let is_tty = std::io::IsTerminal::is_terminal(&io::stdout());
    let mut printer = render::StreamPrinter::new(skip);

    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event {
            GenerationEvent::ContentUpdated {
                conversation_id: ref id,
                ref blocks,
                ..
            } if *id == conversation_id => {
                let (text, search) = printer.update(blocks);
                if let Some(line) = search {
                    eprintln!("[{}]", line);
                }
                if !text.is_empty() {
                    print!("{}", text);
                    io::stdout().flush().ok();
                }
            }
            GenerationEvent::GenerationEnd {
                conversation_id: ref id,
                ref metadata,
                ..
            } if *id == conversation_id => {
                println!();
                // Print stats only on a terminal so they don't interfere with piped output
                if is_tty {
                    println!(
                        "[{} in, {} out | {:.1} tok/s | {}]",
                        metadata.input_tokens,
                        metadata.output_tokens,
                        metadata.tokens_per_second,
                        utils::format_duration(metadata.generation_time_ms)
                    );
                }
                break;
            }
            GenerationEvent::Error {
                conversation_id: ref id,
                ..
            } if *id == conversation_id => {
                println!();
                break;
            }
            _ => {}
        }
    }
}
