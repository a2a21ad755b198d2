//! Send a prompt to an OpenAI-compatible chat model and print the reply.
//!
//! Reads `OPENAI_API_KEY` (required), `OPENAI_BASE_URL` and `OPENAI_MODEL`
//! from the environment. Log verbosity follows `RUST_LOG`
//! (default `convo=info,convo_rs=info`); logs go to stderr.
//!
//! # Examples
//!
//! ```sh
//! # Basic request
//! convo --user "Tell me a joke"
//!
//! # System template with parameters
//! convo --system "You answer in the voice of a {voice}" --param voice=Pirate \
//!   --user "Generate the names of 5 famous pirates"
//!
//! # Stream tokens as they arrive
//! convo --user "Tell me a joke" --stream
//!
//! # Image input
//! convo --user "Explain what do you see on this picture?" \
//!   --image https://example.com/multimodal.test.png --model gpt-4o
//!
//! # Pipe content from stdin
//! cat notes.md | convo --system "Summarize." --stdin
//!
//! # Multi-turn session with memory
//! convo --repl --conversation andrew
//! ```

use std::io::{self, Read, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use convo_rs::ChatError;
use convo_rs::client::{ChatClient, PromptSpec};
use convo_rs::config::EndpointConfig;
use convo_rs::endpoint::openai::OpenAiEndpoint;
use convo_rs::memory::{ConversationMemory, InMemoryChatMemory};
use convo_rs::message::MediaRef;
use convo_rs::prompt::ChatOptions;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Send a prompt to an OpenAI-compatible chat model and print the reply.
#[derive(Parser)]
#[command(name = "convo")]
struct Cli {
    // ── Message content ────────────────────────────────────────
    /// System prompt template; `{name}` placeholders are filled from --param
    #[arg(long)]
    system: Option<String>,

    /// Template parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// User message to send
    #[arg(long)]
    user: Option<String>,

    /// Read user content from stdin
    #[arg(long)]
    stdin: bool,

    /// Image URL to attach to the user message (repeatable)
    #[arg(long = "image")]
    images: Vec<String>,

    // ── Model and sampling ─────────────────────────────────────
    /// Model to use instead of the configured default
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens in the response
    #[arg(long)]
    max_tokens: Option<u32>,

    // ── Output control ─────────────────────────────────────────
    /// Print tokens as they arrive
    #[arg(long, conflicts_with = "json")]
    stream: bool,

    /// Print the full response, including metadata, as JSON
    #[arg(long)]
    json: bool,

    // ── Session ────────────────────────────────────────────────
    /// Interactive multi-turn session backed by in-process memory
    #[arg(long, conflicts_with_all = ["stdin", "json"])]
    repl: bool,

    /// Conversation id for the REPL memory
    #[arg(long, default_value = "default")]
    conversation: String,
}

// ── Helpers ────────────────────────────────────────────────────────

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn read_stdin_content() -> Result<String, ChatError> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| ChatError::invalid_request(format!("failed to read stdin: {e}")))?;
    Ok(buf)
}

fn build_user_content(cli: &Cli) -> Result<String, ChatError> {
    let stdin_text = if cli.stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };

    match (&cli.user, stdin_text) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.clone()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err(ChatError::invalid_request(
            "provide --user, --stdin, or both",
        )),
    }
}

fn build_client(
    cli: &Cli,
    memory: Option<Arc<dyn ConversationMemory>>,
) -> Result<ChatClient, ChatError> {
    let mut config = EndpointConfig::from_env()?;
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    info!("Using {} at {}", config.model, config.base_url);
    let endpoint = Arc::new(OpenAiEndpoint::new(config)?);

    let options = ChatOptions {
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        ..Default::default()
    };

    let mut builder = ChatClient::builder(endpoint).default_options(options);
    if let Some(system) = &cli.system {
        builder = builder.default_system(system.as_str());
    }
    for (key, value) in &cli.params {
        builder = builder.default_param(key.clone(), value.clone());
    }
    if let Some(memory) = memory {
        builder = builder.memory(memory);
    }
    Ok(builder.build())
}

fn with_images<'c>(cli: &Cli, mut spec: PromptSpec<'c>) -> PromptSpec<'c> {
    for image in &cli.images {
        spec = spec.media(MediaRef::guess(image.clone()));
    }
    spec
}

/// Print a streamed reply as it arrives. Returns the full text.
async fn print_stream(spec: PromptSpec<'_>) -> Result<String, ChatError> {
    let mut stream = spec.stream().await?;
    let mut stdout = io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        print!("{}", chunk.text);
        let _ = stdout.flush();
    }
    println!();
    Ok(stream.text().to_string())
}

async fn send_once(cli: &Cli) -> Result<(), ChatError> {
    let user_content = build_user_content(cli)?;
    let client = build_client(cli, None)?;
    let spec = with_images(cli, client.prompt().user(user_content));

    if cli.stream {
        print_stream(spec).await?;
    } else if cli.json {
        let response = spec.call().await?;
        let json = serde_json::to_string_pretty(&response)
            .map_err(|e| ChatError::invalid_request(format!("failed to format response: {e}")))?;
        println!("{json}");
    } else {
        println!("{}", spec.content().await?);
    }
    Ok(())
}

async fn run_repl(cli: &Cli) -> Result<(), ChatError> {
    let memory: Arc<dyn ConversationMemory> = Arc::new(InMemoryChatMemory::new());
    let client = build_client(cli, Some(Arc::clone(&memory)))?;
    eprintln!(
        "  conversation '{}' (type /clear to forget, /exit to quit)",
        cli.conversation
    );

    if let Some(first) = &cli.user {
        let spec = client
            .prompt()
            .user(first.clone())
            .conversation_id(cli.conversation.as_str());
        print_stream(with_images(cli, spec)).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let _ = io::stderr().flush();
        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ChatError::invalid_request(format!("failed to read stdin: {e}")))?
        else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                memory.clear(&cli.conversation);
                eprintln!("  memory cleared");
                continue;
            }
            _ => {}
        }

        let spec = client
            .prompt()
            .user(line)
            .conversation_id(cli.conversation.as_str());
        if let Err(e) = print_stream(spec).await {
            eprintln!("Error: {e}");
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("convo=info,convo_rs=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = if cli.repl {
        run_repl(&cli).await
    } else {
        send_once(&cli).await
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
