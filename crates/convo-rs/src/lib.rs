//! Minimal conversational client for OpenAI-compatible chat models.
//!
//! `convo-rs` is a thin orchestration layer: it assembles prompts from a
//! system template, the user's text and attached media, replays earlier
//! turns from a pluggable [`ConversationMemory`](memory::ConversationMemory),
//! optionally grounds the prompt in documents from a
//! [`VectorStore`](vector::VectorStore), and sends the result to a hosted
//! model. Replies come back as plain text, as a pull-based stream of chunks,
//! or decoded into a caller-chosen Rust type.
//!
//! # Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//! use convo_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ChatError> {
//!     let endpoint = Arc::new(OpenAiEndpoint::from_env()?);
//!     let client = ChatClient::builder(endpoint)
//!         .memory(Arc::new(InMemoryChatMemory::new()))
//!         .build();
//!
//!     // Plain call.
//!     let joke = client.prompt().user("Tell me a joke").content().await?;
//!     println!("{joke}");
//!
//!     // Streaming.
//!     let mut stream = client.prompt().user("Tell me a joke").stream().await?;
//!     while let Some(chunk) = stream.next().await {
//!         print!("{}", chunk?.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Send prompts:** [`ChatClient`](client::ChatClient) and its fluent
//!   [`PromptSpec`](client::PromptSpec).
//! - **Templates and message ordering:** [`prompt`], in particular
//!   [`PromptTemplate`](prompt::PromptTemplate),
//!   [`PromptBuilder`](prompt::PromptBuilder) and
//!   [`PromptRequest`](prompt::PromptRequest).
//! - **Multi-turn state:** [`memory`].
//! - **Streaming:** [`ChatStream`](stream::ChatStream).
//! - **Structured output:** [`Schema`](entity::Schema).
//! - **Talk to a different provider:** implement
//!   [`ModelEndpoint`](endpoint::ModelEndpoint).
//! - **Retrieval:** [`retrieval`] and [`vector`].
//! - **Retries:** nothing retries on its own; see [`retry`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | `ChatClient`, builder, fluent prompts |
//! | [`prompt`] | Templates, message assembly, options, validated requests |
//! | [`memory`] | `ConversationMemory` trait, in-memory and no-op variants |
//! | [`endpoint`] | `ModelEndpoint` trait, response types, OpenAI-compatible HTTP endpoint, SSE decoding |
//! | [`stream`] | `ChatStream` consumer and its lifecycle |
//! | [`entity`] | Schema-checked decoding into Rust types |
//! | [`retrieval`] | Context augmentation from a vector store |
//! | [`vector`] | `VectorStore` and `Embedder` traits, in-memory store, HTTP embedder |
//! | [`retry`] | Backoff helper for retryable errors |
//! | [`config`] | Endpoint and client settings |

pub mod client;
pub mod config;
pub mod endpoint;
pub mod entity;
pub mod error;
pub mod memory;
pub mod message;
pub mod prelude;
pub mod prompt;
pub mod retrieval;
pub mod retry;
pub mod stream;
pub mod vector;

use schemars::JsonSchema;

pub use error::ChatError;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// API root used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for all calls.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use convo_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct ActorFilms {
///     actor: String,
///     movies: Vec<String>,
/// }
///
/// let schema = json_schema_for::<ActorFilms>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"actor".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
