//! Convenience re-exports for common `convo-rs` types.
//!
//! ```ignore
//! use convo_rs::prelude::*;
//! ```
//!
//! Pulls in the client, message and prompt types, memory, the OpenAI
//! endpoint and `futures::StreamExt` for consuming streams. Vector store and
//! retry types are left to their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::client::{ChatClient, ChatClientBuilder, PromptSpec};
pub use crate::config::{ClientConfig, EndpointConfig};
pub use crate::message::{MediaRef, Message, MessageRole};
pub use crate::prompt::{ChatOptions, PromptBuilder, PromptRequest, PromptTemplate};
pub use crate::{ChatError, json_schema_for};

// ── Responses ───────────────────────────────────────────────────────
pub use crate::endpoint::openai::OpenAiEndpoint;
pub use crate::endpoint::{ChatChunk, ChatResponse, Generation, ModelEndpoint};
pub use crate::entity::Schema;
pub use crate::stream::{ChatStream, StreamState};

// ── Memory ──────────────────────────────────────────────────────────
pub use crate::memory::{ConversationMemory, InMemoryChatMemory, NoopMemory};

pub use futures::StreamExt;
