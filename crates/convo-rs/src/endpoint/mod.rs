//! The model endpoint seam and the response types it produces.
//!
//! [`ModelEndpoint`] is the narrow interface between the
//! [`ChatClient`](crate::client::ChatClient) and a hosted model. The crate
//! ships [`openai::OpenAiEndpoint`] for OpenAI-compatible APIs; tests and
//! other providers implement the trait directly.
//!
//! Streaming endpoints push [`ChatChunk`]s into a [`ChunkSink`]. The sink is
//! the producer half of a bounded channel: `push` waits for capacity, so a
//! slow consumer slows the producer down instead of losing chunks, and it
//! returns `false` once the consumer has gone away.

pub mod openai;
pub mod sse;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ChatError;
use crate::message::Message;
use crate::prompt::PromptRequest;

/// Boxed future returned by [`ModelEndpoint`] methods.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatError>> + Send + 'a>>;

/// A hosted chat model.
pub trait ModelEndpoint: Send + Sync {
    /// Send a request and wait for the complete response.
    fn send<'a>(&'a self, request: &'a PromptRequest) -> EndpointFuture<'a, ChatResponse>;

    /// Send a streaming request, pushing chunks into `sink` as they arrive.
    ///
    /// Implementations stop reading once the chunk with a finish reason has
    /// been pushed or `sink.push` returns `false`. Errors returned here are
    /// forwarded to the consumer as the stream's terminal item.
    fn send_stream<'a>(
        &'a self,
        request: &'a PromptRequest,
        sink: ChunkSink,
    ) -> EndpointFuture<'a, ()>;

    /// Model used when a request does not name one.
    fn default_model(&self) -> Option<&str> {
        None
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Token usage statistics.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Rate limit state reported by the provider alongside a response.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_limit: Option<u64>,
    pub requests_remaining: Option<u64>,
    /// Provider-formatted reset interval, e.g. `"1s"` or `"6m0s"`.
    pub requests_reset: Option<String>,
    pub tokens_limit: Option<u64>,
    pub tokens_remaining: Option<u64>,
    pub tokens_reset: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ResponseMetadata {
    pub id: Option<String>,
    pub model: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub usage: Usage,
    pub rate_limit: RateLimit,
}

/// One candidate completion.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Generation {
    pub index: u32,
    pub message: Message,
    /// Why generation stopped (`"stop"`, `"length"`, ...).
    pub finish_reason: Option<String>,
}

impl Generation {
    pub fn text(&self) -> &str {
        self.message.text()
    }
}

/// A complete (non-streamed) model response.
///
/// Always holds at least one generation when produced by
/// [`ChatClient::call`](crate::client::ChatClient::call).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatResponse {
    pub generations: Vec<Generation>,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    /// The first generation.
    pub fn result(&self) -> Option<&Generation> {
        self.generations.first()
    }

    /// Text of the first generation, or `""` if there is none.
    pub fn content(&self) -> &str {
        self.result().map_or("", Generation::text)
    }
}

/// One incremental piece of a streamed response.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatChunk {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ChatChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A final chunk. An empty `reason` is treated as no reason at all.
    pub fn finished(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: normalize_finish_reason(Some(reason.into())),
            usage: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Providers sometimes send `""` where they mean "not finished".
pub(crate) fn normalize_finish_reason(reason: Option<String>) -> Option<String> {
    reason.filter(|r| !r.trim().is_empty())
}

// ── Chunk sink ─────────────────────────────────────────────────────

pub(crate) type ChunkResult = Result<ChatChunk, ChatError>;

/// Producer half of a stream's chunk channel.
#[derive(Clone, Debug)]
pub struct ChunkSink {
    tx: mpsc::Sender<ChunkResult>,
}

impl ChunkSink {
    pub(crate) fn new(tx: mpsc::Sender<ChunkResult>) -> Self {
        Self { tx }
    }

    /// Deliver a chunk, waiting for channel capacity. Returns `false` once
    /// the consumer has dropped the stream.
    pub async fn push(&self, chunk: ChatChunk) -> bool {
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    pub(crate) async fn fail(&self, error: ChatError) {
        // A closed channel means nobody is left to tell.
        let _ = self.tx.send(Err(error)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_content_uses_first_generation() {
        let response = ChatResponse {
            generations: vec![
                Generation {
                    index: 0,
                    message: Message::assistant("first"),
                    finish_reason: Some("stop".into()),
                },
                Generation {
                    index: 1,
                    message: Message::assistant("second"),
                    finish_reason: Some("stop".into()),
                },
            ],
            metadata: ResponseMetadata::default(),
        };
        assert_eq!(response.content(), "first");
        assert_eq!(response.result(), response.generations.first());
    }

    #[test]
    fn empty_response_content_is_empty() {
        let response = ChatResponse {
            generations: vec![],
            metadata: ResponseMetadata::default(),
        };
        assert_eq!(response.content(), "");
        assert!(response.result().is_none());
    }

    #[test]
    fn blank_finish_reason_is_not_final() {
        assert!(!ChatChunk::finished("x", "").is_final());
        assert!(!ChatChunk::finished("x", "  ").is_final());
        assert!(ChatChunk::finished("", "stop").is_final());
        assert!(!ChatChunk::delta("Hel").is_final());
    }

    #[tokio::test]
    async fn sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ChunkSink::new(tx);
        drop(rx);
        assert!(!sink.push(ChatChunk::delta("lost")).await);
        assert!(sink.is_closed());
    }
}
