//! OpenAI-compatible chat completions over HTTP.
//!
//! Works against any server exposing `POST {base_url}/chat/completions` with
//! the OpenAI request/response shape, including SSE streaming.

use std::time::{Duration, Instant};

use chrono::DateTime;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::sse::{SseDecoder, SseEvent};
use super::{
    ChatChunk, ChatResponse, ChunkSink, EndpointFuture, Generation, ModelEndpoint, RateLimit,
    ResponseMetadata, Usage, normalize_finish_reason,
};
use crate::ChatError;
use crate::config::EndpointConfig;
use crate::message::{Message, MessageRole};
use crate::prompt::{ChatOptions, PromptRequest};

// ── Wire request ───────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(flatten)]
    options: &'a ChatOptions,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: MessageRole,
    content: WireContent<'a>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl<'a> },
}

#[derive(Serialize, Debug)]
struct WireImageUrl<'a> {
    url: &'a str,
}

fn wire_message(message: &Message) -> Result<WireMessage<'_>, ChatError> {
    if message.media().is_empty() {
        return Ok(WireMessage {
            role: message.role(),
            content: WireContent::Text(message.text()),
        });
    }

    let mut parts = Vec::with_capacity(message.media().len() + 1);
    if !message.text().is_empty() {
        parts.push(WirePart::Text {
            text: message.text(),
        });
    }
    for media in message.media() {
        if !media.is_image() {
            return Err(ChatError::invalid_request(format!(
                "unsupported media type '{}' for {}",
                media.mime_type, media.uri
            )));
        }
        parts.push(WirePart::ImageUrl {
            image_url: WireImageUrl { url: &media.uri },
        });
    }
    Ok(WireMessage {
        role: message.role(),
        content: WireContent::Parts(parts),
    })
}

// ── Wire response ──────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    id: Option<String>,
    model: Option<String>,
    created: Option<i64>,
    #[serde(default)]
    choices: Vec<RawChoice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    #[serde(default)]
    index: u32,
    message: Option<RawMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawStreamChunk {
    #[serde(default)]
    choices: Vec<RawStreamChoice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct RawStreamChoice {
    #[serde(default)]
    index: u32,
    delta: Option<RawDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct ApiErrorEnvelope {
    error: ApiError,
}

/// Pull a human-readable message out of an error body, falling back to the
/// body itself.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

fn rate_limit(headers: &HeaderMap) -> RateLimit {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let number = |name: &str| text(name).and_then(|v| v.trim().parse().ok());
    RateLimit {
        requests_limit: number("x-ratelimit-limit-requests"),
        requests_remaining: number("x-ratelimit-remaining-requests"),
        requests_reset: text("x-ratelimit-reset-requests"),
        tokens_limit: number("x-ratelimit-limit-tokens"),
        tokens_remaining: number("x-ratelimit-remaining-tokens"),
        tokens_reset: text("x-ratelimit-reset-tokens"),
    }
}

fn into_chat_response(
    raw: RawChatResponse,
    status: u16,
    rate_limit: RateLimit,
) -> Result<ChatResponse, ChatError> {
    if let Some(err) = raw.error {
        return Err(ChatError::upstream(Some(status), err.message));
    }

    let generations = raw
        .choices
        .into_iter()
        .map(|c| Generation {
            index: c.index,
            message: Message::assistant(c.message.and_then(|m| m.content).unwrap_or_default()),
            finish_reason: normalize_finish_reason(c.finish_reason),
        })
        .collect();

    Ok(ChatResponse {
        generations,
        metadata: ResponseMetadata {
            id: raw.id,
            model: raw.model,
            created: raw.created.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            usage: raw.usage.unwrap_or_default(),
            rate_limit,
        },
    })
}

/// Decode one SSE `data:` payload.
///
/// Returns `Ok(None)` for payloads that carry nothing for the consumer
/// (role-only deltas, other choice indexes) and for undecodable payloads,
/// which are logged and skipped. An `error` object ends the stream.
fn parse_stream_data(data: &str) -> Result<Option<ChatChunk>, ChatError> {
    let raw: RawStreamChunk = match serde_json::from_str(data) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
            return Ok(None);
        }
    };
    if let Some(err) = raw.error {
        return Err(ChatError::upstream(None, err.message));
    }

    let mut chunk = ChatChunk {
        usage: raw.usage,
        ..Default::default()
    };
    if let Some(choice) = raw.choices.into_iter().find(|c| c.index == 0) {
        chunk.text = choice.delta.and_then(|d| d.content).unwrap_or_default();
        chunk.finish_reason = normalize_finish_reason(choice.finish_reason);
    }

    if chunk.text.is_empty() && chunk.finish_reason.is_none() && chunk.usage.is_none() {
        Ok(None)
    } else {
        Ok(Some(chunk))
    }
}

// ── Endpoint ───────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions API.
pub struct OpenAiEndpoint {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl OpenAiEndpoint {
    pub fn new(config: EndpointConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("convo-rs/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(EndpointConfig::from_env()?)
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn wire_request<'a>(
        &'a self,
        request: &'a PromptRequest,
        stream: bool,
    ) -> Result<WireRequest<'a>, ChatError> {
        let messages = request
            .messages()
            .iter()
            .map(wire_message)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WireRequest {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            messages,
            options: &request.options,
            stream,
        })
    }

    async fn post(
        &self,
        body: &WireRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ChatError> {
        debug!(
            "LLM request: model={}, messages={}, stream={}",
            body.model,
            body.messages.len(),
            body.stream
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let mut builder = self
            .client
            .post(self.config.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ChatError::transport(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChatError::upstream(
                Some(status.as_u16()),
                error_message(&text),
            ));
        }
        Ok(resp)
    }

    async fn complete(&self, request: &PromptRequest) -> Result<ChatResponse, ChatError> {
        let body = self.wire_request(request, false)?;
        let start = Instant::now();
        let resp = self.post(&body, Some(self.config.timeout)).await?;

        let status = resp.status().as_u16();
        let limits = rate_limit(resp.headers());
        let text = resp
            .text()
            .await
            .map_err(|e| ChatError::transport(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response: HTTP {status} in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );

        let raw: RawChatResponse = serde_json::from_str(&text).map_err(|e| {
            ChatError::upstream(Some(status), format!("failed to parse response: {e}"))
        })?;
        let response = into_chat_response(raw, status, limits)?;

        let usage = &response.metadata.usage;
        debug!(
            "Token usage: prompt={}, completion={}, total={}; {} generation(s)",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
            response.generations.len()
        );
        Ok(response)
    }

    async fn stream_into(&self, request: &PromptRequest, sink: ChunkSink) -> Result<(), ChatError> {
        let body = self.wire_request(request, true)?;
        // Only the wait for headers is bounded; reads have their own idle limit.
        let first_byte = self.config.stream_idle_timeout.unwrap_or(self.config.timeout);
        let mut resp = tokio::time::timeout(first_byte, self.post(&body, None))
            .await
            .map_err(|_| {
                ChatError::transport(format!("no response headers within {first_byte:?}"))
            })??;
        let mut decoder = SseDecoder::new();
        let mut delivered = 0usize;

        loop {
            let read = match self.config.stream_idle_timeout {
                Some(idle) => tokio::time::timeout(idle, resp.chunk())
                    .await
                    .map_err(|_| {
                        ChatError::transport(format!("stream idle for more than {idle:?}"))
                    })?,
                None => resp.chunk().await,
            };
            let read = read.map_err(|e| {
                ChatError::transport(format!("failed to read streaming chunk: {e}"))
            })?;

            let (events, eof) = match read {
                Some(bytes) => (decoder.push(&bytes), false),
                None => (decoder.finish().into_iter().collect(), true),
            };

            for event in events {
                let data = match event {
                    SseEvent::Done => {
                        debug!("Stream completed with {delivered} chunk(s) ([DONE])");
                        return Ok(());
                    }
                    SseEvent::Data(data) => data,
                };
                let Some(chunk) = parse_stream_data(&data)? else {
                    continue;
                };
                let is_final = chunk.is_final();
                if !sink.push(chunk).await {
                    debug!("Stream consumer went away after {delivered} chunk(s)");
                    return Ok(());
                }
                delivered += 1;
                if is_final {
                    debug!("Stream completed with {delivered} chunk(s)");
                    return Ok(());
                }
            }

            if eof {
                debug!("Stream body ended after {delivered} chunk(s)");
                return Ok(());
            }
        }
    }
}

impl ModelEndpoint for OpenAiEndpoint {
    fn send<'a>(&'a self, request: &'a PromptRequest) -> EndpointFuture<'a, ChatResponse> {
        Box::pin(self.complete(request))
    }

    fn send_stream<'a>(
        &'a self,
        request: &'a PromptRequest,
        sink: ChunkSink,
    ) -> EndpointFuture<'a, ()> {
        Box::pin(self.stream_into(request, sink))
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.config.model)
    }
}
