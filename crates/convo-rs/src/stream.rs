//! Pull-based consumption of a streamed response.
//!
//! [`ChatStream`] is the consumer half of a bounded channel fed by a
//! producer task that drives [`ModelEndpoint::send_stream`]. Items are
//! `Result<ChatChunk, ChatError>`:
//!
//! - the chunk carrying a finish reason is the last item, then `None`;
//! - an endpoint failure is delivered as a single `Err`, then `None`;
//! - a producer that stops without a finish reason is reported as an error
//!   rather than a silent end.
//!
//! Dropping a `ChatStream` aborts its producer, which closes the HTTP
//! response. Nothing needs to be signalled to the provider.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::stream::{FusedStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ChatError;
use crate::endpoint::{ChatChunk, ChunkResult, ChunkSink, ModelEndpoint};
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::prompt::{PromptRequest, Turn};

/// Where a [`ChatStream`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, not yet polled.
    Idle,
    /// Polled, waiting for the first chunk.
    Sending,
    /// At least one chunk delivered, no finish reason yet.
    Receiving,
    /// The finish chunk was delivered.
    Completed,
    /// A terminal error was delivered.
    Failed,
}

/// A turn to record in memory once the stream completes.
pub(crate) struct PendingTurn {
    pub(crate) memory: Arc<dyn ConversationMemory>,
    pub(crate) turn: Turn,
}

/// Lazy sequence of [`ChatChunk`]s from one streamed call.
pub struct ChatStream {
    rx: mpsc::Receiver<ChunkResult>,
    producer: Option<JoinHandle<()>>,
    state: StreamState,
    delivered: usize,
    text: String,
    pending: Option<PendingTurn>,
}

impl ChatStream {
    /// Start a producer task for `request` on the current Tokio runtime.
    pub(crate) fn spawn(
        endpoint: Arc<dyn ModelEndpoint>,
        request: PromptRequest,
        buffer: usize,
        pending: Option<PendingTurn>,
    ) -> Result<Self, ChatError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| ChatError::Config("streaming requires a Tokio runtime".into()))?;
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let producer = handle.spawn(async move {
            let sink = ChunkSink::new(tx);
            if let Err(e) = endpoint.send_stream(&request, sink.clone()).await {
                debug!("Stream producer failed: {e}");
                sink.fail(e).await;
            }
        });

        Ok(Self {
            rx,
            producer: Some(producer),
            state: StreamState::Idle,
            delivered: 0,
            text: String::new(),
            pending,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain the stream and return the concatenated text. Stops at the
    /// first error.
    pub async fn collect_text(mut self) -> Result<String, ChatError> {
        while let Some(chunk) = self.next().await {
            chunk?;
        }
        Ok(std::mem::take(&mut self.text))
    }

    fn complete(&mut self) {
        self.state = StreamState::Completed;
        if let Some(PendingTurn { memory, turn }) = self.pending.take() {
            memory.append(
                &turn.conversation_id,
                &[turn.user, Message::assistant(self.text.clone())],
            );
        }
        debug!("Stream completed after {} chunk(s)", self.delivered);
    }

    fn fail(&mut self, error: ChatError) -> Poll<Option<ChunkResult>> {
        self.state = StreamState::Failed;
        self.pending = None;
        warn!("Stream failed after {} chunk(s): {error}", self.delivered);
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatChunk, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.state {
            StreamState::Completed | StreamState::Failed => return Poll::Ready(None),
            StreamState::Idle => this.state = StreamState::Sending,
            StreamState::Sending | StreamState::Receiving => {}
        }

        match ready!(this.rx.poll_recv(cx)) {
            Some(Ok(chunk)) => {
                this.delivered += 1;
                this.text.push_str(&chunk.text);
                if chunk.is_final() {
                    this.complete();
                } else {
                    this.state = StreamState::Receiving;
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => this.fail(e),
            None if this.delivered == 0 => this.fail(ChatError::EmptyResponse),
            None => this.fail(ChatError::transport(
                "stream ended before a finish reason was received",
            )),
        }
    }
}

impl FusedStream for ChatStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, StreamState::Completed | StreamState::Failed)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{ChatResponse, EndpointFuture};
    use crate::memory::InMemoryChatMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Pushes the scripted chunks, then optionally fails.
    struct Script {
        chunks: Vec<ChatChunk>,
        error: Option<u16>,
    }

    impl ModelEndpoint for Script {
        fn send<'a>(&'a self, _request: &'a PromptRequest) -> EndpointFuture<'a, ChatResponse> {
            Box::pin(async { Err(ChatError::invalid_request("stream only")) })
        }

        fn send_stream<'a>(
            &'a self,
            _request: &'a PromptRequest,
            sink: ChunkSink,
        ) -> EndpointFuture<'a, ()> {
            Box::pin(async move {
                for chunk in &self.chunks {
                    if !sink.push(chunk.clone()).await {
                        return Ok(());
                    }
                }
                match self.error {
                    Some(status) => Err(ChatError::upstream(Some(status), "boom")),
                    None => Ok(()),
                }
            })
        }
    }

    fn start(chunks: Vec<ChatChunk>, error: Option<u16>) -> ChatStream {
        ChatStream::spawn(
            Arc::new(Script { chunks, error }),
            PromptRequest::user("hi"),
            4,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn finish_chunk_is_last() {
        let mut stream = start(
            vec![
                ChatChunk::delta("a"),
                ChatChunk::finished("b", "stop"),
                ChatChunk::delta("never"),
            ],
            None,
        );
        assert_eq!(stream.state(), StreamState::Idle);
        assert_eq!(stream.next().await.unwrap().unwrap().text, "a");
        assert_eq!(stream.state(), StreamState::Receiving);
        assert!(stream.next().await.unwrap().unwrap().is_final());
        assert_eq!(stream.state(), StreamState::Completed);
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
        assert_eq!(stream.text(), "ab");
    }

    #[tokio::test]
    async fn endpoint_error_terminates_stream() {
        let mut stream = start(vec![ChatChunk::delta("partial")], Some(502));
        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ChatError::Upstream {
                status: Some(502),
                ..
            }
        ));
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn silent_end_without_chunks_is_empty_response() {
        let mut stream = start(Vec::new(), None);
        assert!(matches!(
            stream.next().await,
            Some(Err(ChatError::EmptyResponse))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn silent_end_after_chunks_is_error() {
        let result = start(vec![ChatChunk::delta("half")], None)
            .collect_text()
            .await;
        assert!(matches!(result, Err(ChatError::Upstream { status: None, .. })));
    }

    #[tokio::test]
    async fn completion_records_turn_once() {
        let memory = Arc::new(InMemoryChatMemory::new());
        let request = PromptRequest::user("Tell me a joke").with_conversation("c");
        let pending = PendingTurn {
            memory: memory.clone(),
            turn: request.turn().unwrap().clone(),
        };
        let stream = ChatStream::spawn(
            Arc::new(Script {
                chunks: vec![
                    ChatChunk::delta("Why "),
                    ChatChunk::finished("not?", "stop"),
                ],
                error: None,
            }),
            request,
            1,
            Some(pending),
        )
        .unwrap();

        assert_eq!(stream.collect_text().await.unwrap(), "Why not?");
        let log = memory.get("c");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].text(), "Tell me a joke");
        assert_eq!(log[1].text(), "Why not?");
    }

    /// Never finishes on its own.
    struct Endless {
        pushed: Arc<AtomicUsize>,
    }

    impl ModelEndpoint for Endless {
        fn send<'a>(&'a self, _request: &'a PromptRequest) -> EndpointFuture<'a, ChatResponse> {
            Box::pin(async { Err(ChatError::invalid_request("stream only")) })
        }

        fn send_stream<'a>(
            &'a self,
            _request: &'a PromptRequest,
            sink: ChunkSink,
        ) -> EndpointFuture<'a, ()> {
            Box::pin(async move {
                loop {
                    if !sink.push(ChatChunk::delta("x")).await {
                        return Ok(());
                    }
                    self.pushed.fetch_add(1, Ordering::SeqCst);
                }
            })
        }
    }

    #[tokio::test]
    async fn bounded_buffer_applies_backpressure() {
        let pushed = Arc::new(AtomicUsize::new(0));
        let mut stream = ChatStream::spawn(
            Arc::new(Endless {
                pushed: pushed.clone(),
            }),
            PromptRequest::user("hi"),
            2,
            None,
        )
        .unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // One taken by the consumer plus at most a full buffer in flight.
        assert!(pushed.load(Ordering::SeqCst) <= 3);
        drop(stream);
    }

    #[test]
    fn spawn_outside_runtime_is_config_error() {
        let result = ChatStream::spawn(
            Arc::new(Script {
                chunks: Vec::new(),
                error: None,
            }),
            PromptRequest::user("hi"),
            1,
            None,
        );
        assert!(matches!(result, Err(ChatError::Config(_))));
    }
}
