//! The conversational client.
//!
//! A [`ChatClient`] owns its collaborators explicitly: the model endpoint,
//! an optional [`ConversationMemory`], an optional [`RetrievalAugmenter`],
//! and the defaults applied to every prompt. There is no global registry;
//! build one client per configuration and share it behind an `Arc` or a
//! reference.
//!
//! ```no_run
//! use std::sync::Arc;
//! use convo_rs::prelude::*;
//!
//! # async fn demo() -> Result<(), ChatError> {
//! let endpoint = Arc::new(OpenAiEndpoint::from_env()?);
//! let client = ChatClient::builder(endpoint)
//!     .default_system("You are a friendly chat bot that answers questions in the voice of a {voice}")
//!     .default_param("voice", "Pirate")
//!     .memory(Arc::new(InMemoryChatMemory::new()))
//!     .build();
//!
//! let reply = client
//!     .prompt()
//!     .user("My name is andrew, and my job is software engineer")
//!     .conversation_id("andrew")
//!     .content()
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```
//!
//! The flow of one [`prompt`](ChatClient::prompt) call:
//!
//! 1. the last `history_window` messages of the conversation are read from
//!    memory (conversation id `"default"` if none was given), minus any
//!    leading replies whose user message fell outside the window;
//! 2. the user text is augmented with retrieved context, if a retriever is
//!    attached;
//! 3. the system template is rendered and the message list assembled;
//! 4. the request is sent, or streamed;
//! 5. on success the un-augmented user message and the reply are appended to
//!    memory, exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::ChatError;
use crate::config::ClientConfig;
use crate::endpoint::{ChatResponse, ModelEndpoint};
use crate::entity::Schema;
use crate::memory::ConversationMemory;
use crate::message::{MediaRef, Message, MessageRole};
use crate::prompt::{ChatOptions, PromptRequest, PromptTemplate, Turn, build_messages};
use crate::retrieval::RetrievalAugmenter;
use crate::stream::{ChatStream, PendingTurn};

/// Conversation id used by [`PromptSpec`] when memory is attached and no id
/// was given.
pub const DEFAULT_CONVERSATION_ID: &str = "default";

/// Sends prompts to a [`ModelEndpoint`], with optional memory and retrieval.
pub struct ChatClient {
    endpoint: Arc<dyn ModelEndpoint>,
    default_system: Option<PromptTemplate>,
    default_params: HashMap<String, String>,
    default_options: ChatOptions,
    default_model: Option<String>,
    memory: Option<Arc<dyn ConversationMemory>>,
    retrieval: Option<RetrievalAugmenter>,
    config: ClientConfig,
}

/// Builder for [`ChatClient`].
pub struct ChatClientBuilder {
    client: ChatClient,
}

impl ChatClientBuilder {
    /// System template used when a prompt does not set its own.
    pub fn default_system(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.client.default_system = Some(template.into());
        self
    }

    /// Template parameter applied to every prompt. Prompt-level parameters
    /// with the same name win.
    pub fn default_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.client
            .default_params
            .insert(name.into(), value.into());
        self
    }

    pub fn default_options(mut self, options: ChatOptions) -> Self {
        self.client.default_options = options;
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.client.default_model = Some(model.into());
        self
    }

    pub fn memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.client.memory = Some(memory);
        self
    }

    pub fn retrieval(mut self, augmenter: RetrievalAugmenter) -> Self {
        self.client.retrieval = Some(augmenter);
        self
    }

    pub fn history_window(mut self, window: usize) -> Self {
        self.client.config.history_window = window;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.client.config = config;
        self
    }

    pub fn build(self) -> ChatClient {
        self.client
    }
}

impl ChatClient {
    pub fn builder(endpoint: Arc<dyn ModelEndpoint>) -> ChatClientBuilder {
        ChatClientBuilder {
            client: ChatClient {
                endpoint,
                default_system: None,
                default_params: HashMap::new(),
                default_options: ChatOptions::default(),
                default_model: None,
                memory: None,
                retrieval: None,
                config: ClientConfig::default(),
            },
        }
    }

    /// A client with no defaults, memory or retrieval.
    pub fn new(endpoint: Arc<dyn ModelEndpoint>) -> Self {
        Self::builder(endpoint).build()
    }

    pub fn memory(&self) -> Option<&Arc<dyn ConversationMemory>> {
        self.memory.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a fluent prompt.
    pub fn prompt(&self) -> PromptSpec<'_> {
        PromptSpec {
            client: self,
            system: None,
            params: HashMap::new(),
            user: String::new(),
            media: Vec::new(),
            conversation_id: None,
            options: ChatOptions::default(),
            model: None,
        }
    }

    /// Send a request and wait for the whole response.
    ///
    /// Fails with [`ChatError::EmptyResponse`] if the provider returned no
    /// generation. On success the request's [`Turn`], if any, is recorded in
    /// memory together with the first generation.
    pub async fn call(&self, request: PromptRequest) -> Result<ChatResponse, ChatError> {
        let request = self.with_defaults(request);
        debug!(
            "chat call: {} message(s), model={}",
            request.messages().len(),
            self.model_label(&request)
        );

        let response = self.endpoint.send(&request).await?;
        if response.generations.is_empty() {
            warn!("Provider returned no generations");
            return Err(ChatError::EmptyResponse);
        }

        self.remember(request.turn(), response.content());
        Ok(response)
    }

    /// Send a request and consume the reply incrementally.
    ///
    /// Must be called from within a Tokio runtime; the producer runs as a
    /// spawned task.
    pub fn stream(&self, request: PromptRequest) -> Result<ChatStream, ChatError> {
        let request = self.with_defaults(request);
        debug!(
            "chat stream: {} message(s), model={}",
            request.messages().len(),
            self.model_label(&request)
        );

        let pending = match (&self.memory, request.turn()) {
            (Some(memory), Some(turn)) => Some(PendingTurn {
                memory: Arc::clone(memory),
                turn: turn.clone(),
            }),
            _ => None,
        };
        ChatStream::spawn(
            Arc::clone(&self.endpoint),
            request,
            self.config.stream_buffer,
            pending,
        )
    }

    /// Ask for output shaped like `schema` and decode it.
    ///
    /// The schema's format instructions are appended to the last user
    /// message for this call only; memory records the message as written.
    /// The exchange is recorded even if decoding then fails.
    pub async fn entity<T: DeserializeOwned>(
        &self,
        request: PromptRequest,
        schema: &Schema<T>,
    ) -> Result<T, ChatError> {
        let instructions = schema.format_instructions();
        let shaped = request.map_last_user(|text| format!("{text}\n\n{instructions}"));
        let response = self.call(shaped).await?;
        schema.decode(response.content())
    }

    fn with_defaults(&self, mut request: PromptRequest) -> PromptRequest {
        if request.model.is_none() {
            request.model = self.default_model.clone();
        }
        request.options = self.default_options.merge(&request.options);
        request
    }

    fn model_label<'a>(&'a self, request: &'a PromptRequest) -> &'a str {
        request
            .model
            .as_deref()
            .or_else(|| self.endpoint.default_model())
            .unwrap_or("<endpoint default>")
    }

    fn remember(&self, turn: Option<&Turn>, reply: &str) {
        if let (Some(memory), Some(turn)) = (&self.memory, turn) {
            memory.append(
                &turn.conversation_id,
                &[turn.user.clone(), Message::assistant(reply)],
            );
        }
    }
}

/// Fluent description of one prompt, created by [`ChatClient::prompt`].
pub struct PromptSpec<'c> {
    client: &'c ChatClient,
    system: Option<PromptTemplate>,
    params: HashMap<String, String>,
    user: String,
    media: Vec<MediaRef>,
    conversation_id: Option<String>,
    options: ChatOptions,
    model: Option<String>,
}

impl<'c> PromptSpec<'c> {
    /// Replace the client's default system template for this prompt.
    pub fn system(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.system = Some(template.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.user = text.into();
        self
    }

    pub fn media(mut self, media: MediaRef) -> Self {
        self.media.push(media);
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Per-prompt options, overlaid on the client defaults.
    pub fn options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Resolve memory, retrieval and templates into a request.
    pub async fn request(&self) -> Result<PromptRequest, ChatError> {
        let client = self.client;

        let conversation_id = client.memory.as_ref().map(|_| {
            self.conversation_id
                .clone()
                .unwrap_or_else(|| DEFAULT_CONVERSATION_ID.to_string())
        });
        let history = match (&client.memory, &conversation_id) {
            (Some(memory), Some(id)) => {
                replay_window(memory.last(id, client.config.history_window))
            }
            _ => Vec::new(),
        };

        let user_text = match &client.retrieval {
            Some(retrieval) => retrieval.augment(&self.user).await?,
            None => self.user.clone(),
        };

        let mut params = client.default_params.clone();
        params.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        let system = self.system.as_ref().or(client.default_system.as_ref());

        let messages = build_messages(system, &params, &user_text, &self.media, &history)?;
        let turn = conversation_id.map(|conversation_id| Turn {
            conversation_id,
            user: Message::user_with_media(self.user.clone(), self.media.clone()),
        });

        let mut request = PromptRequest::new(messages)?
            .with_options(self.options.clone())
            .with_turn(turn);
        request.model = self.model.clone();
        Ok(request)
    }

    pub async fn call(self) -> Result<ChatResponse, ChatError> {
        let request = self.request().await?;
        self.client.call(request).await
    }

    /// Text of the first generation.
    pub async fn content(self) -> Result<String, ChatError> {
        Ok(self.call().await?.content().to_string())
    }

    pub async fn stream(self) -> Result<ChatStream, ChatError> {
        let request = self.request().await?;
        self.client.stream(request)
    }

    /// Decode the reply into `T`, deriving the schema from `T`.
    pub async fn entity<T: JsonSchema + DeserializeOwned>(self) -> Result<T, ChatError> {
        self.entity_with(&Schema::<T>::of()).await
    }

    pub async fn entity_with<T: DeserializeOwned>(
        self,
        schema: &Schema<T>,
    ) -> Result<T, ChatError> {
        let request = self.request().await?;
        self.client.entity(request, schema).await
    }
}

/// Drop leading replies whose question fell outside the window, so replayed
/// history always opens on a user message.
fn replay_window(mut history: Vec<Message>) -> Vec<Message> {
    let start = history
        .iter()
        .position(|m| m.role() == MessageRole::User)
        .unwrap_or(history.len());
    history.drain(..start);
    history
}
