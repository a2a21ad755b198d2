//! Configuration for the HTTP endpoint and the chat client.
//!
//! Both configs have working defaults and `with_*` builder methods:
//!
//! ```
//! use std::time::Duration;
//! use convo_rs::config::{ClientConfig, EndpointConfig};
//!
//! let endpoint = EndpointConfig::new("sk-test")
//!     .with_model("gpt-4o")
//!     .with_timeout(Duration::from_secs(30));
//! assert_eq!(endpoint.model, "gpt-4o");
//!
//! let client = ClientConfig::default().with_history_window(20);
//! assert_eq!(client.history_window, 20);
//! ```

use std::time::Duration;

use crate::{ChatError, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable overriding the base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
/// Environment variable overriding the default model.
pub const MODEL_ENV: &str = "OPENAI_MODEL";

/// Settings for [`OpenAiEndpoint`](crate::endpoint::openai::OpenAiEndpoint)
/// and [`OpenAiEmbedder`](crate::vector::openai::OpenAiEmbedder).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub api_key: String,
    /// API root, without the trailing `/chat/completions`.
    pub base_url: String,
    /// Model used when a request does not name one.
    pub model: String,
    /// Upper bound for a whole non-streamed call.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest silence tolerated before the headers and between two reads of
    /// a streamed response. `None` waits forever between reads; the headers
    /// are then bounded by `timeout`.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl EndpointConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Read `OPENAI_API_KEY` (required), `OPENAI_BASE_URL` and
    /// `OPENAI_MODEL` from the environment.
    pub fn from_env() -> Result<Self, ChatError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ChatError::Config(format!("{API_KEY_ENV} is not set")))?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var(MODEL_ENV)
            && !model.trim().is_empty()
        {
            config.model = model;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Join a path onto the base URL without doubling slashes.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Settings for [`ChatClient`](crate::client::ChatClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the chunk channel between a stream's producer task and
    /// its consumer. A full channel pauses the producer.
    pub stream_buffer: usize,
    /// How many prior messages of a conversation are replayed into each
    /// prompt when memory is attached.
    pub history_window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream_buffer: 32,
            history_window: 100,
        }
    }
}

impl ClientConfig {
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }
}
