//! Prompt assembly: templates, message ordering, and validated requests.
//!
//! [`PromptBuilder`] turns a system template, its parameters, the user text,
//! attached media and prior conversation turns into the ordered message list
//! sent to the model:
//!
//! ```text
//! [system (if any)] + history (as-is) + [user message with media]
//! ```
//!
//! [`PromptRequest`] wraps that list together with model selection and
//! sampling options, and enforces the one invariant the model endpoint
//! relies on: at most one system message, and only in first position.

pub mod template;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ChatError;
use crate::message::{MediaRef, Message, MessageRole};

pub use template::PromptTemplate;

/// Builder for the ordered message list of one request.
///
/// Borrows everything and never mutates its inputs; [`build`](Self::build)
/// can be called repeatedly with the same result.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use convo_rs::message::{Message, MessageRole};
/// use convo_rs::prompt::{PromptBuilder, PromptTemplate};
///
/// let system = PromptTemplate::new("Speak like a {voice}.");
/// let params = HashMap::from([("voice".to_string(), "pirate".to_string())]);
/// let history = vec![Message::user("Hi"), Message::assistant("Ahoy!")];
///
/// let messages = PromptBuilder::new("Where is the treasure?")
///     .system(&system)
///     .params(&params)
///     .history(&history)
///     .build()
///     .unwrap();
///
/// assert_eq!(messages.len(), 4);
/// assert_eq!(messages[0].text(), "Speak like a pirate.");
/// assert_eq!(messages[3].role(), MessageRole::User);
/// ```
pub struct PromptBuilder<'a> {
    system: Option<&'a PromptTemplate>,
    params: Option<&'a HashMap<String, String>>,
    user_text: &'a str,
    media: &'a [MediaRef],
    history: &'a [Message],
}

impl<'a> PromptBuilder<'a> {
    pub fn new(user_text: &'a str) -> Self {
        Self {
            system: None,
            params: None,
            user_text,
            media: &[],
            history: &[],
        }
    }

    pub fn system(mut self, template: &'a PromptTemplate) -> Self {
        self.system = Some(template);
        self
    }

    /// Set the system template only if one is given.
    pub fn system_opt(mut self, template: Option<&'a PromptTemplate>) -> Self {
        self.system = template;
        self
    }

    pub fn params(mut self, params: &'a HashMap<String, String>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn media(mut self, media: &'a [MediaRef]) -> Self {
        self.media = media;
        self
    }

    pub fn history(mut self, history: &'a [Message]) -> Self {
        self.history = history;
        self
    }

    pub fn build(&self) -> Result<Vec<Message>, ChatError> {
        let empty = HashMap::new();
        build_messages(
            self.system,
            self.params.unwrap_or(&empty),
            self.user_text,
            self.media,
            self.history,
        )
    }
}

/// Assemble `[system?] + prior + [user]`.
///
/// The system template, when present, is rendered with `params`; a
/// placeholder without a parameter fails with
/// [`ChatError::MissingParameter`].
pub fn build_messages(
    system_template: Option<&PromptTemplate>,
    params: &HashMap<String, String>,
    user_text: &str,
    media: &[MediaRef],
    prior: &[Message],
) -> Result<Vec<Message>, ChatError> {
    let mut messages = Vec::with_capacity(prior.len() + 2);
    if let Some(template) = system_template {
        messages.push(Message::system(template.render(params)?));
    }
    messages.extend(prior.iter().cloned());
    messages.push(Message::user_with_media(user_text, media.to_vec()));
    Ok(messages)
}

// ── Options ────────────────────────────────────────────────────────

/// Free-form sampling options. Unset fields are left to the provider.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Number of generations to request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Overlay `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(&self, overrides: &ChatOptions) -> ChatOptions {
        ChatOptions {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            stop: overrides.stop.clone().or_else(|| self.stop.clone()),
            seed: overrides.seed.or(self.seed),
            n: overrides.n.or(self.n),
        }
    }
}

// ── Request ────────────────────────────────────────────────────────

/// The conversation turn a request belongs to: which memory slot to update
/// and which user message to record there once the call succeeds.
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub conversation_id: String,
    pub user: Message,
}

/// A validated request for one model call. Built fresh per call.
#[derive(Clone, Debug)]
pub struct PromptRequest {
    messages: Vec<Message>,
    pub model: Option<String>,
    pub options: ChatOptions,
    turn: Option<Turn>,
}

impl PromptRequest {
    /// Validate and wrap a message list.
    ///
    /// Fails with [`ChatError::InvalidRequest`] when the list is empty or a
    /// system message appears anywhere but first, or more than once.
    pub fn new(messages: Vec<Message>) -> Result<Self, ChatError> {
        if messages.is_empty() {
            return Err(ChatError::invalid_request("no messages"));
        }
        let misplaced = messages
            .iter()
            .skip(1)
            .any(|m| m.role() == MessageRole::System);
        if misplaced {
            return Err(ChatError::invalid_request(
                "a system message may only appear once, as the first message",
            ));
        }
        Ok(Self {
            messages,
            model: None,
            options: ChatOptions::default(),
            turn: None,
        })
    }

    /// Single user message, no system prompt.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            model: None,
            options: ChatOptions::default(),
            turn: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach the request to a conversation. The last user message is the
    /// one recorded in memory after a successful call.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        if let Some(user) = self.last_user().cloned() {
            self.turn = Some(Turn {
                conversation_id: conversation_id.into(),
                user,
            });
        }
        self
    }

    pub(crate) fn with_turn(mut self, turn: Option<Turn>) -> Self {
        self.turn = turn;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    pub fn last_user(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role() == MessageRole::User)
    }

    /// A copy with the last user message's text replaced. The recorded
    /// [`Turn`] keeps the original message.
    pub(crate) fn map_last_user(&self, f: impl FnOnce(&str) -> String) -> Self {
        let mut messages = self.messages.clone();
        if let Some(last) = messages
            .iter_mut()
            .rev()
            .find(|m| m.role() == MessageRole::User)
        {
            *last = last.with_text(f(last.text()));
        }
        Self {
            messages,
            model: self.model.clone(),
            options: self.options.clone(),
            turn: self.turn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn user_message_last_with_media() {
        let media = vec![
            MediaRef::image_png("https://example.com/a.png"),
            MediaRef::new("image/jpeg", "https://example.com/b.jpg"),
        ];
        let prior = vec![Message::user("earlier"), Message::assistant("reply")];
        let messages = build_messages(None, &HashMap::new(), "now", &media, &prior).unwrap();

        assert_eq!(messages.len(), 3);
        let last = messages.last().unwrap();
        assert_eq!(last.role(), MessageRole::User);
        assert_eq!(last.text(), "now");
        assert_eq!(last.media(), media.as_slice());
    }

    #[test]
    fn system_first_then_history_as_is() {
        let template = PromptTemplate::new("You answer in the voice of a {voice}");
        let prior = vec![
            Message::user("My name is andrew, and my job is software engineer"),
            Message::assistant("Ok!"),
        ];
        let p = params(&[("voice", "Wise Old Sage")]);
        let messages = PromptBuilder::new("Do you know my name and job?")
            .system(&template)
            .params(&p)
            .history(&prior)
            .build()
            .unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role(), MessageRole::System);
        assert_eq!(
            messages[0].text(),
            "You answer in the voice of a Wise Old Sage"
        );
        assert_eq!(&messages[1..3], prior.as_slice());
        assert_eq!(messages[3].text(), "Do you know my name and job?");
    }

    #[test]
    fn missing_parameter_propagates() {
        let template = PromptTemplate::new("voice of a {voice}");
        let err = PromptBuilder::new("hi").system(&template).build().unwrap_err();
        assert!(matches!(err, ChatError::MissingParameter { ref name } if name == "voice"));
    }

    #[test]
    fn builder_does_not_mutate_inputs() {
        let prior = vec![Message::user("a")];
        let builder = PromptBuilder::new("b").history(&prior);
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first, second);
        assert_eq!(prior.len(), 1);
    }

    #[test]
    fn request_rejects_misplaced_system() {
        let err = PromptRequest::new(vec![Message::user("hi"), Message::system("late")]);
        assert!(matches!(err, Err(ChatError::InvalidRequest(_))));

        let err = PromptRequest::new(vec![
            Message::system("one"),
            Message::system("two"),
            Message::user("hi"),
        ]);
        assert!(matches!(err, Err(ChatError::InvalidRequest(_))));

        assert!(matches!(
            PromptRequest::new(Vec::new()),
            Err(ChatError::InvalidRequest(_))
        ));
    }

    #[test]
    fn request_accepts_leading_system() {
        let req = PromptRequest::new(vec![Message::system("sys"), Message::user("hi")])
            .unwrap()
            .with_model("gpt-4o")
            .with_conversation("c-1");
        assert_eq!(req.model.as_deref(), Some("gpt-4o"));
        let turn = req.turn().unwrap();
        assert_eq!(turn.conversation_id, "c-1");
        assert_eq!(turn.user.text(), "hi");
    }

    #[test]
    fn map_last_user_keeps_turn_original() {
        let req = PromptRequest::user("question").with_conversation("c");
        let mapped = req.map_last_user(|t| format!("{t}\n\nextra"));
        assert_eq!(mapped.messages()[0].text(), "question\n\nextra");
        assert_eq!(mapped.turn().unwrap().user.text(), "question");
        assert_eq!(req.messages()[0].text(), "question");
    }

    #[test]
    fn options_merge_prefers_overrides() {
        let defaults = ChatOptions::default()
            .with_temperature(0.7)
            .with_max_tokens(512);
        let overrides = ChatOptions::default().with_temperature(0.4);
        let merged = defaults.merge(&overrides);
        assert_eq!(merged.temperature, Some(0.4));
        assert_eq!(merged.max_tokens, Some(512));
    }
}
