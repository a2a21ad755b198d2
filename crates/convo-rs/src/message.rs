//! Conversation messages and media attachments.
//!
//! A [`Message`] is immutable once created: fields are private and only
//! exposed through accessors. Deriving a variant (for example a user message
//! with extra instructions appended) goes through [`Message::with_text`],
//! which returns a new value.

use serde::{Deserialize, Serialize};

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Reference to a media resource attached to a user message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub mime_type: String,
    pub uri: String,
}

impl MediaRef {
    pub fn new(mime_type: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            uri: uri.into(),
        }
    }

    pub fn image_png(uri: impl Into<String>) -> Self {
        Self::new("image/png", uri)
    }

    /// Build a reference whose MIME type is inferred from the URI's file
    /// extension. Unknown extensions fall back to `application/octet-stream`.
    pub fn guess(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let path = uri.split(['?', '#']).next().unwrap_or(&uri);
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Self::new(mime.essence_str(), uri)
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A single message in a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    role: MessageRole,
    text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    media: Vec<MediaRef>,
}

impl Message {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            media: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn user_with_media(text: impl Into<String>, media: Vec<MediaRef>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
            media,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn media(&self) -> &[MediaRef] {
        &self.media
    }

    /// A copy of this message with different text, same role and media.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            role: self.role,
            text: text.into(),
            media: self.media.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role(), MessageRole::System);
        assert_eq!(sys.text(), "hello");
        assert!(sys.media().is_empty());

        let assistant = Message::assistant("Ok!");
        assert_eq!(assistant.role(), MessageRole::Assistant);

        let img = MediaRef::image_png("https://example.com/a.png");
        let user = Message::user_with_media("what is this?", vec![img.clone()]);
        assert_eq!(user.role(), MessageRole::User);
        assert_eq!(user.media(), &[img]);
    }

    #[test]
    fn with_text_keeps_role_and_media() {
        let user = Message::user_with_media("look", vec![MediaRef::image_png("a.png")]);
        let derived = user.with_text("look closely");
        assert_eq!(derived.role(), MessageRole::User);
        assert_eq!(derived.text(), "look closely");
        assert_eq!(derived.media(), user.media());
        assert_eq!(user.text(), "look");
    }

    #[test]
    fn guess_mime_from_extension() {
        let media = MediaRef::guess("https://docs.example.com/images/multimodal.test.png?v=2");
        assert_eq!(media.mime_type, "image/png");
        assert!(media.is_image());

        let jpeg = MediaRef::guess("photo.jpg");
        assert_eq!(jpeg.mime_type, "image/jpeg");

        let unknown = MediaRef::guess("https://example.com/blob");
        assert_eq!(unknown.mime_type, "application/octet-stream");
        assert!(!unknown.is_image());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("media").is_none());
    }
}
