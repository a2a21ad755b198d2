//! `{name}` placeholder templates for system prompts.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::ChatError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("placeholder pattern is valid")
});

/// A prompt template with `{name}` placeholders.
///
/// Only braces enclosing an identifier form a placeholder, so literal JSON
/// such as `{"a": 1}` passes through untouched.
///
/// ```
/// use std::collections::HashMap;
/// use convo_rs::prompt::PromptTemplate;
///
/// let template = PromptTemplate::new("Answer in the voice of a {voice}.");
/// let params = HashMap::from([("voice".to_string(), "Wise Old Sage".to_string())]);
/// assert_eq!(template.render(&params).unwrap(), "Answer in the voice of a Wise Old Sage.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&self.source) {
            if let Some(m) = caps.get(1)
                && !names.contains(&m.as_str())
            {
                names.push(m.as_str());
            }
        }
        names
    }

    /// Substitute every placeholder from `params` in a single pass.
    ///
    /// Substituted values are not scanned again. Fails with
    /// [`ChatError::MissingParameter`] naming the first placeholder that has
    /// no parameter; extra parameters are ignored.
    pub fn render(&self, params: &HashMap<String, String>) -> Result<String, ChatError> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !params.contains_key(*name))
        {
            return Err(ChatError::MissingParameter {
                name: missing.to_string(),
            });
        }

        let rendered = PLACEHOLDER.replace_all(&self.source, |caps: &Captures<'_>| {
            params
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(rendered.into_owned())
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for PromptTemplate {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}
