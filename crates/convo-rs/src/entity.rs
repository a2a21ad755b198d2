//! Structured results: decode a model reply into a caller-chosen type.
//!
//! A [`Schema<T>`] pairs a JSON Schema with the Rust type it describes. The
//! schema is shown to the model as format instructions and then used to
//! check the reply structurally before `serde` builds the value, so a
//! decode either yields a complete `T` or a [`ChatError::SchemaMismatch`]
//! carrying the raw reply.
//!
//! ```
//! use convo_rs::entity::Schema;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct ActorFilms {
//!     actor: String,
//!     movies: Vec<String>,
//! }
//!
//! let schema = Schema::<ActorFilms>::of();
//! let films = schema
//!     .decode(r#"{"actor": "Tom Hanks", "movies": ["Big", "Cast Away"]}"#)
//!     .unwrap();
//! assert_eq!(films.movies.len(), 2);
//!
//! assert!(schema.decode(r#"{"actor": "Tom Hanks"}"#).is_err());
//! ```

use std::fmt;
use std::marker::PhantomData;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::ChatError;

/// Shape descriptor for a structured result of type `T`.
pub struct Schema<T> {
    name: String,
    schema: Value,
    _target: PhantomData<fn() -> T>,
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            schema: self.schema.clone(),
            _target: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl<T: JsonSchema + DeserializeOwned> Schema<T> {
    /// Derive the descriptor from `T`'s `JsonSchema` implementation.
    pub fn of() -> Self {
        Self {
            name: T::schema_name(),
            schema: crate::json_schema_for::<T>(),
            _target: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Schema<T> {
    /// Use a hand-written JSON Schema. Fails with
    /// [`ChatError::InvalidSchema`] if `schema` is not a valid schema.
    pub fn from_value(name: impl Into<String>, schema: Value) -> Result<Self, ChatError> {
        jsonschema::validator_for(&schema).map_err(|e| ChatError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            schema,
            _target: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Text appended to the user message asking for conforming output.
    pub fn format_instructions(&self) -> String {
        let schema = serde_json::to_string_pretty(&self.schema)
            .unwrap_or_else(|_| self.schema.to_string());
        format!(
            "Your response must be a single JSON value and nothing else: \
             no explanations, no Markdown code fences. \
             It must validate against this JSON Schema:\n{schema}"
        )
    }

    /// Parse, validate and deserialize a model reply.
    pub fn decode(&self, raw: &str) -> Result<T, ChatError> {
        let body = strip_code_fence(raw);
        let value: Value = serde_json::from_str(body)
            .map_err(|e| self.mismatch(format!("invalid JSON: {e}"), raw))?;

        let validator = jsonschema::validator_for(&self.schema)
            .map_err(|e| ChatError::InvalidSchema(e.to_string()))?;
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            debug!("'{}' reply failed validation: {}", self.name, errors.join("; "));
            return Err(self.mismatch(errors.join("; "), raw));
        }

        serde_json::from_value(value).map_err(|e| self.mismatch(e.to_string(), raw))
    }

    fn mismatch(&self, reason: String, raw: &str) -> ChatError {
        ChatError::SchemaMismatch {
            schema: self.name.clone(),
            reason,
            raw: raw.to_string(),
        }
    }
}

/// Drop a surrounding ```` ```json ... ``` ```` fence if the model added one.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some((_lang, body)) = rest.split_once('\n') else {
        return trimmed;
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
