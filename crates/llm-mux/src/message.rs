//! Neutral conversation model.
//!
//! A [`Messages`] value is the dialect-free conversation that every
//! adapter shapes into its own wire format. It is an ordered sequence
//! of role-tagged turns; the last entry is the most recent. Adapters
//! reject an empty conversation before any network traffic happens.
//!
//! # Output formats
//!
//! Models are often instructed to wrap their answer in a JSON envelope.
//! [`Messages::parse_format`] undoes that on the way out: by default it
//! extracts the `Assistant` field when the response is a JSON object
//! carrying one, and passes everything else through untouched. A custom
//! [`OutputFormat`] hook replaces the default.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, LlmError};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation.
    System,
    /// The human (or calling application).
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// The wire-level role string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who is speaking.
    pub role: Role,
    /// The turn's text content.
    pub content: String,
}

impl Message {
    /// Creates a turn with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Post-processing hook applied to the model's final answer.
///
/// Returns `Ok(Some(bytes))` to replace the content, `Ok(None)` to pass
/// it through, or an error (typically
/// [`OutputFormatNotFound`](ErrorKind::OutputFormatNotFound)) when a
/// declared field is missing.
pub type OutputFormat = Arc<dyn Fn(&[u8]) -> Result<Option<Vec<u8>>, LlmError> + Send + Sync>;

/// An ordered conversation plus its output-format hook.
#[derive(Clone, Default)]
pub struct Messages {
    messages: Vec<Message>,
    format: Option<OutputFormat>,
}

impl Messages {
    /// Creates an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation holding a single user turn.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        let mut m = Self::new();
        m.append_user(prompt);
        m
    }

    /// Appends a system turn.
    pub fn append_system(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::System, content));
    }

    /// Appends a user turn.
    pub fn append_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::User, content));
    }

    /// Appends an assistant turn.
    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::Assistant, content));
    }

    /// The turns in order; the last one is the most recent.
    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no turns.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Removes all turns, keeping the output format.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Installs a custom output-format hook.
    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.format = Some(format);
    }

    /// Builder-style variant of [`set_output_format`](Self::set_output_format).
    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Re-shapes the model's final answer per the conversation's format.
    ///
    /// With a custom hook installed, the hook decides. Otherwise: a JSON
    /// object carrying an `Assistant` field is unwrapped to that field's
    /// text, anything else passes through unchanged.
    pub fn parse_format(&self, response: &[u8]) -> Result<Vec<u8>, LlmError> {
        if let Some(format) = &self.format {
            return match format(response)? {
                Some(out) => Ok(out),
                None => Ok(response.to_vec()),
            };
        }

        let text = String::from_utf8_lossy(response);
        let trimmed = text.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
                if let Some(assistant) = map.get("Assistant") {
                    let out = match assistant {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    return Ok(out.into_bytes());
                }
            }
        }
        Ok(response.to_vec())
    }
}

impl std::fmt::Debug for Messages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messages")
            .field("messages", &self.messages)
            .field("has_format", &self.format.is_some())
            .finish()
    }
}

impl From<&str> for Messages {
    fn from(prompt: &str) -> Self {
        Self::from_prompt(prompt)
    }
}

impl From<String> for Messages {
    fn from(prompt: String) -> Self {
        Self::from_prompt(prompt)
    }
}

impl From<Vec<Message>> for Messages {
    fn from(messages: Vec<Message>) -> Self {
        Self {
            messages,
            format: None,
        }
    }
}

/// Builds an [`OutputFormat`] that extracts one field from a JSON
/// object response.
///
/// Missing field or non-object response yields
/// [`OutputFormatNotFound`](ErrorKind::OutputFormatNotFound).
pub fn json_field_format(field: impl Into<String>) -> OutputFormat {
    let field = field.into();
    Arc::new(move |response: &[u8]| {
        let value: Value = serde_json::from_slice(response).map_err(|_| {
            LlmError::new(
                ErrorKind::OutputFormatNotFound,
                format!("response is not a JSON object, expected field `{field}`"),
            )
        })?;
        match value.get(&field) {
            Some(Value::String(s)) => Ok(Some(s.clone().into_bytes())),
            Some(other) => Ok(Some(other.to_string().into_bytes())),
            None => Err(LlmError::new(
                ErrorKind::OutputFormatNotFound,
                format!("field `{field}` missing from response"),
            )),
        }
    })
}
