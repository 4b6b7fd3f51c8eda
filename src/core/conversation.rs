//! In-memory conversation transcript and its JSON document form.

use crate::core::message::Message;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;

pub const DEFAULT_TITLE: &str = "Untitled";

/// Details and history of a conversation.
///
/// This is the single source of truth for the session: the persisted file and
/// every rendered form are derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationData {
    pub title: String,
    pub model: String,
    /// Address of the model server. Empty means the transport's default host.
    pub host: String,
    pub history: Vec<Message>,
}

/// The persisted conversation document could not be decoded.
#[derive(Debug)]
pub struct DecodeError {
    source: serde_json::Error,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to decode conversation: {}", self.source)
    }
}

impl StdError for DecodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

// Every key is optional on the way in so older documents (for example ones
// written before `host` existed) still load.
#[derive(Deserialize)]
struct ConversationDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    history: Option<Vec<Message>>,
    #[serde(default)]
    host: Option<String>,
}

impl ConversationData {
    /// A fresh, empty conversation talking to `model` on the default host.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            model: model.into(),
            host: String::new(),
            history: Vec::new(),
        }
    }

    /// Record `message` in the history.
    ///
    /// When the last entry has the same role the content is appended to that
    /// entry instead of starting a new one; this is how streamed fragments
    /// collapse into a single assistant turn.
    pub fn record(&mut self, message: Message) -> &mut Self {
        match self.history.last_mut() {
            Some(last) if last.role == message.role => last.content.push_str(&message.content),
            _ => self.history.push(message),
        }
        self
    }

    /// The configured host, or `None` when the default host should be used.
    pub fn host(&self) -> Option<&str> {
        if self.host.is_empty() {
            None
        } else {
            Some(self.host.as_str())
        }
    }

    /// Decode a persisted conversation document.
    ///
    /// Missing keys (and explicit `null`s) take their defaults, with
    /// `default_model` standing in for an absent model. Unknown keys are
    /// ignored. The document must be a JSON object.
    pub fn load(bytes: &[u8], default_model: &str) -> Result<Self, DecodeError> {
        // Derived struct deserializers also accept positional arrays.
        let object: Map<String, Value> =
            serde_json::from_slice(bytes).map_err(|source| DecodeError { source })?;
        let document: ConversationDocument = serde_json::from_value(Value::Object(object))
            .map_err(|source| DecodeError { source })?;
        Ok(Self {
            title: document
                .title
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            model: document.model.unwrap_or_else(|| default_model.to_string()),
            host: document.host.unwrap_or_default(),
            history: document.history.unwrap_or_default(),
        })
    }

    /// Encode the conversation as a pretty-printed JSON document.
    pub fn save(&self) -> Vec<u8> {
        let history = self
            .history
            .iter()
            .map(|message| {
                let mut entry = Map::new();
                entry.insert("role".into(), Value::from(message.role.as_str()));
                entry.insert("content".into(), Value::from(message.content.as_str()));
                Value::Object(entry)
            })
            .collect();

        let mut document = Map::new();
        document.insert("title".into(), Value::from(self.title.as_str()));
        document.insert("model".into(), Value::from(self.model.as_str()));
        document.insert("history".into(), Value::Array(history));
        document.insert("host".into(), Value::from(self.host.as_str()));

        // The alternate form of `Value`'s Display is pretty-printed JSON and
        // cannot fail.
        format!("{:#}", Value::Object(document)).into_bytes()
    }
}
