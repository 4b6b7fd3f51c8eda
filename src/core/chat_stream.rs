//! The seam between the engine and whatever talks to the model server.
//!
//! The engine never speaks HTTP itself. A [`ChatTransport`] connects to a
//! host and hands back a [`ChatClient`]; the client turns a history into a
//! lazy stream of [`Fragment`]s.

use crate::core::message::{Message, Role};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// One incremental piece of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub role: Role,
    pub content: String,
}

impl Fragment {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::new(self.role, self.content)
    }
}

#[derive(Debug)]
pub enum TransportError {
    /// The model server could not be reached, or the connection dropped.
    Connection(String),

    /// The server answered with an error status or a payload that does not
    /// follow the chat protocol.
    Protocol(String),

    /// Anything else. The engine does not recover from these.
    Fatal(Box<dyn StdError + Send + Sync>),
}

impl TransportError {
    /// Whether an exchange can be abandoned cleanly after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Protocol(_)
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connection(message) => {
                write!(f, "Unable to connect to the model server: {message}")
            }
            TransportError::Protocol(message) => write!(f, "Model server error: {message}"),
            TransportError::Fatal(source) => write!(f, "Unexpected transport failure: {source}"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TransportError::Fatal(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type FragmentStream = BoxStream<'static, Result<Fragment, TransportError>>;

/// A client bound to one model server.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start a streamed chat with `model` over `history`.
    ///
    /// Dropping the returned stream must end the request promptly.
    async fn chat(&self, model: &str, history: &[Message])
        -> Result<FragmentStream, TransportError>;
}

/// Produces clients for a host. `None` means the transport's default host.
pub trait ChatTransport: Send + Sync {
    fn connect(&self, host: Option<&str>) -> Result<Arc<dyn ChatClient>, TransportError>;
}
