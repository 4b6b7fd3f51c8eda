//! Parley is the engine behind a terminal conversation with a local LLM chat
//! server.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation, its JSON store, the streaming exchange
//!   and the session that keeps at most one exchange in flight.
//! - [`commands`] implements slash-directive parsing and execution and
//!   forwards everything else to the session as a chat turn.
//! - [`logging`] installs a `tracing` subscriber for embedding binaries.
//!
//! The engine never reads the terminal or speaks HTTP. A presentation layer
//! feeds input to [`commands::process_input`] and renders the
//! [`core::events::SessionEvent`]s it receives; the model server is reached
//! through a [`core::chat_stream::ChatTransport`] implementation.

pub mod commands;
pub mod core;
pub mod logging;
pub mod utils;

pub use crate::commands::{complete_save, process_input, CommandResult};
pub use crate::core::chat_stream::{ChatClient, ChatTransport, Fragment, TransportError};
pub use crate::core::config::Config;
pub use crate::core::conversation::ConversationData;
pub use crate::core::events::{NoticeKind, SessionEvent};
pub use crate::core::session::ChatSession;
pub use crate::core::store::ConversationStore;
