//! File-backed persistence for the active conversation.
//!
//! One conversation lives at one well-known path. No locking is performed:
//! a single process is assumed to own the file.

use crate::core::config::{conversations_dir, path_display, ConfigError};
use crate::core::conversation::{ConversationData, DecodeError};
use crate::utils::fs::write_atomically;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONVERSATION_FILE: &str = "conversation.json";

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: io::Error },
    Decode { path: PathBuf, source: DecodeError },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "Conversation file {}: {}", path_display(path), source)
            }
            StoreError::Decode { path, source } => {
                write!(f, "Conversation file {}: {}", path_display(path), source)
            }
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Decode { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    path: PathBuf,
}

impl ConversationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at the application's standard location.
    pub fn open_default() -> Result<Self, ConfigError> {
        Ok(Self::new(conversations_dir()?.join(CONVERSATION_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored conversation.
    ///
    /// A missing file is a fresh conversation on `default_model`. A file that
    /// exists but does not decode is an error; callers treat that as fatal
    /// rather than discarding the user's transcript.
    pub fn read(&self, default_model: &str) -> Result<ConversationData, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved conversation; starting fresh");
                return Ok(ConversationData::new(default_model));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        ConversationData::load(&bytes, default_model).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    pub fn write(&self, conversation: &ConversationData) -> Result<(), StoreError> {
        write_atomically(&self.path, &conversation.save()).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            path = %self.path.display(),
            messages = conversation.history.len(),
            "Saved conversation"
        );
        Ok(())
    }
}
