//! Markdown rendering of a conversation.

use crate::core::config::path_display;
use crate::core::conversation::ConversationData;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Render the history as a Markdown document: a level-one heading per entry
/// naming the role, a blank line, the raw content, then a blank line.
pub fn render(conversation: &ConversationData) -> String {
    let mut document = String::new();
    for message in &conversation.history {
        document.push_str("# ");
        document.push_str(message.role.display_name());
        document.push_str("\n\n");
        document.push_str(&message.content);
        document.push_str("\n\n");
    }
    document
}

/// `path`, with `.md` appended when it has no extension.
pub fn with_default_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("md")
    }
}

#[derive(Debug)]
pub struct ExportError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to save conversation to {}: {}",
            path_display(&self.path),
            self.source
        )
    }
}

impl StdError for ExportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

/// Write the Markdown form of `conversation` to `path` (default extension
/// `.md`) and return the path actually written.
pub fn write_markdown(
    conversation: &ConversationData,
    path: &Path,
) -> Result<PathBuf, ExportError> {
    let path = with_default_extension(path);
    fs::write(&path, render(conversation)).map_err(|source| ExportError {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
