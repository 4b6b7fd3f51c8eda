//! Slash directives typed into the conversation input.

mod registry;

pub use registry::{all_commands, find_command, Command, CommandInvocation};

use crate::core::config::path_display;
use crate::core::events::NoticeKind;
use crate::core::session::ChatSession;
use chrono::Local;
use registry::CommandFuture;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandResult {
    Continue,
    ProcessAsMessage(String),
    /// Ask the user where to save the Markdown export, then call
    /// [`complete_save`].
    PromptSavePath {
        suggested: String,
    },
    Quit,
}

/// Run `input` as a directive, or submit it as a chat turn.
pub async fn process_input(session: &mut ChatSession, input: &str) -> CommandResult {
    match execute_directive(session, input).await {
        CommandResult::ProcessAsMessage(message) => {
            session.submit(&message).await;
            CommandResult::Continue
        }
        other => other,
    }
}

/// Execute `input` if it is a directive. Anything else comes back as
/// [`CommandResult::ProcessAsMessage`] untouched.
pub async fn execute_directive(session: &mut ChatSession, input: &str) -> CommandResult {
    let trimmed = input.trim();
    let Some(directive) = trimmed.strip_prefix('/') else {
        return CommandResult::ProcessAsMessage(input.to_string());
    };

    let mut tokens: Vec<String> = directive
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return CommandResult::ProcessAsMessage(input.to_string());
    }
    let name = tokens.remove(0);

    match registry::find_command(&name, tokens.len()) {
        Some(command) => {
            debug!(command = command.name, args = tokens.len(), "Running command");
            let invocation = CommandInvocation {
                input: trimmed,
                args: &tokens,
            };
            (command.handler)(session, invocation).await
        }
        None => {
            session.notify(NoticeKind::Error, format!("Unknown command: {trimmed}"));
            CommandResult::Continue
        }
    }
}

/// Finish a `/save` once the presentation has a destination.
///
/// Reports the outcome as a notice and returns the path written.
pub fn complete_save(session: &ChatSession, path: &Path) -> Option<PathBuf> {
    match session.export_markdown(path) {
        Ok(written) => {
            session.notify(
                NoticeKind::Info,
                format!("Saved: {}", path_display(&written)),
            );
            Some(written)
        }
        Err(err) => {
            session.notify(NoticeKind::Error, err.to_string());
            None
        }
    }
}

/// File name offered when saving, stamped with today's local date.
pub fn suggested_save_name() -> String {
    format!("conversation-{}.md", Local::now().format("%Y-%m-%d"))
}

pub fn help_text() -> String {
    let mut text = String::from("Commands:");
    for command in all_commands() {
        text.push_str(&format!("\n  {:<16} {}", command.usage, command.help));
    }
    text
}

pub(super) fn handle_new<'a>(
    session: &'a mut ChatSession,
    _invocation: CommandInvocation<'a>,
) -> CommandFuture<'a> {
    Box::pin(async move {
        session.reset().await;
        CommandResult::Continue
    })
}

pub(super) fn handle_save<'a>(
    _session: &'a mut ChatSession,
    _invocation: CommandInvocation<'a>,
) -> CommandFuture<'a> {
    Box::pin(async move {
        CommandResult::PromptSavePath {
            suggested: suggested_save_name(),
        }
    })
}

pub(super) fn handle_host<'a>(
    session: &'a mut ChatSession,
    invocation: CommandInvocation<'a>,
) -> CommandFuture<'a> {
    Box::pin(async move {
        match invocation.arg(0) {
            Some(host) => {
                session.cancel_current_exchange().await;
                session.set_host(host);
                session.notify(NoticeKind::Info, format!("Host set to {host}"));
            }
            None => {
                let host = session.host();
                let shown = if host.is_empty() { "default" } else { host.as_str() };
                session.notify(NoticeKind::Info, format!("Host: {shown}"));
            }
        }
        CommandResult::Continue
    })
}

pub(super) fn handle_help<'a>(
    session: &'a mut ChatSession,
    _invocation: CommandInvocation<'a>,
) -> CommandFuture<'a> {
    Box::pin(async move {
        session.notify(NoticeKind::Info, help_text());
        CommandResult::Continue
    })
}

pub(super) fn handle_quit<'a>(
    session: &'a mut ChatSession,
    _invocation: CommandInvocation<'a>,
) -> CommandFuture<'a> {
    Box::pin(async move {
        session.cancel_current_exchange().await;
        CommandResult::Quit
    })
}
