//! One user-turn → assistant-turn exchange.
//!
//! An exchange runs as its own task: it asks the client for a fragment
//! stream, records each non-empty fragment into the shared conversation and
//! reports progress as [`SessionEvent`]s. It ends committed when the stream
//! finishes, abandoned on a connection or protocol failure, and cancelled
//! when a newer exchange or a reset replaces it. Any other transport failure
//! is returned as an [`ExchangeError`] after a `TurnFailed` event.

use crate::core::chat_stream::{ChatClient, TransportError};
use crate::core::conversation::ConversationData;
use crate::core::events::{self, EventSender, NoticeKind, SessionEvent};
use crate::core::message::Message;
use crate::core::store::ConversationStore;
use futures_util::StreamExt;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type SharedConversation = Arc<Mutex<ConversationData>>;

pub(crate) fn lock_conversation(conversation: &SharedConversation) -> MutexGuard<'_, ConversationData> {
    conversation.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The stream finished. `saved` is false when persisting failed; the
    /// failure was reported as a notice.
    Committed { saved: bool },
    Abandoned { reason: String },
    Cancelled,
}

/// Failures an exchange does not recover from.
#[derive(Debug)]
pub enum ExchangeError {
    /// The transport failed in a way that is neither a connection nor a
    /// protocol problem.
    Fatal(TransportError),

    /// The exchange task panicked.
    Join(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Fatal(source) => write!(f, "{source}"),
            ExchangeError::Join(message) => write!(f, "Exchange task failed: {message}"),
        }
    }
}

impl StdError for ExchangeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExchangeError::Fatal(source) => Some(source),
            ExchangeError::Join(_) => None,
        }
    }
}

/// The transient side of an exchange: the reply built so far and the
/// pending marker shown while it runs.
///
/// Dropping it clears the pending marker, so the marker goes away exactly
/// once on every path out of the exchange, including task cancellation.
pub struct Interaction {
    stream_id: u64,
    events: EventSender,
    reply: String,
}

impl Interaction {
    pub(crate) fn begin(stream_id: u64, user_input: &str, events: EventSender) -> Self {
        let _ = events.send(SessionEvent::TurnStarted {
            stream_id,
            user_input: user_input.to_string(),
        });
        Self {
            stream_id,
            events,
            reply: String::new(),
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn reply(&self) -> &str {
        &self.reply
    }

    fn update_response(&mut self, fragment: &str) {
        self.reply.push_str(fragment);
        let _ = self.events.send(SessionEvent::TurnUpdated {
            stream_id: self.stream_id,
            fragment: fragment.to_string(),
            reply: self.reply.clone(),
        });
    }

    fn commit(&self, saved: bool) {
        let _ = self.events.send(SessionEvent::TurnCommitted {
            stream_id: self.stream_id,
            saved,
        });
    }

    fn abandon(&self, reason: &str) {
        let _ = self.events.send(SessionEvent::TurnAbandoned {
            stream_id: self.stream_id,
            reason: reason.to_string(),
        });
    }

    fn report_failure(&self, reason: &str) {
        let _ = self.events.send(SessionEvent::TurnFailed {
            stream_id: self.stream_id,
            reason: reason.to_string(),
        });
    }
}

impl Drop for Interaction {
    fn drop(&mut self) {
        let _ = self.events.send(SessionEvent::PendingCleared {
            stream_id: self.stream_id,
        });
    }
}

pub(crate) struct ExchangeParams {
    pub client: Result<Arc<dyn ChatClient>, TransportError>,
    pub model: String,
    pub history: Vec<Message>,
    pub conversation: SharedConversation,
    pub store: ConversationStore,
    pub cancel_token: CancellationToken,
}

pub(crate) async fn run_exchange(
    mut interaction: Interaction,
    params: ExchangeParams,
) -> Result<ExchangeOutcome, ExchangeError> {
    let ExchangeParams {
        client,
        model,
        history,
        conversation,
        store,
        cancel_token,
    } = params;
    let stream_id = interaction.stream_id();

    let client = match client {
        Ok(client) => client,
        Err(err) => return fail(&interaction, err),
    };

    let started = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return Ok(cancelled(&interaction)),
        started = client.chat(&model, &history) => started,
    };
    let mut stream = match started {
        Ok(stream) => stream,
        Err(err) => return fail(&interaction, err),
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Ok(cancelled(&interaction)),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                if fragment.content.is_empty() {
                    continue;
                }
                let mut conversation = lock_conversation(&conversation);
                // A reset or a newer exchange may have cancelled us while the
                // fragment was in flight; it must not land in the history.
                if cancel_token.is_cancelled() {
                    drop(conversation);
                    return Ok(cancelled(&interaction));
                }
                let content = fragment.content.clone();
                conversation.record(fragment.into_message());
                interaction.update_response(&content);
            }
            Some(Err(err)) => return fail(&interaction, err),
            None => break,
        }
    }

    let snapshot = {
        let conversation = lock_conversation(&conversation);
        if cancel_token.is_cancelled() {
            drop(conversation);
            return Ok(cancelled(&interaction));
        }
        conversation.clone()
    };

    let saved = match store.write(&snapshot) {
        Ok(()) => true,
        Err(err) => {
            warn!(stream_id, error = %err, "Failed to persist conversation");
            events::notice(&interaction.events, NoticeKind::Error, err.to_string());
            false
        }
    };

    info!(
        stream_id,
        reply_len = interaction.reply().len(),
        saved,
        "Exchange committed"
    );
    interaction.commit(saved);
    Ok(ExchangeOutcome::Committed { saved })
}

fn cancelled(interaction: &Interaction) -> ExchangeOutcome {
    debug!(stream_id = interaction.stream_id(), "Exchange cancelled");
    ExchangeOutcome::Cancelled
}

fn fail(interaction: &Interaction, err: TransportError) -> Result<ExchangeOutcome, ExchangeError> {
    if !err.is_recoverable() {
        warn!(stream_id = interaction.stream_id(), error = %err, "Exchange failed");
        interaction.report_failure(&err.to_string());
        return Err(ExchangeError::Fatal(err));
    }

    let reason = err.to_string();
    warn!(stream_id = interaction.stream_id(), %reason, "Exchange abandoned");
    interaction.abandon(&reason);
    Ok(ExchangeOutcome::Abandoned { reason })
}
