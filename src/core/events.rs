use tokio::sync::mpsc;

/// Severity for notices shown by the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    /// Informational message (e.g., command results).
    Info,

    /// Something the user asked for did not work.
    Error,
}

/// What the engine tells the presentation layer.
///
/// Turn events carry the stream id of the exchange they belong to, so a
/// listener can ignore anything from an exchange that was already replaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new turn began; show the user's text and an empty reply.
    TurnStarted { stream_id: u64, user_input: String },

    /// More reply text arrived. `reply` is the whole reply so far.
    TurnUpdated {
        stream_id: u64,
        fragment: String,
        reply: String,
    },

    /// The reply finished. `saved` is false when writing the conversation
    /// failed; an error notice was sent as well.
    TurnCommitted { stream_id: u64, saved: bool },

    /// The exchange failed; drop the partial reply and show `reason`.
    TurnAbandoned { stream_id: u64, reason: String },

    /// The transport failed in a way the engine does not recover from. The
    /// turn is dead and `ChatSession::wait_for_exchange` returns the error.
    TurnFailed { stream_id: u64, reason: String },

    /// The turn is over, whatever the outcome; remove its loading indicator.
    PendingCleared { stream_id: u64 },

    /// Result of a command, or a problem worth reporting.
    Notice { kind: NoticeKind, text: String },

    /// The conversation was reset; clear the displayed history.
    Cleared,
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn notice(tx: &EventSender, kind: NoticeKind, text: impl Into<String>) {
    let _ = tx.send(SessionEvent::Notice {
        kind,
        text: text.into(),
    });
}
