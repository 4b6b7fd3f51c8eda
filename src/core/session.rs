//! The conversation session: owns the conversation, the store, the transport
//! and the single in-flight exchange.

use crate::core::chat_stream::{ChatClient, ChatTransport, TransportError};
use crate::core::config::Config;
use crate::core::conversation::ConversationData;
use crate::core::events::{self, EventSender, NoticeKind, SessionEvent};
use crate::core::export::{self, ExportError};
use crate::core::interaction::{
    lock_conversation, run_exchange, ExchangeError, ExchangeOutcome, ExchangeParams, Interaction,
    SharedConversation,
};
use crate::core::message::Message;
use crate::core::store::{ConversationStore, StoreError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ActiveExchange {
    stream_id: u64,
    cancel_token: CancellationToken,
    handle: JoinHandle<Result<ExchangeOutcome, ExchangeError>>,
}

/// A single conversation and the machinery to talk about it.
///
/// At most one exchange runs at a time. Starting another one, or resetting
/// the conversation, cancels and joins the running exchange first, so the
/// exchange task and the session never mutate the conversation at the same
/// time.
pub struct ChatSession {
    config: Config,
    conversation: SharedConversation,
    store: ConversationStore,
    transport: Arc<dyn ChatTransport>,
    client: Option<Arc<dyn ChatClient>>,
    events: EventSender,
    current_stream_id: u64,
    active: Option<ActiveExchange>,
}

impl ChatSession {
    /// A session on a fresh conversation using the configured default model.
    pub fn new(
        config: Config,
        store: ConversationStore,
        transport: Arc<dyn ChatTransport>,
        events: EventSender,
    ) -> Self {
        let conversation = ConversationData::new(config.default_model());
        Self::from_parts(config, store, conversation, transport, events)
    }

    /// A session resuming whatever `store` holds.
    ///
    /// A stored conversation that fails to decode is returned as an error
    /// instead of being replaced.
    pub fn open(
        config: Config,
        store: ConversationStore,
        transport: Arc<dyn ChatTransport>,
        events: EventSender,
    ) -> Result<Self, StoreError> {
        let conversation = store.read(config.default_model())?;
        debug!(
            path = %store.path().display(),
            messages = conversation.history.len(),
            "Opened conversation"
        );
        Ok(Self::from_parts(
            config,
            store,
            conversation,
            transport,
            events,
        ))
    }

    pub fn from_parts(
        config: Config,
        store: ConversationStore,
        conversation: ConversationData,
        transport: Arc<dyn ChatTransport>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            conversation: Arc::new(Mutex::new(conversation)),
            store,
            transport,
            client: None,
            events,
            current_stream_id: 0,
            active: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// A snapshot of the conversation.
    pub fn conversation(&self) -> ConversationData {
        lock_conversation(&self.conversation).clone()
    }

    pub fn history(&self) -> Vec<Message> {
        lock_conversation(&self.conversation).history.clone()
    }

    pub fn host(&self) -> String {
        lock_conversation(&self.conversation).host.clone()
    }

    pub fn current_stream_id(&self) -> u64 {
        self.current_stream_id
    }

    pub fn is_exchange_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Point the conversation at another model server.
    ///
    /// The cached client is dropped so the next exchange reconnects.
    pub fn set_host(&mut self, host: impl Into<String>) {
        let host = host.into();
        info!(%host, "Model server host changed");
        lock_conversation(&self.conversation).host = host;
        self.client = None;
    }

    /// Start an exchange for `input`, returning its stream id.
    ///
    /// Blank input is ignored. Any exchange still running is cancelled and
    /// joined before the new user message is recorded. A fatal failure of
    /// that earlier exchange was already reported with `TurnFailed` and does
    /// not stop this one.
    pub async fn submit(&mut self, input: &str) -> Option<u64> {
        if input.trim().is_empty() {
            return None;
        }

        self.cancel_current_exchange().await;

        let (model, history) = {
            let mut conversation = lock_conversation(&self.conversation);
            conversation.record(Message::user(input));
            (conversation.model.clone(), conversation.history.clone())
        };

        self.current_stream_id += 1;
        let stream_id = self.current_stream_id;
        let cancel_token = CancellationToken::new();
        let client = self.client();

        debug!(stream_id, %model, messages = history.len(), "Starting exchange");

        let interaction = Interaction::begin(stream_id, input, self.events.clone());
        let params = ExchangeParams {
            client,
            model,
            history,
            conversation: Arc::clone(&self.conversation),
            store: self.store.clone(),
            cancel_token: cancel_token.clone(),
        };
        let handle = tokio::spawn(run_exchange(interaction, params));

        self.active = Some(ActiveExchange {
            stream_id,
            cancel_token,
            handle,
        });
        Some(stream_id)
    }

    /// Wait for the running exchange, if any, to finish on its own.
    ///
    /// A fatal transport failure comes back as [`ExchangeError::Fatal`].
    pub async fn wait_for_exchange(&mut self) -> Result<Option<ExchangeOutcome>, ExchangeError> {
        match self.active.take() {
            Some(active) => join(active).await.map(Some),
            None => Ok(None),
        }
    }

    /// Cancel the running exchange, if any, and wait for it to stop.
    ///
    /// Fragments it already recorded stay in the history. Returns `None`
    /// when nothing was running or the exchange had already failed; failures
    /// have been reported as events by then.
    pub async fn cancel_current_exchange(&mut self) -> Option<ExchangeOutcome> {
        let active = self.active.take()?;
        let stream_id = active.stream_id;
        debug!(stream_id, "Cancelling exchange");
        active.cancel_token.cancel();

        match join(active).await {
            Ok(outcome) => Some(outcome),
            Err(ExchangeError::Fatal(err)) => {
                debug!(stream_id, error = %err, "Cancelled exchange had already failed");
                None
            }
            Err(err @ ExchangeError::Join(_)) => {
                warn!(stream_id, error = %err, "Exchange task did not finish cleanly");
                events::notice(&self.events, NoticeKind::Error, err.to_string());
                None
            }
        }
    }

    /// Replace the conversation with a fresh one and persist it right away.
    ///
    /// A failed write is reported as a notice; the reset itself still
    /// happens.
    pub async fn reset(&mut self) {
        self.cancel_current_exchange().await;

        let fresh = ConversationData::new(self.config.default_model());
        *lock_conversation(&self.conversation) = fresh.clone();
        self.client = None;

        if let Err(err) = self.store.write(&fresh) {
            warn!(error = %err, "Failed to persist reset conversation");
            events::notice(&self.events, NoticeKind::Error, err.to_string());
        }
        info!(model = %fresh.model, "Conversation reset");
        let _ = self.events.send(SessionEvent::Cleared);
    }

    /// Write the conversation as Markdown to `path`, adding `.md` when the
    /// path has no extension.
    pub fn export_markdown(&self, path: &Path) -> Result<PathBuf, ExportError> {
        let conversation = self.conversation();
        let written = export::write_markdown(&conversation, path)?;
        info!(path = %written.display(), "Exported conversation");
        Ok(written)
    }

    pub(crate) fn notify(&self, kind: NoticeKind, text: impl Into<String>) {
        events::notice(&self.events, kind, text);
    }

    fn client(&mut self) -> Result<Arc<dyn ChatClient>, TransportError> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }

        let host = lock_conversation(&self.conversation)
            .host()
            .map(str::to_string)
            .or_else(|| self.config.default_host().map(str::to_string));
        debug!(host = host.as_deref().unwrap_or("default"), "Connecting to model server");

        let client = self.transport.connect(host.as_deref())?;
        self.client = Some(Arc::clone(&client));
        Ok(client)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // A detached exchange must not keep writing to a conversation nobody
        // owns any more.
        if let Some(active) = &self.active {
            active.cancel_token.cancel();
        }
    }
}

async fn join(active: ActiveExchange) -> Result<ExchangeOutcome, ExchangeError> {
    match active.handle.await {
        Ok(result) => result,
        Err(err) => Err(ExchangeError::Join(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::Fragment;
    use crate::core::conversation::DEFAULT_TITLE;
    use crate::utils::test_utils::{
        create_test_session, create_test_session_with_config, drain_events, wait_for_event,
    };

    #[tokio::test]
    async fn hello_exchange_commits_and_persists() {
        let mut test = create_test_session();
        test.transport.push_reply(vec![
            Ok(Fragment::assistant("Hi")),
            Ok(Fragment::assistant(" there!")),
        ]);

        let stream_id = test.session.submit("hello").await;
        assert_eq!(stream_id, Some(1));
        let outcome = test.session.wait_for_exchange().await.unwrap();

        assert_eq!(outcome, Some(ExchangeOutcome::Committed { saved: true }));
        let expected = vec![Message::user("hello"), Message::assistant("Hi there!")];
        assert_eq!(test.session.history(), expected);

        let persisted = test.store.read("unused").unwrap();
        assert_eq!(persisted.history, expected);

        let requests = test.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].history, vec![Message::user("hello")]);
        assert_eq!(requests[0].model, "llama3");

        let events = drain_events(&mut test.events);
        assert_eq!(
            events.first(),
            Some(&SessionEvent::TurnStarted {
                stream_id: 1,
                user_input: "hello".to_string()
            })
        );
        assert!(events.contains(&SessionEvent::TurnUpdated {
            stream_id: 1,
            fragment: " there!".to_string(),
            reply: "Hi there!".to_string(),
        }));
        assert!(events.contains(&SessionEvent::TurnCommitted {
            stream_id: 1,
            saved: true
        }));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::PendingCleared { stream_id: 1 })
        );
    }

    #[tokio::test]
    async fn connection_failure_keeps_recorded_fragments_without_saving() {
        let mut test = create_test_session();
        test.transport.push_reply(vec![
            Ok(Fragment::assistant("Hel")),
            Err(TransportError::Connection("connection reset".to_string())),
        ]);

        test.session.submit("hello").await;
        let outcome = test.session.wait_for_exchange().await.unwrap().unwrap();

        assert!(matches!(outcome, ExchangeOutcome::Abandoned { .. }));
        assert_eq!(
            test.session.history(),
            vec![Message::user("hello"), Message::assistant("Hel")]
        );
        assert!(!test.store.path().exists());

        let events = drain_events(&mut test.events);
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::TurnAbandoned { stream_id: 1, reason } if reason.contains("connection reset")
        )));
        let cleared = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::PendingCleared { .. }))
            .count();
        assert_eq!(cleared, 1);
    }

    #[tokio::test]
    async fn second_submit_cancels_the_first_exchange() {
        let mut test = create_test_session();
        let first = test.transport.push_channel();
        test.transport
            .push_reply(vec![Ok(Fragment::assistant("Second answer"))]);

        test.session.submit("first question").await;
        first.send(Ok(Fragment::assistant("Early"))).unwrap();
        wait_for_event(&mut test.events, |event| {
            matches!(event, SessionEvent::TurnUpdated { stream_id: 1, .. })
        })
        .await;

        let second = test.session.submit("second question").await;
        assert_eq!(second, Some(2));

        // The first stream was dropped on cancellation; nothing sent now can
        // be recorded.
        let _ = first.send(Ok(Fragment::assistant(" late")));
        let outcome = test.session.wait_for_exchange().await.unwrap();
        assert_eq!(outcome, Some(ExchangeOutcome::Committed { saved: true }));

        assert_eq!(
            test.session.history(),
            vec![
                Message::user("first question"),
                Message::assistant("Early"),
                Message::user("second question"),
                Message::assistant("Second answer"),
            ]
        );

        let events = drain_events(&mut test.events);
        assert!(events.contains(&SessionEvent::PendingCleared { stream_id: 1 }));
        assert!(!events
            .iter()
            .any(|event| matches!(event, SessionEvent::TurnCommitted { stream_id: 1, .. })));
        assert!(!events
            .iter()
            .any(|event| matches!(event, SessionEvent::TurnAbandoned { .. })));
    }

    #[tokio::test]
    async fn cancelling_reports_cancelled_outcome() {
        let mut test = create_test_session();
        let _pending = test.transport.push_channel();

        test.session.submit("hello").await;
        assert!(test.session.is_exchange_active());
        let outcome = test.session.cancel_current_exchange().await;

        assert_eq!(outcome, Some(ExchangeOutcome::Cancelled));
        assert!(!test.session.is_exchange_active());
        assert!(!test.store.path().exists());
    }

    #[tokio::test]
    async fn blank_input_starts_nothing() {
        let mut test = create_test_session();
        assert_eq!(test.session.submit("   \n").await, None);
        assert!(test.session.history().is_empty());
        assert!(test.transport.connects().is_empty());
    }

    #[tokio::test]
    async fn host_change_reconnects_with_new_host() {
        let mut test = create_test_session();

        test.session.submit("one").await;
        test.session.wait_for_exchange().await.unwrap();
        test.session.submit("two").await;
        test.session.wait_for_exchange().await.unwrap();
        assert_eq!(test.transport.connects(), vec![None]);

        test.session.set_host("example.com");
        test.session.submit("three").await;
        test.session.wait_for_exchange().await.unwrap();

        assert_eq!(
            test.transport.connects(),
            vec![None, Some("example.com".to_string())]
        );
        let requests = test.transport.requests();
        assert_eq!(requests.last().unwrap().host.as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn configured_default_host_is_used_when_conversation_has_none() {
        let config = Config {
            default_host: Some("http://gpu-box:11434".to_string()),
            default_model: Some("mistral".to_string()),
        };
        let mut test = create_test_session_with_config(config);

        test.session.submit("hi").await;
        test.session.wait_for_exchange().await.unwrap();

        assert_eq!(
            test.transport.connects(),
            vec![Some("http://gpu-box:11434".to_string())]
        );
        assert_eq!(test.transport.requests()[0].model, "mistral");
    }

    #[tokio::test]
    async fn connect_failure_is_abandoned_and_retried_next_time() {
        let mut test = create_test_session();
        test.transport
            .fail_next_connect(TransportError::Connection("no route".to_string()));

        test.session.submit("hello").await;
        let outcome = test.session.wait_for_exchange().await.unwrap().unwrap();
        assert!(matches!(outcome, ExchangeOutcome::Abandoned { .. }));

        test.session.submit("again").await;
        let outcome = test.session.wait_for_exchange().await.unwrap().unwrap();
        assert!(matches!(outcome, ExchangeOutcome::Committed { .. }));
        assert_eq!(test.transport.connects().len(), 2);
    }

    #[tokio::test]
    async fn fatal_failure_surfaces_from_wait() {
        let mut test = create_test_session();
        test.transport
            .push_start_error(TransportError::Fatal("bad state".into()));

        test.session.submit("hello").await;
        let result = test.session.wait_for_exchange().await;
        assert!(matches!(result, Err(ExchangeError::Fatal(_))));
    }

    #[tokio::test]
    async fn fatal_failure_is_reported_and_next_input_still_sent() {
        let mut test = create_test_session();
        let stream = test.transport.push_channel();
        test.transport
            .push_reply(vec![Ok(Fragment::assistant("Recovered"))]);

        test.session.submit("hello").await;
        stream.send(Ok(Fragment::assistant("part"))).unwrap();
        stream
            .send(Err(TransportError::Fatal("boom".into())))
            .unwrap();
        let seen = wait_for_event(&mut test.events, |event| {
            matches!(event, SessionEvent::PendingCleared { stream_id: 1 })
        })
        .await;
        assert!(seen.iter().any(|event| matches!(
            event,
            SessionEvent::TurnFailed { stream_id: 1, reason } if reason.contains("boom")
        )));

        assert_eq!(test.session.submit("next question").await, Some(2));
        let outcome = test.session.wait_for_exchange().await.unwrap();

        assert_eq!(outcome, Some(ExchangeOutcome::Committed { saved: true }));
        assert_eq!(
            test.session.history(),
            vec![
                Message::user("hello"),
                Message::assistant("part"),
                Message::user("next question"),
                Message::assistant("Recovered"),
            ]
        );
    }

    #[tokio::test]
    async fn reset_cancels_clears_and_persists() {
        let mut test = create_test_session();
        let stream = test.transport.push_channel();
        test.session.set_host("example.com");

        test.session.submit("hello").await;
        stream.send(Ok(Fragment::assistant("partial"))).unwrap();
        wait_for_event(&mut test.events, |event| {
            matches!(event, SessionEvent::TurnUpdated { .. })
        })
        .await;

        test.session.reset().await;
        let _ = stream.send(Ok(Fragment::assistant(" stale")));

        let conversation = test.session.conversation();
        assert!(conversation.history.is_empty());
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert_eq!(conversation.model, "llama3");
        assert_eq!(conversation.host, "");
        assert_eq!(test.store.read("other").unwrap(), conversation);
        assert!(drain_events(&mut test.events).contains(&SessionEvent::Cleared));
    }

    #[tokio::test]
    async fn open_resumes_stored_conversation() {
        let test = create_test_session();
        let mut stored = ConversationData::new("phi3");
        stored.record(Message::user("remember me"));
        test.store.write(&stored).unwrap();

        let (tx, _rx) = events::channel();
        let reopened = ChatSession::open(
            Config::default(),
            test.store.clone(),
            Arc::new(test.transport.clone()),
            tx,
        )
        .unwrap();
        assert_eq!(reopened.conversation(), stored);
    }

    #[tokio::test]
    async fn export_writes_markdown_with_default_extension() {
        let mut test = create_test_session();
        test.transport
            .push_reply(vec![Ok(Fragment::assistant("Hi there!"))]);
        test.session.submit("hello").await;
        test.session.wait_for_exchange().await.unwrap();

        let target = test.store.path().with_file_name("export");
        let written = test.session.export_markdown(&target).unwrap();

        assert_eq!(written, target.with_extension("md"));
        assert_eq!(
            std::fs::read_to_string(written).unwrap(),
            "# User\n\nhello\n\n# Assistant\n\nHi there!\n\n"
        );
    }
}
