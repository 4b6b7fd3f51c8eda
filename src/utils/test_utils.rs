use crate::core::chat_stream::{ChatClient, ChatTransport, Fragment, FragmentStream, TransportError};
use crate::core::config::Config;
use crate::core::events::{self, EventReceiver, SessionEvent};
use crate::core::message::Message;
use crate::core::session::ChatSession;
use crate::core::store::ConversationStore;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub type FragmentResult = Result<Fragment, TransportError>;

fn script_stream(items: Vec<FragmentResult>) -> FragmentStream {
    stream::iter(items).boxed()
}

fn channel_stream(rx: mpsc::UnboundedReceiver<FragmentResult>) -> FragmentStream {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// A client that replays one fixed script, then streams nothing.
pub struct ScriptedClient {
    script: Mutex<Option<Vec<FragmentResult>>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<FragmentResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
        })
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat(
        &self,
        _model: &str,
        _history: &[Message],
    ) -> Result<FragmentStream, TransportError> {
        let script = self.script.lock().unwrap().take().unwrap_or_default();
        Ok(script_stream(script))
    }
}

enum Reply {
    Script(Vec<FragmentResult>),
    Channel(mpsc::UnboundedReceiver<FragmentResult>),
    StartError(TransportError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub host: Option<String>,
    pub model: String,
    pub history: Vec<Message>,
}

#[derive(Default)]
struct TransportScript {
    connects: Vec<Option<String>>,
    requests: Vec<RecordedRequest>,
    replies: VecDeque<Reply>,
    connect_errors: VecDeque<TransportError>,
}

/// Transport double: records every connect and chat call and answers chats
/// from a queue of replies.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<TransportScript>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, items: Vec<FragmentResult>) {
        self.inner
            .lock()
            .unwrap()
            .replies
            .push_back(Reply::Script(items));
    }

    /// Queue a reply whose fragments the test feeds by hand. The stream ends
    /// when the sender is dropped.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<FragmentResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .replies
            .push_back(Reply::Channel(rx));
        tx
    }

    pub fn push_start_error(&self, err: TransportError) {
        self.inner
            .lock()
            .unwrap()
            .replies
            .push_back(Reply::StartError(err));
    }

    pub fn fail_next_connect(&self, err: TransportError) {
        self.inner.lock().unwrap().connect_errors.push_back(err);
    }

    pub fn connects(&self) -> Vec<Option<String>> {
        self.inner.lock().unwrap().connects.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().unwrap().requests.clone()
    }
}

struct ScriptedTransportClient {
    host: Option<String>,
    inner: Arc<Mutex<TransportScript>>,
}

impl ChatTransport for ScriptedTransport {
    fn connect(&self, host: Option<&str>) -> Result<Arc<dyn ChatClient>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects.push(host.map(str::to_string));
        if let Some(err) = inner.connect_errors.pop_front() {
            return Err(err);
        }
        Ok(Arc::new(ScriptedTransportClient {
            host: host.map(str::to_string),
            inner: Arc::clone(&self.inner),
        }))
    }
}

#[async_trait]
impl ChatClient for ScriptedTransportClient {
    async fn chat(
        &self,
        model: &str,
        history: &[Message],
    ) -> Result<FragmentStream, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(RecordedRequest {
            host: self.host.clone(),
            model: model.to_string(),
            history: history.to_vec(),
        });
        match inner.replies.pop_front() {
            Some(Reply::Script(items)) => Ok(script_stream(items)),
            Some(Reply::Channel(rx)) => Ok(channel_stream(rx)),
            Some(Reply::StartError(err)) => Err(err),
            None => Ok(script_stream(Vec::new())),
        }
    }
}

pub fn drain_events(rx: &mut EventReceiver) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = rx.try_recv() {
        drained.push(event);
    }
    drained
}

/// Await events until `predicate` matches one, returning everything seen.
pub async fn wait_for_event<F>(rx: &mut EventReceiver, predicate: F) -> Vec<SessionEvent>
where
    F: Fn(&SessionEvent) -> bool,
{
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = predicate(&event);
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}

pub struct TestSession {
    pub session: ChatSession,
    pub transport: ScriptedTransport,
    pub events: EventReceiver,
    pub store: ConversationStore,
    // Keeps the conversation file alive for the duration of the test.
    pub _dir: TempDir,
}

pub fn create_test_session() -> TestSession {
    create_test_session_with_config(Config::default())
}

pub fn create_test_session_with_config(config: Config) -> TestSession {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = ConversationStore::new(dir.path().join("conversation.json"));
    let transport = ScriptedTransport::new();
    let (tx, events) = events::channel();
    let session = ChatSession::new(
        config,
        store.clone(),
        Arc::new(transport.clone()),
        tx,
    );
    TestSession {
        session,
        transport,
        events,
        store,
        _dir: dir,
    }
}
