//! Shared fakes for the integration tests: a scriptable websocket connector (so a
//! test can dictate exactly which frames arrive on which connection attempt) and a
//! no-op append client (the tail/live-sync scenarios never call `append`).

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use session_tail_client::http_client::{AppendClient, AppendRequest, AppendResponse};
use session_tail_client::transport::{BoxedWsConnection, Connector};
use session_tail_client::{BackoffMode, ClientBuilder, ClientConfig, Error, Identity, ReconnectPolicy, Session, TailOptions};

/// One scripted connection: messages replayed in order via `poll_next`. Once drained,
/// the stream ends (mirroring a dropped connection) unless `hang_when_empty` is set,
/// in which case it stays pending forever (mirroring an open, idle connection) —
/// used to exercise cancellation while a tail is waiting on the socket.
pub struct ScriptedConnection {
    messages: VecDeque<Message>,
    hang_when_empty: bool,
}

impl Stream for ScriptedConnection {
    type Item = Result<Message, tokio_tungstenite::tungstenite::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.messages.pop_front() {
            Some(m) => Poll::Ready(Some(Ok(m))),
            None if self.hang_when_empty => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

impl Sink<Message> for ScriptedConnection {
    type Error = tokio_tungstenite::tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Hands out one scripted connection per `connect()` call, in the order given, and
/// records every URL it was asked to connect to so tests can assert on `cursor=`.
#[derive(Default)]
pub struct FakeConnector {
    connections: Mutex<VecDeque<(Vec<Message>, bool)>>,
    urls: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn script(connections: Vec<Vec<Message>>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(connections.into_iter().map(|m| (m, false)).collect()),
            urls: Mutex::new(Vec::new()),
        })
    }

    /// A single connection that replays `messages` then hangs forever instead of
    /// ending, as if the server simply stopped sending without closing.
    pub fn script_hanging(messages: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(VecDeque::from([(messages, true)])),
            urls: Mutex::new(Vec::new()),
        })
    }

    /// Like [`FakeConnector::script`], but each connection independently chooses
    /// whether to hang (stay open, pending forever) once its messages are drained,
    /// instead of ending (simulating a drop).
    pub fn script_mixed(connections: Vec<(Vec<Message>, bool)>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(connections.into()),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str, _headers: &[(String, String)]) -> Result<BoxedWsConnection, Error> {
        self.urls.lock().unwrap().push(url.to_string());
        match self.connections.lock().unwrap().pop_front() {
            Some((messages, hang_when_empty)) => Ok(Box::new(ScriptedConnection {
                messages: messages.into(),
                hang_when_empty,
            })),
            None => Err(Error::Connect("fake connector script exhausted".into())),
        }
    }
}

pub struct NoopAppendClient;

#[async_trait]
impl AppendClient for NoopAppendClient {
    async fn append(&self, _session_id: &str, _token: &str, _request: &AppendRequest) -> Result<AppendResponse, Error> {
        Ok(AppendResponse {
            seq: 0,
            last_seq: 0,
            deduped: false,
        })
    }
}

/// A reconnect policy with no jitter and a 1ms delay, so tests don't spend real
/// wall-clock time waiting out the default 500ms-15s backoff.
pub fn fast_reconnect_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        mode: BackoffMode::Fixed,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        multiplier: 1.0,
        jitter_ratio: 0.0,
        max_attempts: None,
    }
}

pub fn test_config() -> ClientConfig {
    ClientBuilder::new()
        .api_base("http://api.test")
        .ws_base("ws://api.test")
        .reconnect_policy(fast_reconnect_policy())
        .tail_options(TailOptions::default().reconnect_policy(fast_reconnect_policy()))
        .build()
        .unwrap()
}

pub fn test_session(connector: Arc<FakeConnector>) -> Arc<Session> {
    Session::new(
        "sess-1",
        Identity::agent("tenant-1", "tester"),
        "token",
        test_config(),
        connector,
        Arc::new(NoopAppendClient),
        None,
    )
}

pub fn text_frame(events: Vec<Value>) -> Message {
    let body = if events.len() == 1 {
        events.into_iter().next().unwrap()
    } else {
        Value::Array(events)
    };
    Message::Text(body.to_string())
}

pub fn graceful_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: 1000.into(),
        reason: "".into(),
    }))
}

pub fn token_expired_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: 4001.into(),
        reason: "".into(),
    }))
}

/// A fixed, jitter-free policy like [`fast_reconnect_policy`] but capped at
/// `max_attempts` reconnects, for exercising the retry-limit error path.
pub fn limited_reconnect_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: Some(max_attempts),
        ..fast_reconnect_policy()
    }
}

pub fn ev(seq: u64, actor: &str) -> Value {
    json!({"seq": seq, "type": "note", "payload": {}, "actor": actor})
}

/// Poll `cond` every 5ms until it's true, or panic after `timeout`. Used in the
/// live-sync tests, where the loop underneath runs on its own spawned task.
pub async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        if cond() {
            return;
        }
        assert!(start.elapsed() < timeout, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
