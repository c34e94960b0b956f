use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use futures::SinkExt;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::{frame_from_message, RawFrame};
use crate::retry::{ExponentialBackoff, ReconnectPolicy};

use super::connector::{BoxedWsConnection, Connector, WsError};

/// Produces the URL and headers for the *next* connect attempt. Implementations
/// typically close over a shared, live cursor so each reconnect picks up where the
/// last one left off.
pub trait UrlSource: Send + Sync {
    fn current_target(&self) -> (String, Vec<(String, String)>);
}

impl<F> UrlSource for F
where
    F: Fn() -> (String, Vec<(String, String)>) + Send + Sync,
{
    fn current_target(&self) -> (String, Vec<(String, String)>) {
        (self)()
    }
}

/// Why a reconnect is being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConnectFailed,
    Dropped,
}

/// How a connection's close was classified.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// Caller-initiated via the cancellation token; terminal, no retry.
    Aborted,
    /// `code == 1000` and no transport error was observed during the open window.
    Graceful,
    /// Everything else, including `code == 1000` following a transport error.
    Dropped {
        code: Option<u16>,
        reason: String,
        emitted_messages: u64,
    },
}

/// One observable transition of the managed socket.
#[derive(Debug)]
pub enum SocketEvent {
    ConnectAttempt {
        attempt: u32,
    },
    ConnectFailed {
        attempt: u32,
        error: String,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
        trigger: Trigger,
        close_code: Option<u16>,
        close_reason: Option<String>,
    },
    Open,
    Message(RawFrame),
    Closed(CloseReason),
}

/// A reconnecting websocket state machine: connect, retry with backoff and jitter,
/// synthesize closes on connect/inactivity timeouts, and classify every close so the
/// layer above (the tail stream) can decide whether and how to resume.
pub struct ManagedSocket {
    connector: Arc<dyn Connector>,
    url_source: Arc<dyn UrlSource>,
    policy: ReconnectPolicy,
    connection_timeout: Option<Duration>,
    inactivity_timeout: Option<Duration>,
    reconnect_enabled: bool,
    cancel: CancellationToken,
}

impl ManagedSocket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn Connector>,
        url_source: Arc<dyn UrlSource>,
        policy: ReconnectPolicy,
        connection_timeout: Option<Duration>,
        inactivity_timeout: Option<Duration>,
        reconnect_enabled: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            url_source,
            policy,
            connection_timeout,
            inactivity_timeout,
            reconnect_enabled,
            cancel,
        }
    }

    /// Run the socket until a terminal condition (aborted, graceful close with
    /// reconnect disabled, or retry-limit/connect/stream error). Yields every
    /// observable transition along the way, in order.
    pub fn run(self) -> impl Stream<Item = Result<SocketEvent, Error>> {
        let backoff = self.policy.backoff();
        stream::try_unfold(
            RunState {
                socket: self,
                phase: Phase::BeginConnect { after: None },
                attempt: 0,
                backoff,
                pending: VecDeque::new(),
            },
            step,
        )
    }
}

enum Phase {
    /// Optionally wait `after` before making the next connect attempt.
    BeginConnect { after: Option<Duration> },
    Connecting,
    Open {
        conn: BoxedWsConnection,
        last_activity: Instant,
        emitted: u64,
        transport_error_observed: bool,
    },
    Terminal,
}

struct RunState {
    socket: ManagedSocket,
    phase: Phase,
    attempt: u32,
    backoff: ExponentialBackoff,
    /// Events queued to be drained, one per `step` call, before the phase's own
    /// logic runs again. Keeps e.g. `Closed(Dropped)` and the following
    /// `ReconnectScheduled` as two distinct, ordered events.
    pending: VecDeque<SocketEvent>,
}

async fn step(mut st: RunState) -> Result<Option<(SocketEvent, RunState)>, Error> {
    if let Some(event) = st.pending.pop_front() {
        return Ok(Some((event, st)));
    }

    match st.phase {
        Phase::Terminal => Ok(None),
        Phase::BeginConnect { after } => {
            if let Some(delay) = after {
                tokio::select! {
                    _ = st.socket.cancel.cancelled() => {
                        st.phase = Phase::Terminal;
                        return Ok(Some((SocketEvent::Closed(CloseReason::Aborted), st)));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if st.socket.cancel.is_cancelled() {
                st.phase = Phase::Terminal;
                return Ok(Some((SocketEvent::Closed(CloseReason::Aborted), st)));
            }
            st.attempt += 1;
            let attempt = st.attempt;
            st.phase = Phase::Connecting;
            Ok(Some((SocketEvent::ConnectAttempt { attempt }, st)))
        }
        Phase::Connecting => {
            let (url, headers) = st.socket.url_source.current_target();
            let connect_fut = st.socket.connector.connect(&url, &headers);

            let result = tokio::select! {
                _ = st.socket.cancel.cancelled() => {
                    st.phase = Phase::Terminal;
                    return Ok(Some((SocketEvent::Closed(CloseReason::Aborted), st)));
                }
                r = connect_with_optional_timeout(connect_fut, st.socket.connection_timeout) => r,
            };

            match result {
                Ok(ConnectOutcome::Connected(conn)) => {
                    st.phase = Phase::Open {
                        conn,
                        last_activity: Instant::now(),
                        emitted: 0,
                        transport_error_observed: false,
                    };
                    Ok(Some((SocketEvent::Open, st)))
                }
                Ok(ConnectOutcome::TimedOut) => {
                    close_and_schedule(st, Some(4100), "connection timeout".to_string(), 0)
                }
                Err(e) => {
                    let attempt = st.attempt;
                    let error = e.to_string();
                    st.pending.push_back(SocketEvent::ConnectFailed { attempt, error: error.clone() });
                    schedule_next(st, Trigger::ConnectFailed, None, error, 0)
                }
            }
        }
        Phase::Open {
            ref mut conn,
            ref mut last_activity,
            ref mut emitted,
            ref mut transport_error_observed,
        } => {
            let inactivity_budget = st
                .socket
                .inactivity_timeout
                .map(|d| d.saturating_sub(last_activity.elapsed()))
                .unwrap_or(Duration::MAX);
            let has_inactivity_timeout = st.socket.inactivity_timeout.is_some();

            enum Outcome {
                Cancelled,
                TimedOut,
                Item(Option<Result<Message, WsError>>),
            }

            let outcome = tokio::select! {
                _ = st.socket.cancel.cancelled() => Outcome::Cancelled,
                msg = conn.next() => Outcome::Item(msg),
                _ = tokio::time::sleep(inactivity_budget), if has_inactivity_timeout => Outcome::TimedOut,
            };

            match outcome {
                Outcome::Cancelled => {
                    let _ = conn.close().await;
                    st.phase = Phase::Terminal;
                    Ok(Some((SocketEvent::Closed(CloseReason::Aborted), st)))
                }
                Outcome::TimedOut => {
                    let _ = conn.close().await;
                    let emitted = *emitted;
                    close_and_schedule(st, Some(4000), "inactivity timeout".to_string(), emitted)
                }
                Outcome::Item(None) => {
                    let emitted = *emitted;
                    close_and_schedule(st, None, "connection ended".to_string(), emitted)
                }
                Outcome::Item(Some(Ok(Message::Close(frame)))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.to_string())
                        .unwrap_or_default();
                    if is_token_expired(code, &reason) {
                        return Err(Error::TokenExpired);
                    }
                    if code == Some(1000) && !*transport_error_observed {
                        st.phase = Phase::Terminal;
                        Ok(Some((SocketEvent::Closed(CloseReason::Graceful), st)))
                    } else {
                        let emitted = *emitted;
                        close_and_schedule(st, code, reason, emitted)
                    }
                }
                Outcome::Item(Some(Ok(msg))) => {
                    *last_activity = Instant::now();
                    match frame_from_message(msg) {
                        Some(frame) => {
                            *emitted += 1;
                            Ok(Some((SocketEvent::Message(frame), st)))
                        }
                        // Ping/Pong frames: activity observed, nothing to surface to callers.
                        None => Box::pin(step(st)).await,
                    }
                }
                Outcome::Item(Some(Err(e))) => {
                    *transport_error_observed = true;
                    *last_activity = Instant::now();
                    log::debug!("tail transport error observed: {e}");
                    Box::pin(step(st)).await
                }
            }
        }
    }
}

/// Outcome of a (possibly time-bounded) connect attempt: a live connection, a
/// synthesized connection-timeout (distinct from a factory-thrown error — it
/// becomes a `{4100, "connection timeout"}` close, not a `ConnectFailed`), or
/// the connector's own error.
enum ConnectOutcome {
    Connected(BoxedWsConnection),
    TimedOut,
}

async fn connect_with_optional_timeout(
    connect_fut: impl std::future::Future<Output = Result<BoxedWsConnection, Error>>,
    timeout: Option<Duration>,
) -> Result<ConnectOutcome, Error> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, connect_fut).await {
            Ok(result) => result.map(ConnectOutcome::Connected),
            Err(_) => Ok(ConnectOutcome::TimedOut),
        },
        None => connect_fut.await.map(ConnectOutcome::Connected),
    }
}

fn is_token_expired(code: Option<u16>, reason: &str) -> bool {
    code == Some(4001) || reason == "token_expired"
}

/// Queue the `Closed(Dropped)` event, apply reset-on-progress, then queue the
/// following reconnect decision (scheduled retry or terminal error).
fn close_and_schedule(
    mut st: RunState,
    code: Option<u16>,
    reason: String,
    emitted_messages: u64,
) -> Result<Option<(SocketEvent, RunState)>, Error> {
    st.pending.push_back(SocketEvent::Closed(CloseReason::Dropped {
        code,
        reason: reason.clone(),
        emitted_messages,
    }));
    if emitted_messages > 0 {
        st.backoff.reset();
    }
    schedule_next(st, Trigger::Dropped, code, reason, emitted_messages)
}

/// Decide and queue the outcome of a connect failure or drop: either schedule the
/// next attempt (queuing `ReconnectScheduled` and arming `BeginConnect`) or, when
/// reconnects are disabled or the attempt budget is exhausted, fail terminally.
/// A connect failure with reconnects disabled fails immediately rather than
/// emitting the already-queued `ConnectFailed`/`Closed` as a final state.
fn schedule_next(
    mut st: RunState,
    trigger: Trigger,
    close_code: Option<u16>,
    close_reason: String,
    _emitted_messages: u64,
) -> Result<Option<(SocketEvent, RunState)>, Error> {
    if !st.socket.reconnect_enabled {
        return match trigger {
            Trigger::ConnectFailed => Err(Error::Connect(close_reason)),
            Trigger::Dropped => {
                st.phase = Phase::Terminal;
                pop_first_pending(st)
            }
        };
    }

    match st.backoff.next() {
        Some(delay) => {
            let attempt = st.attempt;
            st.phase = Phase::BeginConnect { after: Some(delay) };
            st.pending.push_back(SocketEvent::ReconnectScheduled {
                attempt,
                delay,
                trigger,
                close_code,
                close_reason: if close_reason.is_empty() {
                    None
                } else {
                    Some(close_reason)
                },
            });
            pop_first_pending(st)
        }
        None => Err(Error::RetryLimit {
            attempts: st.attempt,
            close_code,
            close_reason: if close_reason.is_empty() {
                None
            } else {
                Some(close_reason)
            },
        }),
    }
}

fn pop_first_pending(mut st: RunState) -> Result<Option<(SocketEvent, RunState)>, Error> {
    let event = st
        .pending
        .pop_front()
        .expect("schedule_next always queues at least one event before calling this");
    Ok(Some((event, st)))
}
