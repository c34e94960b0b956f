use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AuthTransport;
use crate::error::Error;
use crate::event::Event;
use crate::frame::decode_frame;
use crate::transport::{CloseReason, Connector, ManagedSocket, SocketEvent};

use super::options::TailOptions;

/// A batch of events decoded from one tail frame, already cursor-advanced and
/// agent-filtered, in server-emitted order.
#[derive(Debug, Clone)]
pub struct TailBatch {
    pub events: Vec<Event>,
}

impl TailBatch {
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Why a replay-mode tail considered itself finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndReason {
    Aborted,
    Graceful,
    CaughtUp,
}

/// Observability events surfaced to an optional lifecycle observer. Mirrors the
/// managed socket's own events, filtered down to what the tail layer adds meaning
/// to; a handler that panics here is allowed to propagate and tear down the task,
/// matching the "observer exceptions are fatal" design.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ConnectAttempt {
        attempt: u32,
        cursor: u64,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
        close_code: Option<u16>,
        close_reason: Option<String>,
    },
    StreamDropped {
        code: Option<u16>,
        reason: String,
    },
    StreamEnded {
        reason: StreamEndReason,
    },
}

/// Supplies the live access token for the tail upgrade request. A plain closure or
/// an `arc_swap::ArcSwap<String>` both work; the latter lets a session rotate its
/// token without tearing down an in-flight tail.
pub trait AccessTokenSource: Send + Sync {
    fn token(&self) -> String;
}

impl<F> AccessTokenSource for F
where
    F: Fn() -> String + Send + Sync,
{
    fn token(&self) -> String {
        self()
    }
}

impl AccessTokenSource for arc_swap::ArcSwap<String> {
    fn token(&self) -> String {
        (**self.load()).clone()
    }
}

/// Sits on top of a [`ManagedSocket`]: owns the cursor, the `agent` filter, batching,
/// backpressure, and (for replay-mode tails) the catch-up idle timer.
pub struct TailStream {
    session_id: String,
    ws_base: String,
    options: TailOptions,
    auth_transport: AuthTransport,
    token_source: Arc<dyn AccessTokenSource>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    lifecycle_observer: Option<Arc<dyn Fn(LifecycleEvent) + Send + Sync>>,
}

impl TailStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        ws_base: impl Into<String>,
        options: TailOptions,
        auth_transport: AuthTransport,
        token_source: Arc<dyn AccessTokenSource>,
        connector: Arc<dyn Connector>,
        cancel: CancellationToken,
    ) -> Self {
        let lifecycle_observer = options.on_lifecycle_event.clone().map(|o| o.0);
        Self {
            session_id: session_id.into(),
            ws_base: ws_base.into(),
            options,
            auth_transport,
            token_source,
            connector,
            cancel,
            lifecycle_observer,
        }
    }

    /// Start the tail. Spawns a task that drives the managed socket and feeds decoded,
    /// filtered batches into a bounded channel; returns the receiving end as a stream.
    /// `max_buffered_batches == 0` uses an unbounded channel (limit disabled).
    pub fn run(self) -> impl Stream<Item = Result<TailBatch, Error>> {
        let max_buffered = self.options.max_buffered_batches;
        let (tx, rx) = if max_buffered == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (ChannelSender::Unbounded(tx), ChannelReceiver::Unbounded(rx))
        } else {
            let (data_tx, data_rx) = mpsc::channel(max_buffered);
            let (err_tx, err_rx) = mpsc::unbounded_channel();
            (
                ChannelSender::Bounded { data: data_tx, err: err_tx },
                ChannelReceiver::Bounded { data: data_rx, err: err_rx },
            )
        };

        tokio::spawn(drive(self, tx));
        receiver_stream(rx)
    }

    fn notify(&self, event: LifecycleEvent) {
        if let Some(observer) = &self.lifecycle_observer {
            observer(event);
        }
    }
}

/// Outcome of [`ChannelSender::try_push`]: whether the stream should keep driving.
enum PushOutcome {
    Sent,
    /// Terminal: either backpressure tripped (a `ConsumerBackpressure` error was
    /// routed through the side channel) or an upstream error was pushed.
    Failed,
    /// The consumer dropped the stream; not an error, just stop driving.
    ReceiverGone,
}

enum ChannelSender {
    /// A bounded data channel paired with an *unbounded* error side-channel. The
    /// side channel exists so a `ConsumerBackpressure` failure is never itself lost
    /// to the very fullness it's reporting — if the data channel's single extra
    /// push for the error shared its capacity, a full buffer could silently drop
    /// the error that explains why the stream is ending.
    Bounded {
        data: mpsc::Sender<TailBatch>,
        err: mpsc::UnboundedSender<Error>,
    },
    Unbounded(mpsc::UnboundedSender<Result<TailBatch, Error>>),
}

impl ChannelSender {
    /// Attempt to enqueue a batch, or route a terminal error, without blocking.
    fn try_push(&self, item: Result<TailBatch, Error>) -> PushOutcome {
        match (self, item) {
            (ChannelSender::Bounded { data, err }, Ok(batch)) => match data.try_send(batch) {
                Ok(()) => PushOutcome::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let _ = err.send(Error::ConsumerBackpressure {
                        max_buffered_batches: data.max_capacity(),
                    });
                    PushOutcome::Failed
                }
                Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::ReceiverGone,
            },
            (ChannelSender::Bounded { err, .. }, Err(e)) => {
                let _ = err.send(e);
                PushOutcome::Failed
            }
            (ChannelSender::Unbounded(tx), item) => match tx.send(item) {
                Ok(()) => PushOutcome::Sent,
                Err(_) => PushOutcome::ReceiverGone,
            },
        }
    }
}

enum ChannelReceiver {
    Bounded {
        data: mpsc::Receiver<TailBatch>,
        err: mpsc::UnboundedReceiver<Error>,
    },
    Unbounded(mpsc::UnboundedReceiver<Result<TailBatch, Error>>),
}

/// Drains `data` to exhaustion (in order) before ever surfacing `err` — batches that
/// were already safely enqueued are always delivered before the terminal error that
/// ended the stream, preserving ordering even in the backpressure case.
fn receiver_stream(rx: ChannelReceiver) -> impl Stream<Item = Result<TailBatch, Error>> {
    futures::stream::unfold(rx, |mut rx| async move {
        match &mut rx {
            ChannelReceiver::Bounded { data, err } => match data.recv().await {
                Some(batch) => Some((Ok(batch), rx)),
                None => err.recv().await.map(|e| (Err(e), rx)),
            },
            ChannelReceiver::Unbounded(r) => r.recv().await.map(|item| (item, rx)),
        }
    })
}

/// Drives one managed socket for the lifetime of the tail, decoding frames into
/// batches and pushing them (or a terminal error) into `tx`.
async fn drive(stream: TailStream, tx: ChannelSender) {
    let TailStream {
        session_id,
        ws_base,
        options,
        auth_transport,
        token_source,
        connector,
        cancel,
        lifecycle_observer: _,
    } = &stream;

    let cursor = Arc::new(AtomicU64::new(options.cursor));
    let url_source: Arc<dyn crate::transport::UrlSource> = {
        let cursor = cursor.clone();
        let ws_base = ws_base.clone();
        let session_id = session_id.clone();
        let batch_size = options.batch_size;
        let auth_transport = *auth_transport;
        let token_source = token_source.clone();
        Arc::new(move || {
            build_target(
                &ws_base,
                &session_id,
                cursor.load(Ordering::SeqCst),
                batch_size,
                auth_transport,
                token_source.as_ref(),
            )
        })
    };

    let socket_cancel = cancel.child_token();
    let managed = ManagedSocket::new(
        connector.clone(),
        url_source,
        options.reconnect_policy,
        options.connection_timeout,
        options.inactivity_timeout,
        options.reconnect_enabled(),
        socket_cancel.clone(),
    );
    let mut socket_stream = Box::pin(managed.run());

    let is_replay = !options.follow;
    let mut idle_deadline = is_replay.then(|| Instant::now() + options.catch_up_idle);

    loop {
        let next = match idle_deadline {
            Some(deadline) => {
                tokio::select! {
                    item = socket_stream.next() => Next::Socket(item),
                    _ = tokio::time::sleep_until(deadline) => Next::CaughtUp,
                }
            }
            None => Next::Socket(socket_stream.next().await),
        };

        match next {
            Next::CaughtUp => {
                socket_cancel.cancel();
                // Drain the resulting Closed(Aborted) so the socket task (if any
                // spawned work inside the connector) unwinds cleanly.
                let _ = socket_stream.next().await;
                stream.notify(LifecycleEvent::StreamEnded {
                    reason: StreamEndReason::CaughtUp,
                });
                return;
            }
            Next::Socket(None) => return,
            Next::Socket(Some(Err(e))) => {
                let _ = tx.try_push(Err(e));
                return;
            }
            Next::Socket(Some(Ok(event))) => match event {
                SocketEvent::ConnectAttempt { attempt } => {
                    stream.notify(LifecycleEvent::ConnectAttempt {
                        attempt,
                        cursor: cursor.load(Ordering::SeqCst),
                    });
                }
                SocketEvent::ConnectFailed { .. } => {}
                SocketEvent::ReconnectScheduled {
                    attempt,
                    delay,
                    close_code,
                    close_reason,
                    ..
                } => {
                    stream.notify(LifecycleEvent::ReconnectScheduled {
                        attempt,
                        delay,
                        close_code,
                        close_reason,
                    });
                }
                SocketEvent::Open => {}
                SocketEvent::Message(frame) => {
                    if is_replay {
                        idle_deadline = Some(Instant::now() + options.catch_up_idle);
                    }
                    match decode_frame(frame) {
                        Ok(events) => {
                            let mut batch = Vec::with_capacity(events.len());
                            for event in events {
                                let seq = event.seq;
                                cursor.fetch_max(seq, Ordering::SeqCst);
                                let keep = match &options.agent {
                                    Some(agent) => event.actor == format!("agent:{agent}"),
                                    None => true,
                                };
                                if keep {
                                    batch.push(event);
                                }
                            }
                            if !batch.is_empty() {
                                match tx.try_push(Ok(TailBatch { events: batch })) {
                                    PushOutcome::Sent => {}
                                    PushOutcome::Failed | PushOutcome::ReceiverGone => {
                                        socket_cancel.cancel();
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.try_push(Err(e));
                            socket_cancel.cancel();
                            return;
                        }
                    }
                }
                SocketEvent::Closed(reason) => match reason {
                    CloseReason::Aborted => {
                        stream.notify(LifecycleEvent::StreamEnded {
                            reason: StreamEndReason::Aborted,
                        });
                        return;
                    }
                    CloseReason::Graceful => {
                        stream.notify(LifecycleEvent::StreamEnded {
                            reason: StreamEndReason::Graceful,
                        });
                        return;
                    }
                    CloseReason::Dropped { code, reason, .. } => {
                        stream.notify(LifecycleEvent::StreamDropped { code, reason });
                    }
                },
            },
        }
    }
}

enum Next {
    Socket(Option<Result<SocketEvent, Error>>),
    CaughtUp,
}

fn build_target(
    ws_base: &str,
    session_id: &str,
    cursor: u64,
    batch_size: Option<u32>,
    auth_transport: AuthTransport,
    token_source: &dyn AccessTokenSource,
) -> (String, Vec<(String, String)>) {
    let mut url = url::Url::parse(ws_base).expect("ws_base validated at config build time");
    {
        let mut segments = url
            .path_segments_mut()
            .expect("ws base must be a base url (scheme ws/wss)");
        segments.push("v1").push("sessions").push(session_id).push("tail");
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("cursor", &cursor.to_string());
        if let Some(n) = batch_size {
            query.append_pair("batch_size", &n.to_string());
        }
        if matches!(auth_transport, AuthTransport::AccessToken) {
            query.append_pair("access_token", &token_source.token());
        }
    }

    let headers = if matches!(auth_transport, AuthTransport::Header) {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", token_source.token()),
        )]
    } else {
        Vec::new()
    };
    (url.to_string(), headers)
}
