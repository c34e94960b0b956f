mod consume;
mod live_sync;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::event::Event;
use crate::http_client::{AppendClient, AppendRequest, AppendResponse};
use crate::identity::Identity;
use crate::log::{LogSnapshot, SessionLog, Unsubscribe as LogUnsubscribe};
use crate::store::{PersistedSessionState, SessionStore};
use crate::tail::{TailBatch, TailOptions, TailStream};
use crate::transport::Connector;

pub use consume::{consume, ConsumeOptions};

#[allow(unused)]
macro_rules! session_warn {
    ($session:expr, $($arg:tt)*) => {
        log::warn!("session:{} {}", $session.session_id(), format!($($arg)*));
    };
}
#[allow(unused)]
pub(crate) use session_warn;

#[allow(unused)]
macro_rules! session_error {
    ($session:expr, $($arg:tt)*) => {
        log::error!("session:{} {}", $session.session_id(), format!($($arg)*));
    };
}
#[allow(unused)]
pub(crate) use session_error;

#[allow(unused)]
macro_rules! session_debug {
    ($session:expr, $($arg:tt)*) => {
        log::debug!("session:{} {}", $session.session_id(), format!($($arg)*));
    };
}
#[allow(unused)]
pub(crate) use session_debug;

#[allow(unused)]
macro_rules! session_trace {
    ($session:expr, $($arg:tt)*) => {
        log::trace!("session:{} {}", $session.session_id(), format!($($arg)*));
    };
}
#[allow(unused)]
pub(crate) use session_trace;

/// Caller-supplied fields for [`Session::append`]; `actor` defaults to the session's
/// bound identity when omitted.
#[derive(Debug, Clone, Default)]
pub struct AppendInput {
    pub event_type: String,
    pub payload: Value,
    pub actor: Option<String>,
    pub source: Option<String>,
    pub metadata: Option<Value>,
    pub refs: Option<Vec<String>>,
    pub idempotency_key: Option<String>,
    pub expected_seq: Option<u64>,
}

impl AppendInput {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    pub seq: u64,
    pub deduped: bool,
}

/// Binds identity, session token, transport configuration, a session log, and an
/// optional persistence store. Background work (live-sync) is driven off an
/// `Arc<Session>` so the task can hold a strong reference to the session it serves.
pub struct Session {
    session_id: String,
    identity: Identity,
    token: Arc<ArcSwap<String>>,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    append_client: Arc<dyn AppendClient>,
    store: Option<Arc<dyn SessionStore>>,
    log: Mutex<SessionLog>,
    producer_id: String,
    producer_seq: AtomicU64,
    cancel: CancellationToken,
    live_sync_running: Arc<AtomicBool>,
    live_sync_cancel: Mutex<Option<CancellationToken>>,
    event_subscribers: AtomicU64,
    error_listeners: Mutex<Vec<(u64, Arc<dyn Fn(&Error) + Send + Sync>)>>,
    next_listener_id: AtomicU64,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        identity: Identity,
        token: impl Into<String>,
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        append_client: Arc<dyn AppendClient>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            identity,
            token: Arc::new(ArcSwap::from_pointee(token.into())),
            log: Mutex::new(SessionLog::new(config.max_events)),
            config,
            connector,
            append_client,
            store,
            producer_id: Uuid::new_v4().to_string(),
            producer_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            live_sync_running: Arc::new(AtomicBool::new(false)),
            live_sync_cancel: Mutex::new(None),
            event_subscribers: AtomicU64::new(0),
            error_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Replace the live access token, e.g. after a refresh. Affects the next append
    /// call and the next tail (re)connect; does not tear down an in-flight tail.
    pub fn set_token(&self, token: impl Into<String>) {
        self.token.store(Arc::new(token.into()));
    }

    /// Hydrate the session log from a store's persisted snapshot, if one exists.
    pub async fn hydrate_from_store(&self) -> Result<(), Error> {
        let Some(store) = &self.store else { return Ok(()) };
        let state = store.load(&self.session_id).await.map_err(|source| Error::Store {
            session_id: self.session_id.clone(),
            action: "load",
            source,
        })?;
        if let Some(state) = state {
            self.log.lock().hydrate(state.cursor, state.events)?;
        }
        Ok(())
    }

    /// `{seq, deduped}`: derive `actor` from identity if omitted, tag with the
    /// producer id/seq pair, and call the external append endpoint.
    pub async fn append(&self, input: AppendInput) -> Result<AppendOutcome, Error> {
        let actor = input.actor.unwrap_or_else(|| self.identity.actor());
        let producer_seq = self.producer_seq.fetch_add(1, Ordering::SeqCst);

        let request = AppendRequest {
            event_type: input.event_type,
            payload: input.payload,
            actor,
            producer_id: self.producer_id.clone(),
            producer_seq,
            source: input.source,
            metadata: input.metadata,
            refs: input.refs,
            idempotency_key: input.idempotency_key,
            expected_seq: input.expected_seq,
        };

        let token = (**self.token.load()).clone();
        let AppendResponse { seq, deduped, .. } = self
            .append_client
            .append(&self.session_id, &token, &request)
            .await?;
        Ok(AppendOutcome { seq, deduped })
    }

    /// Subscribe to the session log with replay. Starts live-sync on the first
    /// subscriber; live-sync stops once the last subscriber unsubscribes.
    pub fn on_event(
        self: &Arc<Self>,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> EventUnsubscribe {
        let inner = self.log.lock().subscribe(listener, true);
        let was_first = self.event_subscribers.fetch_add(1, Ordering::SeqCst) == 0;
        if was_first {
            self.start_live_sync();
        }
        EventUnsubscribe {
            session: self.clone(),
            inner: Some(inner),
        }
    }

    /// Subscribe to live-sync failures. Unlike `on_event`, does not itself start or
    /// stop live-sync.
    pub fn on_error(
        self: &Arc<Self>,
        listener: impl Fn(&Error) + Send + Sync + 'static,
    ) -> ErrorUnsubscribe {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.error_listeners.lock().push((id, Arc::new(listener)));
        ErrorUnsubscribe {
            session: self.clone(),
            id: Some(id),
        }
    }

    pub(crate) fn emit_error(&self, error: Error) {
        let listeners = self.error_listeners.lock();
        if listeners.is_empty() {
            session_error!(self, "live-sync error with no listeners attached: {error}");
            return;
        }
        for (_, listener) in listeners.iter() {
            listener(&error);
        }
    }

    fn start_live_sync(self: &Arc<Self>) {
        // Gate on `live_sync_cancel` rather than `live_sync_running`: the latter is
        // only flipped back to `false` by the previous run's background task once it
        // notices its cancellation, which can lag an immediate unsubscribe/resubscribe
        // pair on the same tick. `live_sync_cancel` is cleared synchronously by
        // `stop_live_sync_if_no_subscribers`, so it's always current.
        let mut guard = self.live_sync_cancel.lock();
        if guard.is_some() {
            return;
        }
        // A fresh child of the session-wide token for this run only: cancelling it
        // (on last-subscriber-unsubscribe) must stop live-sync without poisoning
        // `self.cancel`, which `disconnect()` and every `tail()` call also share.
        let cancel = self.cancel.child_token();
        *guard = Some(cancel.clone());
        drop(guard);
        self.live_sync_running.store(true, Ordering::SeqCst);
        let session = self.clone();
        let running = self.live_sync_running.clone();
        tokio::spawn(live_sync::run(session, cancel, running));
    }

    fn stop_live_sync_if_no_subscribers(&self) {
        if self.event_subscribers.load(Ordering::SeqCst) == 0 {
            if let Some(cancel) = self.live_sync_cancel.lock().take() {
                cancel.cancel();
            }
        }
    }

    /// Abort live-sync and any open tail streams derived from this session, and
    /// remove all listeners.
    pub fn disconnect(&self) {
        self.cancel.cancel();
        self.error_listeners.lock().clear();
    }

    pub fn get_snapshot(&self) -> LogSnapshot {
        self.log
            .lock()
            .get_snapshot(self.live_sync_running.load(Ordering::SeqCst))
    }

    pub fn set_log_options(&self, max_events: Option<usize>) {
        self.log.lock().set_max_events(max_events);
    }

    /// Build and run a tail stream against this session's configured endpoint and
    /// auth transport, bypassing the session log entirely (unlike `on_event`).
    pub fn tail(self: &Arc<Self>, options: TailOptions) -> impl Stream<Item = Result<TailBatch, Error>> {
        self.build_tail_stream(options, self.cancel.child_token())
    }

    pub(crate) fn build_tail_stream(
        self: &Arc<Self>,
        options: TailOptions,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<TailBatch, Error>> {
        TailStream::new(
            self.session_id.clone(),
            self.config.ws_base.clone(),
            options,
            self.config.resolved_auth_transport(),
            self.token.clone(),
            self.connector.clone(),
            cancel,
        )
        .run()
    }

    pub(crate) fn default_tail_options(&self) -> TailOptions {
        self.config.tail_options.clone()
    }

    pub(crate) fn store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.store.as_ref()
    }

    pub(crate) fn log(&self) -> &Mutex<SessionLog> {
        &self.log
    }

    pub(crate) async fn persist_snapshot(&self) {
        let Some(store) = &self.store else { return };
        let snapshot = self.get_snapshot();
        let state = PersistedSessionState {
            cursor: snapshot.last_seq,
            events: snapshot.events,
        };
        if let Err(source) = store.save(&self.session_id, &state).await {
            self.emit_error(Error::Store {
                session_id: self.session_id.clone(),
                action: "save",
                source,
            });
        }
    }
}

/// Handle returned by [`Session::on_event`]. Dropping it without calling
/// [`unsubscribe`](Self::unsubscribe) leaves the subscription (and live-sync, if it
/// was the last one keeping it alive) active — matching `SessionLog::subscribe`.
pub struct EventUnsubscribe {
    session: Arc<Session>,
    inner: Option<LogUnsubscribe>,
}

impl EventUnsubscribe {
    pub fn unsubscribe(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.unsubscribe();
            self.session.event_subscribers.fetch_sub(1, Ordering::SeqCst);
            self.session.stop_live_sync_if_no_subscribers();
        }
    }
}

/// Handle returned by [`Session::on_error`].
pub struct ErrorUnsubscribe {
    session: Arc<Session>,
    id: Option<u64>,
}

impl ErrorUnsubscribe {
    pub fn unsubscribe(mut self) {
        if let Some(id) = self.id.take() {
            self.session.error_listeners.lock().retain(|(i, _)| *i != id);
        }
    }
}
