use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::retry::ReconnectPolicy;

use super::stream::LifecycleEvent;

/// An `onLifecycleEvent` callback, wrapped so [`TailOptions`] can still derive `Debug`.
#[derive(Clone)]
pub struct LifecycleObserver(pub(crate) Arc<dyn Fn(LifecycleEvent) + Send + Sync>);

impl LifecycleObserver {
    pub fn new(f: impl Fn(LifecycleEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for LifecycleObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LifecycleObserver(..)")
    }
}

/// Configuration for one tail stream. All fields carry the defaults documented for
/// the wire protocol; `TailOptions::default()` matches the out-of-the-box behavior
/// of a `follow = true` live tail.
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Initial cursor; the stream only observes events with `seq > cursor`.
    pub cursor: u64,
    /// Hint passed to the server as the `batch_size` query parameter.
    pub batch_size: Option<u32>,
    /// Keep only events whose `actor == "agent:" + agent`.
    pub agent: Option<String>,
    /// `true`: stay open forever, reconnecting on drop. `false`: replay mode, closing
    /// once `catch_up_idle` has elapsed without a message.
    pub follow: bool,
    /// Whether the reconnect policy is active. Forced off when `follow` is false.
    pub reconnect: bool,
    pub reconnect_policy: ReconnectPolicy,
    /// Idle window for replay mode before the stream considers itself caught up.
    pub catch_up_idle: Duration,
    /// Max time from connect attempt to `open`.
    pub connection_timeout: Option<Duration>,
    /// Max time between frames once open; `None` disables the watchdog.
    pub inactivity_timeout: Option<Duration>,
    /// Queue size before backpressure fails the stream. `0` disables the limit.
    pub max_buffered_batches: usize,
    /// Observer for `{connect_attempt, reconnect_scheduled, stream_dropped,
    /// stream_ended}`, called synchronously from the driving task.
    pub on_lifecycle_event: Option<LifecycleObserver>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            cursor: 0,
            batch_size: None,
            agent: None,
            follow: true,
            reconnect: true,
            reconnect_policy: ReconnectPolicy::default(),
            catch_up_idle: Duration::from_millis(1000),
            connection_timeout: Some(Duration::from_millis(4000)),
            inactivity_timeout: None,
            max_buffered_batches: 1024,
            on_lifecycle_event: None,
        }
    }
}

impl TailOptions {
    /// Whether reconnects are actually active for this stream: `follow` must be set,
    /// and the caller must not have explicitly disabled `reconnect`.
    pub fn reconnect_enabled(&self) -> bool {
        self.follow && self.reconnect
    }

    pub fn cursor(mut self, cursor: u64) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn batch_size(mut self, n: u32) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn catch_up_idle(mut self, d: Duration) -> Self {
        self.catch_up_idle = d;
        self
    }

    pub fn connection_timeout(mut self, d: Option<Duration>) -> Self {
        self.connection_timeout = d;
        self
    }

    pub fn inactivity_timeout(mut self, d: Option<Duration>) -> Self {
        self.inactivity_timeout = d;
        self
    }

    pub fn max_buffered_batches(mut self, n: usize) -> Self {
        self.max_buffered_batches = n;
        self
    }

    pub fn on_lifecycle_event(
        mut self,
        observer: impl Fn(LifecycleEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_lifecycle_event = Some(LifecycleObserver::new(observer));
        self
    }
}
