use thiserror::Error;

/// Error taxonomy for the session client.
///
/// Variants map directly onto the kinds in the design's error-handling section:
/// each one names a recovery strategy rather than a class of exception.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration: empty base URL, invalid `max_events`, negative cursor, etc.
    #[error("config error: {0}")]
    Config(String),

    /// The websocket factory or URL resolution failed and retries are disabled or exhausted.
    #[error("connect error: {0}")]
    Connect(String),

    /// Transport error or abnormal close while retries are disabled.
    #[error("stream error: {0}")]
    Stream(String),

    /// The reconnect policy's attempt budget was exhausted.
    #[error("retry limit exceeded after {attempts} attempt(s){}", format_close(.close_code, .close_reason))]
    RetryLimit {
        attempts: u32,
        close_code: Option<u16>,
        close_reason: Option<String>,
    },

    /// The server closed the tail with a token-expired signal (code 4001 or reason
    /// `"token_expired"`). The caller should mint a new token and start a fresh stream.
    #[error("session token expired")]
    TokenExpired,

    /// The consumer could not keep up: more than `max_buffered_batches` batches were queued.
    #[error("consumer backpressure: more than {max_buffered_batches} batch(es) queued")]
    ConsumerBackpressure { max_buffered_batches: usize },

    /// Internal: the session log received a non-contiguous `seq`. Live-sync swallows this
    /// and restarts the tail from `last_seq`; other callers surface it.
    #[error("log gap: expected seq {expected}, got {got}")]
    LogGap { expected: u64, got: u64 },

    /// A retained `seq` was re-applied with a different fingerprint.
    #[error("log conflict at seq {seq}: duplicate event does not match retained copy")]
    LogConflict { seq: u64 },

    /// A session or cursor store's `load`/`save`/`clear` call failed.
    #[error("cursor/session store error for session {session_id} during {action}: {source}")]
    Store {
        session_id: String,
        action: &'static str,
        #[source]
        source: StoreError,
    },

    /// The server returned a non-2xx HTTP response.
    #[error("api error (status {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// A transport-level failure or a response body that could not be parsed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A tail frame failed to decode: non-UTF-8, non-JSON, or failed event-schema validation.
    #[error("frame decode error: {0}")]
    FrameDecode(String),
}

fn format_close(code: &Option<u16>, reason: &Option<String>) -> String {
    match (code, reason) {
        (Some(c), Some(r)) => format!(" (close code {c}, reason {r:?})"),
        (Some(c), None) => format!(" (close code {c})"),
        (None, Some(r)) => format!(" (reason {r:?})"),
        (None, None) => String::new(),
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::FrameDecode(value.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Connection(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Connect(value.to_string())
    }
}

/// Error surfaced by a [`crate::store::SessionStore`] or [`crate::store::CursorStore`]
/// implementation. Kept separate from [`Error`] so store adapters don't need to depend
/// on the rest of the client's error taxonomy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{0}")]
    Other(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn other(msg: impl Into<String>) -> Self {
        StoreError::Other(msg.into())
    }
}
