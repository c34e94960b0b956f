//! Client-side runtime for a server-hosted, sequence-numbered event log ("session").
//!
//! The server owns durability, ordering, and multi-tenant auth. This crate is
//! responsible for appending events with idempotent producer-sequence semantics,
//! maintaining a durable streaming tail that reconnects and resumes without gaps or
//! duplicates, holding a canonical in-memory log keyed by server sequence number, and
//! exposing replayable subscriptions to callers.
//!
//! The entry point is [`Session`]: bind an [`Identity`], a [`ClientConfig`], and a
//! [`transport::Connector`], then use [`Session::append`], [`Session::on_event`], or
//! [`Session::tail`]/[`session::consume`] depending on whether you want the canonical
//! log, a raw batch stream, or a durably-checkpointed consumer.

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod http_client;
pub mod identity;
pub mod log;
pub mod retry;
pub mod session;
pub mod store;
pub mod tail;
pub mod transport;

pub use config::{AuthTransport, ClientBuilder, ClientConfig};
pub use error::{Error, StoreError};
pub use event::Event;
pub use identity::{Identity, IdentityKind};
pub use log::{LogSnapshot, SessionLog};
pub use retry::{BackoffMode, ExponentialBackoff, ReconnectPolicy};
pub use session::{consume, AppendInput, AppendOutcome, ConsumeOptions, Session};
pub use store::{CursorStore, PersistedSessionState, SessionStore};
pub use tail::{LifecycleEvent, TailBatch, TailOptions};
