use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;

use crate::error::Error;
use crate::event::Event;
use crate::store::CursorStore;
use crate::tail::TailOptions;

use super::Session;

/// Options for [`consume`]: an optional explicit starting cursor (otherwise loaded
/// from the cursor store) plus the underlying tail configuration. `tail.cursor` is
/// overwritten by the resolved starting cursor before the tail is started.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    pub cursor: Option<u64>,
    pub tail: TailOptions,
}

impl ConsumeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(mut self, cursor: u64) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn tail(mut self, tail: TailOptions) -> Self {
        self.tail = tail;
        self
    }
}

/// Durable consume: a shallow wrapper around [`Session::tail`] that loads the
/// starting cursor from `cursor_store` when the caller didn't pass one explicitly,
/// and checkpoints `event.seq` to the store after the handler for that event returns
/// successfully — a crash mid-handler replays that event on the next run; a crash
/// after the checkpoint never does.
///
/// A cursor-store load/save failure surfaces as [`Error::Store`], naming the session
/// and the failing stage. A handler error propagates immediately, leaving the last
/// successfully saved cursor untouched.
pub async fn consume<H, Fut>(
    session: &Arc<Session>,
    cursor_store: Arc<dyn CursorStore>,
    options: ConsumeOptions,
    mut handler: H,
) -> Result<(), Error>
where
    H: FnMut(Event) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let session_id = session.session_id().to_string();

    let starting_cursor = match options.cursor {
        Some(cursor) => cursor,
        None => cursor_store
            .load(&session_id)
            .await
            .map_err(|source| Error::Store {
                session_id: session_id.clone(),
                action: "load",
                source,
            })?
            .unwrap_or(0),
    };

    let mut tail_options = options.tail;
    tail_options.cursor = starting_cursor;

    let mut stream = Box::pin(session.tail(tail_options));
    while let Some(item) = stream.next().await {
        let batch = item?;
        for event in batch.into_events() {
            let seq = event.seq;
            handler(event).await?;
            cursor_store
                .save(&session_id, seq)
                .await
                .map_err(|source| Error::Store {
                    session_id: session_id.clone(),
                    action: "save",
                    source,
                })?;
        }
    }
    Ok(())
}
