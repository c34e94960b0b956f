use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

use super::{session_debug, session_error, session_warn, Session};

/// Background task driving one session's live-sync: while any `event` subscriber is
/// attached and the session isn't cancelled, keep a tail stream running from
/// `log.last_seq()`, apply every batch to the log, and persist a snapshot on each
/// successful apply.
///
/// A gap error is swallowed and restarts the tail immediately from the (unchanged)
/// `last_seq` — the server replays the missing interval on the next connect. Any
/// other error (conflict, retry-limit, backpressure, ...) is handed to the session's
/// error listeners and also restarts the loop, matching the design's "loop forever"
/// contract: only cancellation stops live-sync for good.
pub(super) async fn run(session: Arc<Session>, cancel: CancellationToken, running: Arc<AtomicBool>) {
    while !cancel.is_cancelled() {
        let cursor = session.log().lock().last_seq();
        let mut options = session.default_tail_options();
        options.cursor = cursor;

        session_debug!(session, "live-sync starting tail from cursor {cursor}");
        let mut stream = Box::pin(session.build_tail_stream(options, cancel.child_token()));

        let mut gap_restart = false;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                item = stream.next() => item,
            };

            match next {
                None => break,
                Some(Ok(batch)) => {
                    let applied = session.log().lock().apply_batch(batch.into_events());
                    match applied {
                        Ok(_) => session.persist_snapshot().await,
                        Err(Error::LogGap { expected, got }) => {
                            session_warn!(
                                session,
                                "log gap (expected seq {expected}, got {got}); restarting tail from last_seq"
                            );
                            gap_restart = true;
                            break;
                        }
                        Err(e) => {
                            session_error!(session, "live-sync apply error: {e}");
                            session.emit_error(e);
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    session_error!(session, "live-sync tail error: {e}");
                    session.emit_error(e);
                    break;
                }
            }
        }
        let _ = gap_restart;

        if cancel.is_cancelled() {
            break;
        }
    }

    session_debug!(session, "live-sync stopped");
    running.store(false, Ordering::SeqCst);
}
