//! End-to-end scenarios against `Session::tail`, driven by a scripted fake
//! websocket connector: reconnect/resume, batch framing, agent filtering,
//! backpressure, token expiry, retry-limit exhaustion, and abort.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use session_tail_client::{Error, LifecycleEvent, TailOptions};

use common::{
    ev, fast_reconnect_policy, graceful_close, limited_reconnect_policy, test_session, text_frame,
    token_expired_close, FakeConnector,
};

#[tokio::test]
async fn reconnect_resumes_from_last_delivered_cursor() {
    let connector = FakeConnector::script(vec![
        vec![text_frame(vec![ev(1, "agent:a")])],
        vec![text_frame(vec![ev(2, "agent:a")]), graceful_close()],
    ]);
    let session = test_session(connector.clone());

    let mut stream = Box::pin(session.tail(TailOptions::default().reconnect_policy(fast_reconnect_policy())));
    let mut seqs = Vec::new();
    while let Some(batch) = stream.next().await {
        let batch = batch.unwrap();
        seqs.extend(batch.into_events().into_iter().map(|e| e.seq));
    }

    assert_eq!(seqs, vec![1, 2]);
    let urls = connector.urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].contains("cursor=0"), "first url: {}", urls[0]);
    assert!(urls[1].contains("cursor=1"), "second url: {}", urls[1]);
}

#[tokio::test]
async fn single_frame_with_multiple_events_is_delivered_as_one_batch() {
    let connector = FakeConnector::script(vec![
        vec![text_frame(vec![ev(1, "agent:a"), ev(2, "agent:a")])],
        vec![graceful_close()],
    ]);
    let session = test_session(connector.clone());

    let mut stream = Box::pin(session.tail(TailOptions::default().reconnect_policy(fast_reconnect_policy())));

    let batch = stream.next().await.unwrap().unwrap();
    let events = batch.into_events();
    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);

    assert!(stream.next().await.is_none());
    assert!(connector.urls()[1].contains("cursor=2"), "{}", connector.urls()[1]);
}

#[tokio::test]
async fn agent_filter_drops_other_actors_but_cursor_still_advances_past_them() {
    let connector = FakeConnector::script(vec![
        vec![text_frame(vec![ev(1, "agent:other"), ev(2, "agent:drafter")])],
        vec![graceful_close()],
    ]);
    let session = test_session(connector.clone());

    let options = TailOptions::default()
        .agent("drafter")
        .reconnect_policy(fast_reconnect_policy());
    let mut stream = Box::pin(session.tail(options));

    let batch = stream.next().await.unwrap().unwrap();
    let events = batch.into_events();
    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2]);

    assert!(stream.next().await.is_none());
    // Cursor tracks the filtered-out event (seq 1) too, not just the delivered one.
    assert!(connector.urls()[1].contains("cursor=2"), "{}", connector.urls()[1]);
}

#[tokio::test]
async fn backpressure_trips_on_overflow_without_losing_the_error() {
    let connector = FakeConnector::script(vec![vec![
        text_frame(vec![ev(1, "agent:a")]),
        text_frame(vec![ev(2, "agent:a")]),
        text_frame(vec![ev(3, "agent:a")]),
    ]]);
    let session = test_session(connector.clone());

    let options = TailOptions::default()
        .max_buffered_batches(1)
        .reconnect_policy(fast_reconnect_policy());
    let mut stream = Box::pin(session.tail(options));

    // Let the background producer race ahead of this (non-reading) consumer long
    // enough to trip the one-batch buffer limit.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.into_events()[0].seq, 1);

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(
        matches!(err, Error::ConsumerBackpressure { max_buffered_batches: 1 }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn token_expiry_close_code_ends_the_stream_without_reconnecting() {
    let connector = FakeConnector::script(vec![vec![token_expired_close()]]);
    let session = test_session(connector.clone());

    let mut stream = Box::pin(session.tail(TailOptions::default().reconnect_policy(fast_reconnect_policy())));

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::TokenExpired), "unexpected error: {err}");
    assert!(stream.next().await.is_none());
    assert_eq!(connector.urls().len(), 1, "token expiry must not trigger a reconnect attempt");
}

#[tokio::test]
async fn retry_limit_exhausted_surfaces_a_retry_limit_error() {
    // Two connections, each ending with no events: a drop with no progress, so the
    // backoff budget never resets.
    let connector = FakeConnector::script(vec![vec![], vec![]]);
    let session = test_session(connector.clone());

    let options = TailOptions::default().reconnect_policy(limited_reconnect_policy(1));
    let mut stream = Box::pin(session.tail(options));

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(
        matches!(err, Error::RetryLimit { attempts: 2, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(connector.urls().len(), 2);
}

#[tokio::test]
async fn lifecycle_observer_sees_connect_attempts_and_reconnect_scheduling() {
    let connector = FakeConnector::script(vec![
        vec![text_frame(vec![ev(1, "agent:a")])],
        vec![graceful_close()],
    ]);
    let session = test_session(connector.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let options = TailOptions::default()
        .reconnect_policy(fast_reconnect_policy())
        .on_lifecycle_event(move |event| seen_clone.lock().unwrap().push(event));

    let mut stream = Box::pin(session.tail(options));
    while let Some(batch) = stream.next().await {
        batch.unwrap();
    }

    let seen = seen.lock().unwrap();
    assert!(
        seen.iter().any(|e| matches!(e, LifecycleEvent::ConnectAttempt { attempt: 1, cursor: 0 })),
        "{seen:?}"
    );
    assert!(
        seen.iter().any(|e| matches!(e, LifecycleEvent::ReconnectScheduled { .. })),
        "{seen:?}"
    );
    assert!(
        seen.iter().any(|e| matches!(e, LifecycleEvent::StreamEnded { .. })),
        "{seen:?}"
    );
}

#[tokio::test]
async fn aborting_mid_wait_ends_the_stream_with_no_further_connects() {
    let connector = FakeConnector::script_hanging(vec![]);
    let session = test_session(connector.clone());

    let mut stream = Box::pin(session.tail(TailOptions::default().reconnect_policy(fast_reconnect_policy())));

    // Let the background driver connect and settle into its (forever-pending) read
    // wait before cancelling, so the cancel genuinely lands mid-wait rather than
    // racing the very first poll.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.urls().len(), 1);

    session.disconnect();

    assert!(stream.next().await.is_none());
    assert_eq!(connector.urls().len(), 1, "aborting must not open a new connection");
}
