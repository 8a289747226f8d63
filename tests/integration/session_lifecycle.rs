use crate::integration::support::{
    chunk, completion, config, done, eventually, frame, manager, routed_chunk, stop, table, TABLE,
};
use gentable::error::{ApiError, ErrorKind};
use gentable::session::{ScriptedBackend, SessionConfig, SessionRequest, SessionState};
use gentable::table::CellStatus;
use gentable::types::CellAddress;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn addr(row: &str, column: &str) -> CellAddress {
    CellAddress::new(row, column)
}

#[tokio::test]
async fn basic_concatenation() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    assert_eq!(store.status(&addr("r1", "a")), CellStatus::Streaming(handle.id()));

    for part in ["Hel", "lo ", "world"] {
        feed.send(chunk(part));
    }
    feed.send(done());

    let report = handle.wait().await;
    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "Hello world");
    assert_eq!(store.status(&addr("r1", "a")), CellStatus::Idle);
    assert!(manager.active_sessions().is_empty());
    assert_eq!(backend.requests()[0].prompts[0].user_prompt, "Answer: one");
}

#[tokio::test]
async fn malformed_frame_is_skipped() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("Hel"));
    feed.send("data: {\"object\":\"chat.completion.chunk\",\"choices\":[\n\n");
    feed.send(chunk("lo"));
    feed.send(stop());

    let report = handle.wait().await;
    assert!(report.is_success());
    assert_eq!(report.malformed_frames, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "Hello");
}

#[tokio::test]
async fn unexpected_event_kind_is_recovered() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(frame(&json!({ "object": "chat.telemetry", "value": 1 })));
    feed.send(chunk("ok"));
    feed.send(done());

    let report = handle.wait().await;
    assert!(report.is_success());
    assert_eq!(report.malformed_frames, 0);
    assert_eq!(report.skipped_events, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "ok");
}

#[tokio::test]
async fn unknown_event_kinds_do_not_exhaust_malformed_limit() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let config = SessionConfig {
        max_malformed_frames: 2,
        ..config()
    };
    let manager = manager(&registry, &backend, config);

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    for _ in 0..5 {
        feed.send(frame(&json!({ "object": "chat.telemetry" })));
    }
    feed.send(chunk("kept"));
    feed.send(stop());

    let report = handle.wait().await;
    assert!(report.is_success());
    assert_eq!(report.malformed_frames, 0);
    assert_eq!(report.skipped_events, 5);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "kept");
}

#[tokio::test]
async fn references_before_content() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(frame(&json!({
        "object": "chat.references",
        "chunks": [{ "text": "source text", "title": "Doc", "chunk_id": "c1" }],
        "search_query": "one",
        "finish_reason": "stop"
    })));
    // references finish_reason does not end the cell
    feed.send(chunk("grounded"));
    feed.send(done());

    let report = handle.wait().await;
    assert!(report.is_success());
    let cell = store.cell(&addr("r1", "a")).unwrap();
    assert_eq!(cell.value, "grounded");
    assert_eq!(cell.references.len(), 1);
    assert_eq!(cell.references[0].title, "Doc");
}

#[tokio::test]
async fn done_is_idempotent() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(format!("{}{}{}{}", chunk("final"), done(), done(), chunk("late")));

    let report = handle.wait().await;
    assert!(report.is_success());
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "final");
    // the transport is closed once the session completes
    eventually(|| feed.is_closed()).await;
}

#[tokio::test]
async fn cancel_reverts_every_target() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());
    let targets = vec![addr("r1", "a"), addr("r2", "a"), addr("r3", "a")];

    let handle = manager
        .start_session(SessionRequest::new(TABLE, targets.clone(), true))
        .unwrap();
    feed.send(routed_chunk("r1", "a", "partial one", None));
    feed.send(routed_chunk("r2", "a", "partial two", None));
    eventually(|| {
        store.cell(&addr("r2", "a")).map(|c| c.value) == Some("partial two".to_string())
    })
    .await;

    manager.cancel_session(&handle);
    assert_eq!(handle.state(), SessionState::Cancelled);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
    assert_eq!(store.cell(&addr("r2", "a")).unwrap().value, "old-2");
    assert!(store.cell(&addr("r3", "a")).is_none());
    assert!(targets.iter().all(|t| store.status(t) == CellStatus::Idle));

    // frames arriving after the cancel are discarded
    feed.send(routed_chunk("r1", "a", " late", None));
    let report = handle.wait().await;
    assert_eq!(report.state, SessionState::Cancelled);
    assert_eq!(report.error(), Some(ApiError::Cancelled(handle.id())));
    assert_eq!(report.reverted.len(), 3);
    eventually(|| feed.is_closed()).await;
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    manager.cancel_session(&handle);
    manager.cancel_session(&handle);
    assert_eq!(handle.wait().await.state, SessionState::Cancelled);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
    // cancelled while pending: the transport was never opened
    assert_eq!(backend.open_count(), 0);

    // the queued channel goes to the next session; cancelling it once
    // completed changes nothing
    let second = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("kept"));
    feed.send(done());
    assert!(second.wait().await.is_success());
    assert_eq!(backend.open_count(), 1);
    manager.cancel_session(&second);
    assert_eq!(second.state(), SessionState::Completed);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "kept");
}

#[tokio::test]
async fn transport_failure_reverts() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("half"));
    feed.fail("connection reset");

    let report = handle.wait().await;
    assert_eq!(
        report.state,
        SessionState::Failed(ApiError::TransportError("connection reset".to_string()))
    );
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
}

#[tokio::test]
async fn truncated_stream_fails() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r3", "a")], true))
        .unwrap();
    feed.send(chunk("cut"));
    // a frame cut mid-way, then the connection closes
    feed.send("data: {\"object\":\"chat.completion.chu");
    drop(feed);

    let report = handle.wait().await;
    assert!(matches!(report.state, SessionState::Failed(ApiError::TransportError(_))));
    assert!(store.cell(&addr("r3", "a")).is_none());
}

#[tokio::test]
async fn backend_error_is_scoped_to_one_cell() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(
            TABLE,
            vec![addr("r1", "a"), addr("r2", "a")],
            true,
        ))
        .unwrap();
    feed.send(frame(&json!({
        "object": "chat.completion.chunk",
        "row_id": "r1",
        "output_column_name": "a",
        "choices": [],
        "error": { "message": "context length exceeded" }
    })));
    feed.send(routed_chunk("r2", "a", "fine", Some("stop")));

    let report = handle.wait().await;
    assert!(report.is_success());
    assert_eq!(report.cell_errors.len(), 1);
    let failed = store.cell(&addr("r1", "a")).unwrap();
    assert_eq!(failed.error.unwrap().kind, ErrorKind::BackendError);
    assert_eq!(store.cell(&addr("r2", "a")).unwrap().value, "fine");
}

#[tokio::test]
async fn open_is_retried_before_streaming() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_failure(ApiError::ProviderRequestFailed("HTTP 503".to_string()));
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("second try"));
    feed.send(done());

    assert!(handle.wait().await.is_success());
    assert_eq!(backend.open_count(), 2);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "second try");
}

#[tokio::test]
async fn non_retryable_open_failure_reverts() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_failure(ApiError::InvalidRequest("HTTP 400: bad".to_string()));
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    let report = handle.wait().await;
    assert!(matches!(report.state, SessionState::Failed(ApiError::InvalidRequest(_))));
    assert_eq!(backend.open_count(), 1);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
    assert!(!store.has_active_sessions());
}

#[tokio::test]
async fn malformed_threshold_escalates() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let config = SessionConfig {
        max_malformed_frames: 2,
        ..config()
    };
    let manager = manager(&registry, &backend, config);

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("x"));
    for _ in 0..3 {
        feed.send("data: not json\n\n");
    }

    let report = handle.wait().await;
    assert!(matches!(report.state, SessionState::Failed(ApiError::TransportError(_))));
    assert_eq!(report.malformed_frames, 3);
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let config = SessionConfig {
        idle_timeout_ms: Some(100),
        ..config()
    };
    let manager = manager(&registry, &backend, config);

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("stalled"));

    let report = handle.wait().await;
    assert!(matches!(report.state, SessionState::Failed(ApiError::TransportError(_))));
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
}

#[tokio::test]
async fn non_streaming_array_fills_each_target() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::cross(TABLE, &["r1", "r2"], &["b"], false))
        .unwrap();
    let body = json!([
        {
            "object": "chat.completion",
            "row_id": "r1",
            "output_column_name": "b",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "first" }, "finish_reason": "stop" }]
        },
        {
            "object": "chat.completion",
            "row_id": "r2",
            "output_column_name": "b",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "second", "reasoning_content": "because" }, "finish_reason": "stop" }]
        }
    ])
    .to_string();
    let (head, tail) = body.split_at(body.len() / 2);
    feed.send(head.to_string());
    feed.send(tail.to_string());
    drop(feed);

    let report = handle.wait().await;
    assert!(report.is_success());
    assert!(!backend.requests()[0].stream);
    assert_eq!(store.cell(&addr("r1", "b")).unwrap().value, "first");
    let second = store.cell(&addr("r2", "b")).unwrap();
    assert_eq!(second.value, "second");
    assert_eq!(second.reasoning_content.as_deref(), Some("because"));
}

#[tokio::test]
async fn oversized_non_streaming_body_fails() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let config = SessionConfig {
        max_frame_bytes: 64,
        ..config()
    };
    let manager = manager(&registry, &backend, config);

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], false))
        .unwrap();
    let body = completion(&"x".repeat(200)).to_string();
    for piece in body.as_bytes().chunks(16) {
        feed.send(piece.to_vec());
    }

    let report = handle.wait().await;
    assert!(matches!(report.state, SessionState::Failed(ApiError::TransportError(_))));
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "old-1");
    eventually(|| feed.is_closed()).await;
}

#[tokio::test]
async fn subscriber_sees_ordered_progress() {
    let (registry, _store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = manager
        .subscribe(TABLE, addr("r1", "a"), move |update| {
            sink.lock().push((
                update.version,
                update.cell.as_ref().map(|c| c.value.clone()),
                update.status,
            ));
        })
        .unwrap();

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    feed.send(chunk("a"));
    feed.send(chunk("b"));
    feed.send(done());
    handle.wait().await;

    let seen = seen.lock().clone();
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    let last = seen.last().unwrap();
    assert_eq!(last.1.as_deref(), Some("ab"));
    assert_eq!(last.2, CellStatus::Idle);
    assert_eq!(seen.first().unwrap().1.as_deref(), Some(""));

    subscription.unsubscribe();
}
