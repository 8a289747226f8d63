use crate::integration::support::{chunk, config, done, eventually, manager, table, TABLE};
use gentable::error::ApiError;
use gentable::session::{ScriptedBackend, SessionRequest, SessionState};
use gentable::table::CellStatus;
use gentable::types::CellAddress;
use std::sync::Arc;

fn addr(row: &str, column: &str) -> CellAddress {
    CellAddress::new(row, column)
}

#[tokio::test]
async fn conflicting_session_is_rejected_before_io() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let first = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    eventually(|| first.state() == SessionState::Streaming).await;
    assert_eq!(backend.open_count(), 1);

    let err = manager
        .start_session(SessionRequest::new(
            TABLE,
            vec![addr("r2", "a"), addr("r1", "a")],
            true,
        ))
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::SessionConflict {
            address: addr("r1", "a"),
            active: first.id(),
        }
    );
    tokio::task::yield_now().await;
    assert_eq!(backend.open_count(), 1);
    assert_eq!(store.status(&addr("r2", "a")), CellStatus::Idle);
    assert_eq!(store.cell(&addr("r2", "a")).unwrap().value, "old-2");
    assert_eq!(manager.active_sessions(), vec![first.id()]);

    feed.send(chunk("done"));
    feed.send(done());
    assert!(first.wait().await.is_success());
}

#[tokio::test]
async fn disjoint_sessions_run_concurrently() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed_one = backend.push_channel();
    let feed_two = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let one = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true))
        .unwrap();
    let two = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r1", "b")], true))
        .unwrap();
    assert_eq!(manager.active_sessions().len(), 2);

    // which feed each session got depends on open order; feed both streams
    for feed in [&feed_one, &feed_two] {
        feed.send(chunk("same"));
        feed.send(done());
    }
    assert!(one.wait().await.is_success());
    assert!(two.wait().await.is_success());
    assert_eq!(store.cell(&addr("r1", "a")).unwrap().value, "same");
    assert_eq!(store.cell(&addr("r1", "b")).unwrap().value, "same");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_admit_exactly_one() {
    let (registry, _store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let _feeds: Vec<_> = (0..8).map(|_| backend.push_channel()).collect();
    let manager = Arc::new(manager(&registry, &backend, config()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager
                .start_session(SessionRequest::new(TABLE, vec![addr("r3", "b")], true))
                .map(|handle| handle.id())
        }));
    }

    let mut admitted = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(id) => admitted.push(id),
            Err(ApiError::SessionConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(admitted.len(), 1);

    let handle = manager.session(admitted[0]).unwrap();
    manager.cancel_session(&handle);
    assert_eq!(handle.wait().await.state, SessionState::Cancelled);
}

#[tokio::test]
async fn editing_cell_blocks_generation() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let manager = manager(&registry, &backend, config());

    store.begin_edit(&addr("r1", "a")).unwrap();
    let result = manager.start_session(SessionRequest::new(TABLE, vec![addr("r1", "a")], true));
    assert!(matches!(result, Err(ApiError::CellBusy(_))));
    store.end_edit(&addr("r1", "a"));
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test]
async fn table_lifecycle_guards_active_sessions() {
    let (registry, store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.push_channel();
    let manager = manager(&registry, &backend, config());

    let handle = manager
        .start_session(SessionRequest::new(TABLE, vec![addr("r2", "a")], true))
        .unwrap();
    assert!(matches!(registry.dispose(TABLE), Err(ApiError::CellBusy(_))));
    assert!(matches!(store.delete_row("r2"), Err(ApiError::CellBusy(_))));

    feed.send(chunk("x"));
    feed.send(done());
    handle.wait().await;
    registry.dispose(TABLE).unwrap();

    let result = manager.start_session(SessionRequest::new(TABLE, vec![addr("r2", "a")], true));
    assert!(matches!(result, Err(ApiError::TableNotFound(_))));
}

#[tokio::test]
async fn empty_request_is_invalid() {
    let (registry, _store) = table();
    let backend = Arc::new(ScriptedBackend::new());
    let manager = manager(&registry, &backend, config());
    assert!(matches!(
        manager.start_session(SessionRequest::new(TABLE, vec![], true)),
        Err(ApiError::InvalidRequest(_))
    ));
}
