#[path = "helpers/mod.rs"]
mod helpers;

use futures::future::join_all;
use helpers::{drain, file, initiate, setup_engine, setup_engine_with, tenant, test_config, QUOTA_LIMIT};
use upsync_core::models::{ProgressStatus, SessionStatus};
use upsync_core::{AppError, OutOfOrderPolicy, Room, ServerEvent};
use upsync_engine::ChunkDisposition;
use uuid::Uuid;

#[tokio::test]
async fn test_quota_boundary_is_inclusive() {
    let (engine, _store) = setup_engine();
    let (owner, company_id) = tenant();

    let exact = engine
        .initiate(owner, company_id, None, vec![file("full.bin", QUOTA_LIMIT)])
        .await;
    assert!(exact.is_ok());

    let over = engine
        .initiate(owner, company_id, None, vec![file("one-more.bin", 1)])
        .await;
    assert!(matches!(
        over,
        Err(AppError::QuotaExceeded { requested: 1, available: 0, .. })
    ));

    let (_, other_company) = tenant();
    let over_fresh = engine
        .initiate(owner, other_company, None, vec![file("big.bin", QUOTA_LIMIT + 1)])
        .await;
    assert!(matches!(over_fresh, Err(AppError::QuotaExceeded { .. })));
    let quota = engine.quota(other_company).await.unwrap();
    assert_eq!(quota.pending_bytes, 0);
    assert_eq!(quota.active_reservations, 0);
    assert!(engine.company_sessions(other_company).await.is_empty());
}

#[tokio::test]
async fn test_limit_cannot_drop_below_in_flight_reservations() {
    let (engine, _store) = setup_engine();
    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("clip.mov", 800)]).await;

    assert!(matches!(
        engine.set_quota_limit(company_id, 100).await,
        Err(AppError::InvalidInput(_))
    ));

    engine
        .record_chunk(snapshot.session.id, 0, 0, 800, 1)
        .await
        .unwrap();
    let quota = engine.quota(company_id).await.unwrap();
    assert_eq!(quota.quota.storage_used_bytes, 800);
    assert_eq!(quota.quota.storage_limit_bytes, QUOTA_LIMIT);
    assert!(quota.quota.storage_used_bytes <= quota.quota.storage_limit_bytes);
}

#[tokio::test]
async fn test_empty_manifest_is_rejected_before_reserving() {
    let (engine, _store) = setup_engine();
    let (owner, company_id) = tenant();

    let result = engine.initiate(owner, company_id, None, Vec::new()).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    let zero_sized = engine
        .initiate(owner, company_id, None, vec![file("empty.txt", 0)])
        .await;
    assert!(matches!(zero_sized, Err(AppError::InvalidInput(_))));

    let quota = engine.quota(company_id).await.unwrap();
    assert_eq!(quota.active_reservations, 0);
    assert_eq!(engine.stats().await.live_sessions, 0);
}

#[tokio::test]
async fn test_single_chunk_file_completes_in_one_call() {
    let (engine, _store) = setup_engine();
    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("tiny.txt", 512)]).await;
    assert_eq!(snapshot.files[0].total_chunks, 1);

    let receipt = engine
        .record_chunk(snapshot.session.id, 0, 0, 512, 1)
        .await
        .unwrap();

    assert_eq!(
        receipt.disposition,
        ChunkDisposition::Applied {
            chunks: 1,
            completed: true
        }
    );
    assert_eq!(receipt.progress.status, ProgressStatus::Completed);
    assert!(receipt.progress.started_at.is_some());
    assert!(receipt.progress.completed_at.is_some());
}

#[tokio::test]
async fn test_redelivered_chunk_is_a_no_op() {
    let (engine, _store) = setup_engine();
    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("clip.mp4", 1_000)]).await;
    let session_id = snapshot.session.id;

    let first = engine.record_chunk(session_id, 0, 0, 250, 4).await.unwrap();

    let (connection, mut subscription) = engine.connect();
    engine.join_session_room(session_id, connection).await.unwrap();
    drain(&mut subscription);

    let again = engine.record_chunk(session_id, 0, 0, 250, 4).await.unwrap();
    assert_eq!(again.disposition, ChunkDisposition::Duplicate);
    assert_eq!(again.progress.bytes_uploaded, first.progress.bytes_uploaded);
    assert_eq!(again.progress.current_chunk, first.progress.current_chunk);
    assert!(drain(&mut subscription).is_empty());
}

#[tokio::test]
async fn test_out_of_order_chunks_are_buffered_and_bytes_never_decrease() {
    let (engine, _store) = setup_engine();
    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("scan.tif", 1_000)]).await;
    let session_id = snapshot.session.id;

    let mut last_bytes = 0;
    let mut dispositions = Vec::new();
    for chunk_index in [0, 2, 1, 3] {
        let receipt = engine
            .record_chunk(session_id, 0, chunk_index, 250, 4)
            .await
            .unwrap();
        assert!(receipt.progress.bytes_uploaded >= last_bytes);
        last_bytes = receipt.progress.bytes_uploaded;
        dispositions.push(receipt.disposition);
    }

    assert_eq!(
        dispositions,
        vec![
            ChunkDisposition::Applied {
                chunks: 1,
                completed: false
            },
            ChunkDisposition::Buffered,
            ChunkDisposition::Applied {
                chunks: 2,
                completed: false
            },
            ChunkDisposition::Applied {
                chunks: 1,
                completed: true
            },
        ]
    );
    assert_eq!(last_bytes, 1_000);
}

#[tokio::test]
async fn test_reject_policy_refuses_chunks_ahead_of_sequence() {
    let (engine, _store) = setup_engine_with(upsync_core::EngineConfig {
        out_of_order_policy: OutOfOrderPolicy::Reject,
        ..test_config()
    });
    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("scan.tif", 1_000)]).await;

    let result = engine
        .record_chunk(snapshot.session.id, 0, 2, 250, 4)
        .await;
    assert!(matches!(
        result,
        Err(AppError::ChunkOutOfOrder {
            expected: 0,
            received: 2
        })
    ));
    let state = engine.get_session(snapshot.session.id).await.unwrap();
    assert_eq!(state.files[0].status, ProgressStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_sessions_never_exceed_limit() {
    let (engine, _store) = setup_engine();
    let (owner, company_id) = tenant();

    let attempts = (0..10).map(|i| {
        engine.initiate(
            owner,
            company_id,
            None,
            vec![file(&format!("part-{}.bin", i), 300_000)],
        )
    });
    let results = join_all(attempts).await;
    let sessions: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(sessions.len(), 6);

    for snapshot in &sessions {
        engine
            .record_chunk(snapshot.session.id, 0, 0, 300_000, 1)
            .await
            .unwrap();
        let quota = engine.quota(company_id).await.unwrap();
        assert!(quota.quota.storage_used_bytes <= quota.quota.storage_limit_bytes);
    }

    let quota = engine.quota(company_id).await.unwrap();
    assert_eq!(quota.quota.storage_used_bytes, 1_800_000);
    assert_eq!(quota.quota.file_count, 6);
}

#[tokio::test]
async fn test_file_counters_never_exceed_total() {
    let (engine, _store) = setup_engine();
    let (_, company_id) = tenant();
    let snapshot = initiate(
        &engine,
        company_id,
        vec![file("a.txt", 10), file("b.txt", 10), file("c.txt", 10)],
    )
    .await;
    let session_id = snapshot.session.id;

    let (connection, mut subscription) = engine.connect();
    engine
        .join_room(Room::company(company_id), connection)
        .await
        .unwrap();
    drain(&mut subscription);

    engine.record_chunk(session_id, 0, 0, 10, 1).await.unwrap();
    engine.fail_file(session_id, 1, "client gave up").await.unwrap();
    engine.record_chunk(session_id, 2, 0, 10, 1).await.unwrap();

    let updates: Vec<_> = drain(&mut subscription)
        .into_iter()
        .filter_map(|event| match event.as_ref() {
            ServerEvent::UploadSessionUpdated(update) => Some(update.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 3);
    for update in &updates {
        assert!(update.completed_files + update.failed_files <= update.total_files);
    }
    let last = updates.last().unwrap();
    assert_eq!(last.status, SessionStatus::Failed);
    assert_eq!(last.completed_files, 2);
    assert_eq!(last.failed_files, 1);

    let quota = engine.quota(company_id).await.unwrap();
    assert_eq!(quota.quota.storage_used_bytes, 20);
}

#[tokio::test]
async fn test_add_file_extends_reservation() {
    let (engine, _store) = setup_engine();
    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("a.txt", 1_000_000)]).await;
    let session_id = snapshot.session.id;

    let added = engine
        .add_file(session_id, file("b.txt", 500_000))
        .await
        .unwrap();
    assert_eq!(added.file_index, 1);
    assert_eq!(added.status, ProgressStatus::Pending);
    assert_eq!(engine.quota(company_id).await.unwrap().pending_bytes, 1_500_000);

    let too_big = engine.add_file(session_id, file("c.txt", 600_000)).await;
    assert!(matches!(too_big, Err(AppError::QuotaExceeded { .. })));

    let state = engine.get_session(session_id).await.unwrap();
    assert_eq!(state.session.total_files, 2);
    assert_eq!(state.session.total_bytes, 1_500_000);
}

#[tokio::test]
async fn test_unknown_session_and_file() {
    let (engine, _store) = setup_engine();
    let missing = Uuid::new_v4();
    assert!(matches!(
        engine.record_chunk(missing, 0, 0, 1, 1).await,
        Err(AppError::SessionNotFound(id)) if id == missing
    ));

    let (_, company_id) = tenant();
    let snapshot = initiate(&engine, company_id, vec![file("a.txt", 10)]).await;
    assert!(matches!(
        engine.record_chunk(snapshot.session.id, 5, 0, 10, 1).await,
        Err(AppError::FileNotFound(_))
    ));
    assert!(matches!(
        engine.complete_file(snapshot.session.id, 0).await,
        Err(AppError::IncompleteFile { uploaded: 0, total: 10 })
    ));
}
