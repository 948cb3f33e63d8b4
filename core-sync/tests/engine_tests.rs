//! Upload pass behaviour against a file-backed queue and in-memory remotes.

mod common;

use bridge_traits::error::{AuthFailure, BridgeError};
use bridge_traits::time::Clock;
use common::{FakeIdentity, FakeNetwork, Harness, OWNER};
use core_runtime::config::OperationTimeouts;
use core_runtime::events::{CoreEvent, UploadEvent};
use core_sync::{
    MediaKind, PassOutcome, PassSummary, QueueStore, RunOutcome, SqliteQueueStore, SyncError,
};
use sha2::{Digest, Sha256};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn completed(outcome: &RunOutcome) -> PassSummary {
    match outcome {
        RunOutcome::Ran {
            last: PassOutcome::Completed(summary),
            ..
        } => *summary,
        other => panic!("expected a completed pass, got {:?}", other),
    }
}

fn aborted(outcome: &RunOutcome) -> &SyncError {
    match outcome {
        RunOutcome::Ran {
            last: PassOutcome::Aborted { reason },
            ..
        } => reason,
        other => panic!("expected an aborted pass, got {:?}", other),
    }
}

#[tokio::test]
async fn test_successful_pass_uploads_and_cleans_up() {
    let h = Harness::new().await;
    let bytes = b"fake jpeg bytes";
    let id = h.enqueue("sunset.jpg", MediaKind::Photo, bytes).await;
    let owned = h.store.get(&id).await.unwrap().unwrap().owned_file_path;
    assert!(owned.exists());

    let mut events = h.bus.subscribe();
    let outcome = h.engine.run().await;

    assert_eq!(
        completed(&outcome),
        PassSummary {
            uploaded: 1,
            ..Default::default()
        }
    );

    let key = format!("captures/{}.jpg", id);
    assert_eq!(h.objects.keys(), vec![key.clone()]);
    let (stored, content_type) = h.objects.objects.lock().unwrap()[&key].clone();
    assert_eq!(&stored[..], bytes);
    assert_eq!(content_type, "image/jpeg");

    let doc = h.documents.document(&id.to_string()).unwrap();
    assert_eq!(doc.owner_id, OWNER);
    assert_eq!(doc.media_kind, "photo");
    assert_eq!(doc.media_url, format!("https://objects.example/{}", key));
    assert_eq!(doc.size_bytes, bytes.len() as u64);
    assert_eq!(doc.sha256, hex::encode(Sha256::digest(bytes)));
    assert_eq!(doc.caption.as_deref(), Some("sunset.jpg"));
    assert_eq!(doc.captured_at, h.clock.now());

    assert_eq!(h.pending().await, 0);
    assert!(!owned.exists());
    assert_eq!(h.engine.subscribe_status().borrow().pending, 0);

    let mut uploaded = 0;
    let mut completed_events = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            CoreEvent::Upload(UploadEvent::ItemUploaded { item_id, object_key }) => {
                assert_eq!(item_id, id.to_string());
                assert_eq!(object_key, key);
                uploaded += 1;
            }
            CoreEvent::Upload(UploadEvent::PassCompleted { uploaded: n, pending, .. }) => {
                assert_eq!((n, pending), (1, 0));
                completed_events += 1;
            }
            _ => {}
        }
    }
    assert_eq!((uploaded, completed_events), (1, 1));
}

#[tokio::test]
async fn test_missing_file_is_dropped_without_upload() {
    let h = Harness::new().await;
    let id = h.enqueue("gone.jpg", MediaKind::Photo, b"jpeg").await;
    let owned = h.store.get(&id).await.unwrap().unwrap().owned_file_path;
    std::fs::remove_file(&owned).unwrap();

    let outcome = h.engine.run().await;

    assert_eq!(completed(&outcome).dropped, 1);
    assert_eq!(h.objects.call_count(), 0);
    assert_eq!(h.documents.call_count(), 0);
    assert_eq!(h.pending().await, 0);
    let status = h.engine.subscribe_status().borrow().clone();
    let last_error = status.last_error.unwrap();
    assert!(last_error.contains("missing"));
    assert!(last_error.contains(&format!("{}.jpg", id)));
    assert!(!last_error.contains(&*h.dir.path().to_string_lossy()));
}

#[tokio::test]
async fn test_document_failure_retries_without_duplicates() {
    let h = Harness::new().await;
    let id = h.enqueue("clip.mp4", MediaKind::Video, b"mp4 bytes").await;
    h.documents
        .fail_next(BridgeError::OperationFailed("connection reset".to_string()));

    let first = h.engine.run().await;
    assert_eq!(completed(&first).retried, 1);

    let item = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(item.upload_attempts, 1);
    assert_eq!(item.last_error.unwrap().kind, "network_transient");
    assert!(item.owned_file_path.exists());
    assert_eq!(h.objects.keys().len(), 1);
    assert_eq!(h.documents.len(), 0);

    h.advance(30);
    let second = h.engine.run().await;
    assert_eq!(completed(&second).uploaded, 1);

    assert_eq!(h.objects.keys(), vec![format!("captures/{}.mp4", id)]);
    assert_eq!(h.objects.call_count(), 2);
    assert_eq!(h.documents.len(), 1);
    assert_eq!(h.pending().await, 0);
}

#[tokio::test]
async fn test_no_identity_aborts_every_pass_without_touching_items() {
    let h = Harness::builder()
        .identity(FakeIdentity::signed_out())
        .build()
        .await;
    let id = h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;

    for _ in 0..3 {
        let outcome = h.engine.run().await;
        assert_eq!(aborted(&outcome), &SyncError::NoIdentity);
    }

    let item = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(item.upload_attempts, 0);
    assert!(item.last_error.is_none());
    assert_eq!(h.objects.call_count(), 0);
    assert!(h.engine.subscribe_status().borrow().last_abort.is_some());

    h.identity.sign_in(OWNER);
    let outcome = h.engine.run().await;
    assert_eq!(completed(&outcome).uploaded, 1);
    assert!(h.engine.subscribe_status().borrow().last_abort.is_none());
}

#[tokio::test]
async fn test_item_backing_off_is_skipped_until_due() {
    let h = Harness::new().await;
    let id = h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;
    h.objects
        .fail_next(BridgeError::Timeout("upstream".to_string()));

    assert_eq!(completed(&h.engine.run().await).retried, 1);

    h.advance(10);
    let early = h.engine.run().await;
    assert_eq!(completed(&early).skipped, 1);
    assert_eq!(h.objects.call_count(), 1);
    assert_eq!(h.store.get(&id).await.unwrap().unwrap().upload_attempts, 1);

    h.advance(20);
    assert_eq!(completed(&h.engine.run().await).uploaded, 1);
    assert_eq!(h.objects.call_count(), 2);
}

#[tokio::test]
async fn test_throttling_backs_off_longer() {
    let h = Harness::new().await;
    h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;
    h.objects
        .fail_next(BridgeError::Throttled("slow down".to_string()));

    assert_eq!(completed(&h.engine.run().await).retried, 1);

    h.advance(30);
    assert_eq!(completed(&h.engine.run().await).skipped, 1);

    h.advance(90);
    assert_eq!(completed(&h.engine.run().await).uploaded, 1);
}

#[tokio::test]
async fn test_rejected_payload_is_dropped() {
    let h = Harness::new().await;
    let id = h.enqueue("bad.jpg", MediaKind::Photo, b"jpeg").await;
    let owned = h.store.get(&id).await.unwrap().unwrap().owned_file_path;
    h.objects
        .fail_next(BridgeError::Rejected("unsupported format".to_string()));

    let mut events = h.bus.subscribe();
    assert_eq!(completed(&h.engine.run().await).dropped, 1);

    assert_eq!(h.pending().await, 0);
    assert!(!owned.exists());
    assert_eq!(h.documents.call_count(), 0);

    let dropped = std::iter::from_fn(|| events.try_recv().ok()).find_map(|e| match e {
        CoreEvent::Upload(UploadEvent::ItemDropped { item_id, error_kind, .. }) => {
            Some((item_id, error_kind))
        }
        _ => None,
    });
    assert_eq!(dropped, Some((id.to_string(), "rejected".to_string())));
}

#[tokio::test]
async fn test_revoked_session_aborts_mid_queue() {
    let h = Harness::new().await;
    let first = h.enqueue("one.jpg", MediaKind::Photo, b"one").await;
    h.advance(1);
    let second = h.enqueue("two.jpg", MediaKind::Photo, b"two").await;
    h.objects.fail_next(BridgeError::Unauthorized {
        kind: AuthFailure::Revoked,
        message: "session revoked".to_string(),
    });

    let outcome = h.engine.run().await;
    assert!(matches!(
        aborted(&outcome),
        SyncError::Unauthorized {
            kind: AuthFailure::Revoked,
            ..
        }
    ));

    assert_eq!(h.objects.call_count(), 1);
    for id in [first, second] {
        let item = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.upload_attempts, 0);
        assert!(item.owned_file_path.exists());
    }
}

#[tokio::test]
async fn test_forbidden_is_permanent_and_refresh_pending_is_transient() {
    let h = Harness::new().await;
    let forbidden = h.enqueue("one.jpg", MediaKind::Photo, b"one").await;
    h.advance(1);
    let pending = h.enqueue("two.jpg", MediaKind::Photo, b"two").await;
    h.objects.fail_next(BridgeError::Unauthorized {
        kind: AuthFailure::Forbidden,
        message: "no write access".to_string(),
    });
    h.objects.fail_next(BridgeError::Unauthorized {
        kind: AuthFailure::RefreshPending,
        message: "token refreshing".to_string(),
    });

    let summary = completed(&h.engine.run().await);
    assert_eq!((summary.dropped, summary.retried), (1, 1));

    assert!(h.store.get(&forbidden).await.unwrap().is_none());
    let kept = h.store.get(&pending).await.unwrap().unwrap();
    assert_eq!(kept.last_error.unwrap().kind, "unauthorized_refresh_pending");
}

#[tokio::test]
async fn test_offline_pass_makes_no_remote_calls() {
    let h = Harness::builder()
        .network(FakeNetwork::new(false))
        .build()
        .await;
    h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;

    let outcome = h.engine.run().await;

    assert_eq!(aborted(&outcome), &SyncError::Offline);
    assert_eq!(h.objects.call_count(), 0);
    assert_eq!(h.identity.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.pending().await, 1);

    h.network.as_ref().unwrap().set_connected(true);
    assert_eq!(completed(&h.engine.run().await).uploaded, 1);
}

#[tokio::test]
async fn test_items_of_another_account_are_deferred() {
    let h = Harness::builder()
        .identity(FakeIdentity::signed_in("user-2"))
        .build()
        .await;
    let id = h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;

    let outcome = h.engine.run().await;

    assert_eq!(completed(&outcome).skipped, 1);
    assert_eq!(h.objects.call_count(), 0);
    let item = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(item.upload_attempts, 0);
}

#[tokio::test]
async fn test_hanging_upload_times_out_as_transient() {
    let h = Harness::builder()
        .timeouts(OperationTimeouts {
            upload: Duration::from_millis(50),
            document: Duration::from_millis(50),
        })
        .build()
        .await;
    let id = h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;
    h.objects.hang_forever();

    let outcome = h.engine.run().await;

    assert_eq!(completed(&outcome).retried, 1);
    let item = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(item.upload_attempts, 1);
    assert_eq!(item.last_error.unwrap().kind, "timeout");
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_concurrent_runs_coalesce_into_one_rerun() {
    let h = Harness::new().await;
    h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;
    let gate = h.objects.hold_next();

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.run().await });
    gate.entered.notified().await;
    assert!(h.engine.is_running());
    assert!(h.engine.subscribe_status().borrow().running);

    for _ in 0..3 {
        assert_eq!(h.engine.run().await, RunOutcome::Coalesced);
    }

    gate.release.notify_one();
    let outcome = first.await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Ran {
            passes: 2,
            last: PassOutcome::Completed(PassSummary::default()),
        }
    );
    assert_eq!(h.engine.passes_run(), 2);
    assert_eq!(h.objects.call_count(), 1);
    assert!(!h.engine.is_running());
    assert!(!h.engine.subscribe_status().borrow().running);
}

#[tokio::test]
async fn test_panicking_pass_releases_the_engine() {
    let h = Harness::new().await;
    let id = h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;
    h.objects.panic_next();

    let engine = h.engine.clone();
    let result = tokio::spawn(async move { engine.run().await }).await;
    assert!(result.unwrap_err().is_panic());

    assert!(!h.engine.is_running());
    assert!(!h.engine.subscribe_status().borrow().running);
    assert_eq!(h.store.get(&id).await.unwrap().unwrap().upload_attempts, 0);

    assert_eq!(completed(&h.engine.run().await).uploaded, 1);
}

#[tokio::test]
async fn test_empty_queue_skips_identity_lookup() {
    let h = Harness::new().await;

    let outcome = h.engine.run().await;

    assert_eq!(completed(&outcome), PassSummary::default());
    assert_eq!(h.identity.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let h = Harness::new().await;
    let id = h.enqueue("a.jpg", MediaKind::Photo, b"jpeg").await;
    h.store.close().await;

    let reopened = SqliteQueueStore::open(&h.db_path, &h.key, None)
        .await
        .unwrap();
    let items = reopened.list().await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
    assert_eq!(items[0].owner_id, OWNER);
    assert!(items[0].owned_file_path.exists());
}

#[tokio::test]
async fn test_items_upload_oldest_first() {
    let h = Harness::new().await;
    let older = h.enqueue("older.jpg", MediaKind::Photo, b"1").await;
    h.advance(5);
    let newer = h.enqueue("newer.jpg", MediaKind::Photo, b"2").await;

    let mut events = h.bus.subscribe();
    assert_eq!(completed(&h.engine.run().await).uploaded, 2);

    let order: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            CoreEvent::Upload(UploadEvent::ItemUploaded { item_id, .. }) => Some(item_id),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![older.to_string(), newer.to_string()]);
}
