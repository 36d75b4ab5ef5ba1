//! Lifecycle engine behavior against in-memory stores and fakes.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{eventually, owner, Harness};
use mediavault_server::context::{CallTimeouts, RequestContext};
use mediavault_server::error::AppError;
use mediavault_server::lifecycle::{CreateUpload, TransitionOutcome};
use mediavault_server::mirror::MirrorOp;
use mediavault_server::models::{AssetKind, AssetState, MetadataPatch, OwnershipEventKind, Field};
use mediavault_server::store::{ListQuery, RecordStore, Scope};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ===== Upload and provider completion =====

#[tokio::test]
async fn test_create_then_ready_populates_record_and_metadata() {
    let h = Harness::new();
    let (asset, upload_id) = h.create(None).await;
    assert_eq!(asset.state, AssetState::Pending);
    assert_eq!(asset.owner(), None);
    assert_eq!(asset.provider_upload_id.as_deref(), Some(upload_id.as_str()));

    let outcome = h
        .engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_1", json!({"duration": 12.5}))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);

    let record = h.record(asset.id).await;
    assert_eq!(record.state, AssetState::Ready);
    assert_eq!(record.provider_asset_id.as_deref(), Some("pa_1"));

    let doc = h.document(asset.id).await.unwrap();
    let provider = doc.provider.unwrap();
    assert_eq!(provider.status, "ready");
    assert_eq!(provider.provider_asset_id.as_deref(), Some("pa_1"));
    assert_eq!(provider.detail["duration"], 12.5);
}

#[tokio::test]
async fn test_duplicate_ready_is_a_noop() {
    let h = Harness::new();
    let (asset, upload_id) = h.create(None).await;

    h.engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_1", json!({}))
        .await
        .unwrap();
    let after_first = h.record(asset.id).await;
    let upserts = h.metadata.upserts();

    let outcome = h
        .engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_1", json!({}))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Discarded);
    assert_eq!(h.record(asset.id).await, after_first);
    assert_eq!(h.metadata.upserts(), upserts);
}

#[tokio::test]
async fn test_ready_for_unknown_upload_is_discarded() {
    let h = Harness::new();
    let outcome = h
        .engine
        .on_provider_ready(&h.ctx(), "up_missing", "pa_1", json!({}))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Discarded);
}

#[tokio::test]
async fn test_errored_marks_broken_and_ready_afterwards_is_discarded() {
    let h = Harness::new();
    let (asset, upload_id) = h.create(None).await;

    let outcome = h
        .engine
        .on_provider_errored(&h.ctx(), &upload_id, json!({"messages": ["bad codec"]}))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);
    assert_eq!(h.record(asset.id).await.state, AssetState::Broken);
    assert_eq!(h.document(asset.id).await.unwrap().provider.unwrap().status, "errored");

    let late = h
        .engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_1", json!({}))
        .await
        .unwrap();
    assert_eq!(late, TransitionOutcome::Discarded);
    let record = h.record(asset.id).await;
    assert_eq!(record.state, AssetState::Broken);
    assert_eq!(record.provider_asset_id, None);
}

#[tokio::test]
async fn test_provider_failure_writes_nothing() {
    let h = Harness::new();
    h.gateway.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .engine
        .create_upload(
            &h.ctx(),
            CreateUpload {
                kind: Some(AssetKind::Image),
                owner: Some(owner("1")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)));
    assert!(h.records.snapshot().await.is_empty());
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_slow_provider_times_out_without_record() {
    let h = Harness::with_timeouts(CallTimeouts {
        store: Duration::from_secs(1),
        provider: Duration::from_millis(30),
        notifier: Duration::from_secs(1),
    });
    *h.gateway.create_delay.lock().unwrap() = Some(Duration::from_secs(2));

    let err = h
        .engine
        .create_upload(
            &h.ctx(),
            CreateUpload {
                kind: Some(AssetKind::Video),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)));
    assert!(h.records.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_canceled_request_has_no_side_effects() {
    let h = Harness::new();
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    ctx.cancel();

    let err = h
        .engine
        .create_upload(
            &ctx,
            CreateUpload {
                kind: Some(AssetKind::Video),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Canceled(_)));
    assert_eq!(h.gateway.uploads_created.load(Ordering::SeqCst), 0);
    assert!(h.records.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_create_upload_validates_input() {
    let h = Harness::new();
    let err = h
        .engine
        .create_upload(&h.ctx(), CreateUpload::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));

    let err = h
        .engine
        .create_upload(
            &h.ctx(),
            CreateUpload {
                kind: Some(AssetKind::Video),
                owner: Some(owner("")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_create_upload_for_unknown_owner_is_not_found() {
    let h = Harness::new();
    h.notifier.owners_exist.store(false, Ordering::SeqCst);

    let err = h
        .engine
        .create_upload(
            &h.ctx(),
            CreateUpload {
                kind: Some(AssetKind::Video),
                owner: Some(owner("ghost")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.gateway.uploads_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_upload_seeds_metadata_and_notifies() {
    let h = Harness::new();
    let created = h
        .engine
        .create_upload(
            &h.ctx(),
            CreateUpload {
                kind: Some(AssetKind::Image),
                owner: Some(owner("1")),
                title: Some("Cover".to_string()),
                passthrough: Some("ref-9".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let doc = h.document(created.asset.id).await.unwrap();
    assert_eq!(doc.owners, vec![owner("1")]);
    assert_eq!(doc.title.as_deref(), Some("Cover"));
    assert_eq!(doc.passthrough.as_deref(), Some("ref-9"));
    assert_eq!(h.notifier.count(OwnershipEventKind::Associated), 1);

    let err = h
        .engine
        .create_upload(
            &h.ctx(),
            CreateUpload {
                kind: Some(AssetKind::Image),
                owner: Some(owner("1")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

// ===== Ownership =====

#[tokio::test]
async fn test_owner_cannot_hold_two_assets() {
    let h = Harness::new();
    let (x, _) = h.create(None).await;
    let (y, _) = h.create(None).await;

    h.engine.associate(&h.ctx(), x.id, owner("1")).await.unwrap();
    let err = h
        .engine
        .associate(&h.ctx(), y.id, owner("1"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.record(y.id).await.owner(), None);
    h.assert_owner_invariants().await;
}

#[tokio::test]
async fn test_associate_rejects_second_owner_and_is_idempotent() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;
    h.notifier.clear();

    let same = h
        .engine
        .associate(&h.ctx(), asset.id, owner("1"))
        .await
        .unwrap();
    assert_eq!(same.owner(), Some(owner("1")));
    assert!(h.notifier.events().is_empty());

    let err = h
        .engine
        .associate(&h.ctx(), asset.id, owner("2"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_associate_unknown_owner_is_not_found() {
    let h = Harness::new();
    let (asset, _) = h.create(None).await;
    h.notifier.owners_exist.store(false, Ordering::SeqCst);

    let err = h
        .engine
        .associate(&h.ctx(), asset.id, owner("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.record(asset.id).await.owner(), None);
}

#[tokio::test]
async fn test_associate_then_deassociate_round_trip() {
    let h = Harness::new();
    let (asset, _) = h.create(None).await;

    h.engine
        .associate(&h.ctx(), asset.id, owner("1"))
        .await
        .unwrap();
    assert_eq!(h.document(asset.id).await.unwrap().owners, vec![owner("1")]);

    let record = h
        .engine
        .deassociate(&h.ctx(), asset.id, owner("1"))
        .await
        .unwrap();
    assert_eq!(record.owner(), None);
    assert_eq!(h.record(asset.id).await.owner(), None);
    assert!(h.document(asset.id).await.unwrap().owners.is_empty());
    assert_eq!(h.notifier.count(OwnershipEventKind::Associated), 1);
    assert_eq!(h.notifier.count(OwnershipEventKind::Deassociated), 1);
}

#[tokio::test]
async fn test_deassociate_of_other_owner_is_noop() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;
    h.notifier.clear();

    let record = h
        .engine
        .deassociate(&h.ctx(), asset.id, owner("2"))
        .await
        .unwrap();
    assert_eq!(record.owner(), Some(owner("1")));
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_update_owners_empty_deassociates_only() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;
    h.notifier.clear();

    let record = h
        .engine
        .update_owners(&h.ctx(), asset.id, vec![])
        .await
        .unwrap();

    assert_eq!(record.owner_id, None);
    assert_eq!(record.owner_type, None);
    assert_eq!(h.notifier.count(OwnershipEventKind::Deassociated), 1);
    assert_eq!(h.notifier.count(OwnershipEventKind::Associated), 0);
}

#[tokio::test]
async fn test_update_owners_swaps_owner() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;
    h.notifier.clear();

    let record = h
        .engine
        .update_owners(&h.ctx(), asset.id, vec![owner("2")])
        .await
        .unwrap();
    assert_eq!(record.owner(), Some(owner("2")));

    let kinds: Vec<_> = h.notifier.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![OwnershipEventKind::Deassociated, OwnershipEventKind::Associated]
    );
    let doc = h.document(asset.id).await.unwrap();
    assert_eq!(doc.owners, vec![owner("2")]);
    assert_eq!(doc.owner_history.len(), 3);
}

#[tokio::test]
async fn test_update_owners_rejects_multiple_owners() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;

    let err = h
        .engine
        .update_owners(&h.ctx(), asset.id, vec![owner("2"), owner("3")])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
    assert_eq!(h.record(asset.id).await.owner(), Some(owner("1")));
}

#[tokio::test]
async fn test_update_owners_leaves_asset_unowned_when_associate_fails() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;
    let (_other, _) = h.create(Some(owner("2"))).await;

    let err = h
        .engine
        .update_owners(&h.ctx(), asset.id, vec![owner("2")])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.record(asset.id).await.owner(), None);
    h.assert_owner_invariants().await;
}

#[tokio::test]
async fn test_concurrent_associates_have_one_winner() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(h.create(None).await.0.id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            let ctx = RequestContext::with_timeout(Duration::from_secs(5));
            engine.associate(&ctx, id, owner("shared")).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(matches!(err, AppError::Conflict(_))),
        }
    }
    assert_eq!(winners, 1);
    h.assert_owner_invariants().await;
}

// ===== State flips and deletion =====

#[tokio::test]
async fn test_archive_and_unarchive() {
    let h = Harness::new();
    let ready = h.create_ready(None).await;

    let archived = h.engine.archive(&h.ctx(), ready.id).await.unwrap();
    assert_eq!(archived.state, AssetState::Archived);
    let err = h.engine.archive(&h.ctx(), ready.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let unarchived = h.engine.unarchive(&h.ctx(), ready.id).await.unwrap();
    assert_eq!(unarchived.state, AssetState::Ready);

    let (pending, _) = h.create(None).await;
    let err = h.engine.archive(&h.ctx(), pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = h
        .engine
        .archive(&h.ctx(), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_soft_delete_releases_owner() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("1"))).await;
    h.notifier.clear();

    let deleted = h.engine.delete(&h.ctx(), asset.id).await.unwrap();
    assert!(deleted.deleted_at.is_some());
    assert_eq!(deleted.owner(), None);

    let err = h.engine.get(&h.ctx(), asset.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let view = h.engine.get_with_deleted(&h.ctx(), asset.id).await.unwrap();
    assert!(view.record.deleted_at.is_some());
    assert_eq!(view.record.owner_id, None);
    assert_eq!(view.record.owner_type, None);
    assert!(view.metadata.unwrap().owners.is_empty());

    assert_eq!(h.notifier.count(OwnershipEventKind::Deassociated), 1);

    // The owner is free again.
    let (other, _) = h.create(None).await;
    h.engine
        .associate(&h.ctx(), other.id, owner("1"))
        .await
        .unwrap();
    h.assert_owner_invariants().await;
}

#[tokio::test]
async fn test_delete_twice_conflicts_and_restore_keeps_owner_cleared() {
    let h = Harness::new();
    let ready = h.create_ready(Some(owner("1"))).await;

    h.engine.delete(&h.ctx(), ready.id).await.unwrap();
    let err = h.engine.delete(&h.ctx(), ready.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let restored = h.engine.restore(&h.ctx(), ready.id).await.unwrap();
    assert_eq!(restored.deleted_at, None);
    assert_eq!(restored.state, AssetState::Ready);
    assert_eq!(restored.owner(), None);

    let err = h.engine.restore(&h.ctx(), ready.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_permanent_delete_requires_soft_delete() {
    let h = Harness::new();
    let ready = h.create_ready(None).await;

    let err = h
        .engine
        .delete_permanent(&h.ctx(), ready.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(h.gateway.deleted().is_empty());
}

#[tokio::test]
async fn test_permanent_delete_keeps_record_when_remote_delete_fails() {
    let h = Harness::new();
    let ready = h.create_ready(None).await;
    let soft_deleted = h.engine.delete(&h.ctx(), ready.id).await.unwrap();
    h.gateway.fail_delete.store(true, Ordering::SeqCst);

    let err = h
        .engine
        .delete_permanent(&h.ctx(), ready.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)));
    assert_eq!(h.record(ready.id).await.deleted_at, soft_deleted.deleted_at);
    assert!(h.document(ready.id).await.is_some());

    h.gateway.fail_delete.store(false, Ordering::SeqCst);
    h.engine.delete_permanent(&h.ctx(), ready.id).await.unwrap();
    assert_eq!(h.gateway.deleted(), vec![ready.provider_asset_id.clone().unwrap()]);
    assert!(h.records.get(ready.id, Scope::All).await.unwrap().is_none());
    assert!(h.document(ready.id).await.is_none());
}

#[tokio::test]
async fn test_permanent_delete_of_pending_asset_waits_for_provider() {
    let h = Harness::new();
    let (asset, upload_id) = h.create(None).await;
    h.engine.delete(&h.ctx(), asset.id).await.unwrap();

    let err = h
        .engine
        .delete_permanent(&h.ctx(), asset.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(h.gateway.deleted().is_empty());
    assert!(h.records.get(asset.id, Scope::All).await.unwrap().is_some());

    // The upload lands after the soft delete; the purge now removes it remotely.
    h.engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_late", json!({}))
        .await
        .unwrap();
    h.engine.delete_permanent(&h.ctx(), asset.id).await.unwrap();
    assert_eq!(h.gateway.deleted(), vec!["pa_late".to_string()]);
    assert!(h.records.get(asset.id, Scope::All).await.unwrap().is_none());
}

#[tokio::test]
async fn test_permanent_delete_of_failed_upload_skips_provider() {
    let h = Harness::new();
    let (asset, upload_id) = h.create(None).await;
    h.engine.delete(&h.ctx(), asset.id).await.unwrap();
    h.engine
        .on_provider_errored(&h.ctx(), &upload_id, json!({"reason": "codec"}))
        .await
        .unwrap();

    h.engine.delete_permanent(&h.ctx(), asset.id).await.unwrap();
    assert!(h.gateway.deleted().is_empty());
    assert!(h.records.get(asset.id, Scope::All).await.unwrap().is_none());
}

#[tokio::test]
async fn test_soft_deleted_pending_asset_still_completes() {
    let h = Harness::new();
    let (asset, upload_id) = h.create(None).await;
    h.engine.delete(&h.ctx(), asset.id).await.unwrap();

    let outcome = h
        .engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_late", json!({}))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);

    h.engine.delete_permanent(&h.ctx(), asset.id).await.unwrap();
    assert_eq!(h.gateway.deleted(), vec!["pa_late".to_string()]);
}

// ===== Reads, playback, metadata =====

#[tokio::test]
async fn test_list_hydrates_and_filters() {
    let h = Harness::new();
    h.create(Some(owner("1"))).await;
    let (free, _) = h.create(None).await;
    let (gone, _) = h.create(None).await;
    h.engine.delete(&h.ctx(), gone.id).await.unwrap();

    let active = h.engine.list(&h.ctx(), ListQuery::default()).await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|view| view.metadata.is_some()));

    let unowned = h
        .engine
        .list(
            &h.ctx(),
            ListQuery {
                unowned_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(unowned.len(), 1);
    assert_eq!(unowned[0].record.id, free.id);

    let deleted = h
        .engine
        .list(
            &h.ctx(),
            ListQuery {
                scope: Scope::Deleted,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].record.id, gone.id);
}

#[tokio::test]
async fn test_metadata_read_failure_degrades_to_records() {
    let h = Harness::new();
    let (asset, _) = h.create(None).await;
    h.metadata.fail_reads.store(true, Ordering::SeqCst);

    let view = h.engine.get(&h.ctx(), asset.id).await.unwrap();
    assert_eq!(view.record.id, asset.id);
    assert!(view.metadata.is_none());

    let listed = h.engine.list(&h.ctx(), ListQuery::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].metadata.is_none());
}

#[tokio::test]
async fn test_sign_playback_requires_ready_asset() {
    let h = Harness::new();
    let (pending, _) = h.create(None).await;
    let err = h
        .engine
        .sign_playback(
            &h.ctx(),
            pending.id,
            None,
            Duration::from_secs(60),
            Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let ready = h.create_ready(None).await;
    let err = h
        .engine
        .sign_playback(&h.ctx(), ready.id, None, Duration::ZERO, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));

    let credential = h
        .engine
        .sign_playback(
            &h.ctx(),
            ready.id,
            Some("viewer-7".to_string()),
            Duration::from_secs(60),
            Default::default(),
        )
        .await
        .unwrap();
    let claims = mediavault_crypto::verify_playback_token(
        &h.gateway.signer.verifying_key(),
        &credential.token,
        chrono::Utc::now().timestamp(),
    )
    .unwrap();
    assert_eq!(Some(claims.sub), ready.provider_asset_id);
    assert_eq!(claims.extra["viewer"], "viewer-7");
    assert_eq!(claims.exp, credential.expires_at.timestamp());
}

#[tokio::test]
async fn test_update_metadata_patches_fields() {
    let h = Harness::new();
    let (asset, _) = h.create(None).await;

    let patch = MetadataPatch {
        title: Field::Set("Intro".to_string()),
        description: Field::Set("First cut".to_string()),
        ..Default::default()
    };
    let doc = h
        .engine
        .update_metadata(&h.ctx(), asset.id, patch)
        .await
        .unwrap();
    assert_eq!(doc.title.as_deref(), Some("Intro"));

    let clear = MetadataPatch {
        description: Field::Clear,
        ..Default::default()
    };
    let doc = h
        .engine
        .update_metadata(&h.ctx(), asset.id, clear)
        .await
        .unwrap();
    assert_eq!(doc.title.as_deref(), Some("Intro"));
    assert_eq!(doc.description, None);

    h.metadata.fail_next_writes(1);
    let err = h
        .engine
        .update_metadata(
            &h.ctx(),
            asset.id,
            MetadataPatch {
                title: Field::Set("Again".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)));
}

#[tokio::test]
async fn test_concurrent_metadata_update_and_associate_both_land() {
    let h = Harness::new();
    let (asset, _) = h.create(None).await;
    h.metadata.slow_writes(Duration::from_millis(30));

    let patch = MetadataPatch {
        title: Field::Set("Trailer".to_string()),
        ..Default::default()
    };
    let ctx = h.ctx();
    let (updated, associated) = tokio::join!(
        h.engine.update_metadata(&ctx, asset.id, patch),
        h.engine.associate(&ctx, asset.id, owner("4")),
    );
    updated.unwrap();
    associated.unwrap();

    let doc = h.document(asset.id).await.unwrap();
    assert_eq!(doc.title.as_deref(), Some("Trailer"));
    assert_eq!(doc.owners, vec![owner("4")]);
}

// ===== Mirror repair =====

#[tokio::test]
async fn test_failed_mirror_write_is_queued_not_returned() {
    let mut h = Harness::new();
    let (asset, _) = h.create(None).await;
    h.queued_repairs();

    h.metadata.fail_next_writes(1);
    let record = h
        .engine
        .associate(&h.ctx(), asset.id, owner("1"))
        .await
        .unwrap();
    assert_eq!(record.owner(), Some(owner("1")));

    let queued = h.queued_repairs();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].asset_id, asset.id);
    assert_eq!(queued[0].op, MirrorOp::SyncOwners);
}

#[tokio::test]
async fn test_mirror_worker_repairs_failed_write() {
    let mut h = Harness::new();
    let shutdown = CancellationToken::new();
    h.start_mirror_worker(shutdown.clone());

    let (asset, upload_id) = h.create(None).await;
    h.metadata.fail_next_writes(2);
    h.engine
        .on_provider_ready(&h.ctx(), &upload_id, "pa_1", json!({"tracks": 2}))
        .await
        .unwrap();
    assert_eq!(h.record(asset.id).await.state, AssetState::Ready);

    let harness = &h;
    let id = asset.id;
    let repaired = eventually(|| async move {
        harness
            .document(id)
            .await
            .and_then(|doc| doc.provider)
            .map_or(false, |provider| provider.status == "ready")
    })
    .await;
    assert!(repaired);
    assert!(eventually(|| async move { harness.engine.mirror().pending_tasks() == 0 }).await);
    shutdown.cancel();
}

#[tokio::test]
async fn test_sweep_repairs_drift_after_exhausted_mirror() {
    let mut h = Harness::new();
    let (asset, _) = h.create(None).await;

    h.metadata.fail_next_writes(1);
    h.engine
        .associate(&h.ctx(), asset.id, owner("1"))
        .await
        .unwrap();
    // Drop the queued repair to simulate exhausted retries.
    assert_eq!(h.queued_repairs().len(), 1);
    assert!(h.document(asset.id).await.unwrap().owners.is_empty());

    let sweep = mediavault_server::sweep::ReconciliationSweep::new(
        h.records.clone(),
        h.metadata.clone(),
        Duration::from_secs(1),
    );
    let report = sweep.run_once(&h.ctx()).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired, 1);
    assert_eq!(h.document(asset.id).await.unwrap().owners, vec![owner("1")]);
}

#[tokio::test]
async fn test_retried_seed_does_not_reown_deleted_asset() {
    let mut h = Harness::new();

    h.metadata.fail_next_writes(1);
    let (asset, _) = h.create(Some(owner("7"))).await;
    h.metadata.fail_next_writes(1);
    h.engine.delete(&h.ctx(), asset.id).await.unwrap();

    let shutdown = CancellationToken::new();
    h.start_mirror_worker(shutdown.clone());

    let harness = &h;
    assert!(eventually(|| async move { harness.engine.mirror().pending_tasks() == 0 }).await);
    let doc = h.document(asset.id).await.unwrap();
    assert!(doc.owners.is_empty());
    let record = h.record(asset.id).await;
    assert!(record.is_deleted());
    assert_eq!(record.owner(), None);
    shutdown.cancel();
}

#[tokio::test]
async fn test_dropped_request_still_mirrors_committed_delete() {
    let h = Harness::new();
    let (asset, _) = h.create(Some(owner("3"))).await;
    h.notifier.clear();
    h.metadata.slow_writes(Duration::from_millis(100));

    let dropped = tokio::time::timeout(
        Duration::from_millis(20),
        h.engine.delete(&h.ctx(), asset.id),
    )
    .await;
    assert!(dropped.is_err());
    assert!(h.record(asset.id).await.is_deleted());

    let harness = &h;
    let id = asset.id;
    let mirrored = eventually(|| async move {
        harness.document(id).await.map_or(false, |doc| doc.owners.is_empty())
    })
    .await;
    assert!(mirrored);
    assert!(eventually(|| async move {
        harness.notifier.count(OwnershipEventKind::Deassociated) == 1
    })
    .await);
}
