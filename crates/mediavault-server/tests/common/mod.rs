//! Shared fakes and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use mediavault_crypto::generate_keypair;
use mediavault_server::context::{CallTimeouts, RequestContext};
use mediavault_server::error::{AppError, AppResult};
use mediavault_server::lifecycle::{CreateUpload, EngineConfig, LifecycleEngine};
use mediavault_server::metadata::{MemoryMetadataStore, MetadataStore};
use mediavault_server::mirror::{spawn_mirror_worker, Mirror, MirrorTask, RetryPolicy};
use mediavault_server::models::{
    AssetKind, AssetMetadata, AssetRecord, OwnerRef, OwnershipEvent, OwnershipEventKind,
};
use mediavault_server::notifier::OwnershipNotifier;
use mediavault_server::provider::{PlaybackSigner, ProviderGateway, UploadRequest, UploadTarget};
use mediavault_server::store::{MemoryRecordStore, RecordStore, Scope};
use tokio_util::sync::CancellationToken;

/// Provider fake with switchable failures and recorded calls.
pub struct FakeGateway {
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub create_delay: Mutex<Option<Duration>>,
    pub uploads_created: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub signer: PlaybackSigner,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            uploads_created: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            signer: PlaybackSigner::new(generate_keypair().0, Some("test-kid".to_string())),
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    async fn create_upload_target(&self, request: &UploadRequest) -> AppResult<UploadTarget> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("provider down".to_string()));
        }
        let n = self.uploads_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadTarget {
            upload_id: format!("up_{}_{}", n, request.asset_id.simple()),
            url: format!("https://upload.example/{}", n),
        })
    }

    async fn delete_remote_asset(
        &self,
        _kind: AssetKind,
        provider_asset_id: &str,
    ) -> AppResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("provider down".to_string()));
        }
        self.deleted.lock().unwrap().push(provider_asset_id.to_string());
        Ok(())
    }

    fn sign_playback_credential(
        &self,
        kind: AssetKind,
        subject: &str,
        expires_at: DateTime<Utc>,
        claims: serde_json::Map<String, serde_json::Value>,
    ) -> AppResult<String> {
        self.signer.sign(kind, subject, expires_at, claims)
    }
}

/// Notifier fake recording every event.
pub struct RecordingNotifier {
    pub owners_exist: AtomicBool,
    pub fail_notify: AtomicBool,
    pub events: Mutex<Vec<OwnershipEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            owners_exist: AtomicBool::new(true),
            fail_notify: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<OwnershipEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: OwnershipEventKind) -> usize {
        self.events().iter().filter(|event| event.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl OwnershipNotifier for RecordingNotifier {
    async fn owner_exists(&self, _owner: &OwnerRef) -> AppResult<bool> {
        Ok(self.owners_exist.load(Ordering::SeqCst))
    }

    async fn notify(&self, event: &OwnershipEvent) -> AppResult<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("notifier down".to_string()));
        }
        Ok(())
    }
}

/// Metadata store that fails on demand and counts writes.
pub struct FlakyMetadataStore {
    pub inner: MemoryMetadataStore,
    pub failing_writes: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub write_delay: Mutex<Option<Duration>>,
    pub upserts: AtomicUsize,
}

impl FlakyMetadataStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            failing_writes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            upserts: AtomicUsize::new(0),
        }
    }

    /// Makes the next `n` writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Delays every document write by `delay`.
    pub fn slow_writes(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn take_write_failure(&self) -> AppResult<()> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::Unavailable("metadata store down".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> AppResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("metadata store down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn get(&self, asset_id: Uuid) -> AppResult<Option<AssetMetadata>> {
        self.check_read()?;
        self.inner.get(asset_id).await
    }

    async fn upsert(&self, doc: &AssetMetadata) -> AppResult<bool> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.take_write_failure()?;
        let applied = self.inner.upsert(doc).await?;
        if applied {
            self.upserts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(applied)
    }

    async fn delete(&self, asset_id: Uuid) -> AppResult<u64> {
        self.take_write_failure()?;
        self.inner.delete(asset_id).await
    }

    async fn list_by_keys(&self, asset_ids: &[Uuid]) -> AppResult<Vec<AssetMetadata>> {
        self.check_read()?;
        self.inner.list_by_keys(asset_ids).await
    }
}

/// Engine wired to in-memory stores and fakes.
pub struct Harness {
    pub records: Arc<MemoryRecordStore>,
    pub metadata: Arc<FlakyMetadataStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<LifecycleEngine>,
    pub mirror_rx: Option<mpsc::UnboundedReceiver<MirrorTask>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeouts(CallTimeouts {
            store: Duration::from_secs(2),
            provider: Duration::from_secs(2),
            notifier: Duration::from_secs(2),
        })
    }

    pub fn with_timeouts(timeouts: CallTimeouts) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let metadata = Arc::new(FlakyMetadataStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let (mirror, mirror_rx) = Mirror::new(records.clone(), metadata.clone(), timeouts.store);
        let engine = Arc::new(LifecycleEngine::new(
            records.clone(),
            metadata.clone(),
            gateway.clone(),
            notifier.clone(),
            mirror,
            EngineConfig {
                timeouts,
                ..Default::default()
            },
        ));

        Self {
            records,
            metadata,
            gateway,
            notifier,
            engine,
            mirror_rx: Some(mirror_rx),
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    /// Starts the repair worker with short delays.
    pub fn start_mirror_worker(&mut self, shutdown: CancellationToken) {
        let rx = self.mirror_rx.take().expect("mirror worker already started");
        spawn_mirror_worker(
            self.engine.mirror().clone(),
            rx,
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
            shutdown,
        );
    }

    /// Tasks waiting in the repair queue (only meaningful before the worker runs).
    pub fn queued_repairs(&mut self) -> Vec<MirrorTask> {
        let rx = self.mirror_rx.as_mut().expect("mirror worker already started");
        let mut tasks = Vec::new();
        while let Ok(task) = rx.try_recv() {
            tasks.push(task);
        }
        tasks
    }

    pub async fn create(&self, owner: Option<OwnerRef>) -> (AssetRecord, String) {
        let created = self
            .engine
            .create_upload(
                &self.ctx(),
                CreateUpload {
                    kind: Some(AssetKind::Video),
                    owner,
                    ..Default::default()
                },
            )
            .await
            .expect("create_upload failed");
        (created.asset, created.upload.upload_id)
    }

    /// Creates an asset and completes it as ready with `pa_<n>` as provider id.
    pub async fn create_ready(&self, owner: Option<OwnerRef>) -> AssetRecord {
        let (asset, upload_id) = self.create(owner).await;
        let provider_asset_id = format!("pa_{}", asset.id.simple());
        self.engine
            .on_provider_ready(&self.ctx(), &upload_id, &provider_asset_id, serde_json::json!({}))
            .await
            .expect("on_provider_ready failed");
        self.record(asset.id).await
    }

    pub async fn record(&self, id: Uuid) -> AssetRecord {
        self.records
            .get(id, Scope::All)
            .await
            .unwrap()
            .expect("record missing")
    }

    pub async fn document(&self, id: Uuid) -> Option<AssetMetadata> {
        self.metadata.inner.get(id).await.unwrap()
    }

    /// Asserts both owner invariants over every stored row.
    pub async fn assert_owner_invariants(&self) {
        let rows = self.records.snapshot().await;
        let mut active_owners = Vec::new();
        for row in &rows {
            assert!(row.owner_columns_consistent(), "half-set owner on {}", row.id);
            if let Some(owner) = row.owner() {
                assert!(!row.is_deleted(), "soft-deleted asset {} still owned", row.id);
                assert!(
                    !active_owners.contains(&owner),
                    "owner {} bound to two active assets",
                    owner
                );
                active_owners.push(owner);
            }
        }
    }
}

pub fn owner(id: &str) -> OwnerRef {
    OwnerRef::new(id, "post")
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
