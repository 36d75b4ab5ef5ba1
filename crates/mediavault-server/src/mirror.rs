//! Metadata mirror writes and their repair queue.
//!
//! After a record commit the engine writes the matching metadata change
//! inline once. If that fails, the change is queued here and retried in the
//! background with exponential backoff. Tasks that exhaust their attempts are
//! logged and left to the reconciliation sweep.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::metadata::{MetadataStore, WRITE_ATTEMPTS};
use crate::models::{AssetMetadata, MetadataPatch, OwnerRef, ProviderDetail};
use crate::store::{RecordStore, Scope};

/// A change to one metadata document.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    /// Initial document contents for a new asset.
    Seed {
        owner: Option<OwnerRef>,
        patch: MetadataPatch,
    },
    AddOwner(OwnerRef),
    RemoveOwner(OwnerRef),
    ClearOwners,
    /// A failed seed: descriptive fields the document lacks, plus the owner
    /// the record holds now.
    Reseed(MetadataPatch),
    /// Copy the owner currently held by the record.
    SyncOwners,
    MergeProvider(ProviderDetail),
    /// Remove the document.
    Purge,
}

impl MirrorOp {
    /// Retries land after later changes, so owners are re-read from the
    /// record instead of replaying what was true at commit time.
    pub fn for_retry(self) -> Self {
        match self {
            MirrorOp::Seed { patch, .. } => MirrorOp::Reseed(patch),
            MirrorOp::AddOwner(_) | MirrorOp::RemoveOwner(_) | MirrorOp::ClearOwners => {
                MirrorOp::SyncOwners
            }
            other => other,
        }
    }

    fn reads_record_owner(&self) -> bool {
        matches!(self, MirrorOp::Reseed(_) | MirrorOp::SyncOwners)
    }

    fn name(&self) -> &'static str {
        match self {
            MirrorOp::Seed { .. } => "seed",
            MirrorOp::Reseed(_) => "reseed",
            MirrorOp::AddOwner(_) => "add_owner",
            MirrorOp::RemoveOwner(_) => "remove_owner",
            MirrorOp::ClearOwners => "clear_owners",
            MirrorOp::SyncOwners => "sync_owners",
            MirrorOp::MergeProvider(_) => "merge_provider",
            MirrorOp::Purge => "purge",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorTask {
    pub asset_id: Uuid,
    pub op: MirrorOp,
}

/// Backoff schedule for queued mirror writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Applies metadata changes and queues the ones that fail.
pub struct Mirror {
    records: Arc<dyn RecordStore>,
    metadata: Arc<dyn MetadataStore>,
    queue: mpsc::UnboundedSender<MirrorTask>,
    store_timeout: Duration,
    in_flight: AtomicUsize,
}

impl Mirror {
    pub fn new(
        records: Arc<dyn RecordStore>,
        metadata: Arc<dyn MetadataStore>,
        store_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MirrorTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mirror = Arc::new(Self {
            records,
            metadata,
            queue: tx,
            store_timeout,
            in_flight: AtomicUsize::new(0),
        });
        (mirror, rx)
    }

    /// Queued tasks not yet applied or abandoned.
    pub fn pending_tasks(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Writes `op` inline; on failure queues it for background repair.
    /// Returns whether the inline write succeeded.
    pub async fn write(&self, ctx: &RequestContext, asset_id: Uuid, op: MirrorOp) -> bool {
        match ctx
            .guard("metadata write", self.store_timeout, self.apply(asset_id, &op))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    asset_id = %asset_id,
                    op = op.name(),
                    error = %err,
                    "Metadata write failed; queued for repair"
                );
                self.enqueue(MirrorTask {
                    asset_id,
                    op: op.for_retry(),
                });
                false
            }
        }
    }

    pub fn enqueue(&self, task: MirrorTask) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.queue.send(task) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(
                asset_id = %err.0.asset_id,
                "Mirror queue closed; change left for reconciliation"
            );
        }
    }

    /// Applies one change to the metadata document.
    ///
    /// The document is rewritten only if nobody else wrote it since it was
    /// read; otherwise the change is recomputed on the fresh copy.
    pub async fn apply(&self, asset_id: Uuid, op: &MirrorOp) -> AppResult<()> {
        if let MirrorOp::Purge = op {
            self.metadata.delete(asset_id).await?;
            return Ok(());
        }

        for attempt in 1..=WRITE_ATTEMPTS {
            let existing = self.metadata.get(asset_id).await?;
            let is_new = existing.is_none();

            // Never create or re-own a document for an asset that is gone.
            let record_owner = if is_new || op.reads_record_owner() {
                match self.records.get(asset_id, Scope::All).await? {
                    Some(record) => record.owner(),
                    None => {
                        tracing::debug!(
                            asset_id = %asset_id,
                            op = op.name(),
                            "Record gone; nothing to mirror"
                        );
                        return Ok(());
                    }
                }
            } else {
                None
            };

            let mut doc = existing.unwrap_or_else(|| AssetMetadata::new(asset_id));
            let now = Utc::now();
            let changed = Self::change(&mut doc, op, record_owner, now);
            if !changed && !is_new {
                return Ok(());
            }

            doc.updated_at = now;
            if self.metadata.upsert(&doc).await? {
                return Ok(());
            }
            tracing::debug!(
                asset_id = %asset_id,
                op = op.name(),
                attempt,
                "Metadata document changed concurrently; recomputing"
            );
        }

        Err(AppError::Unavailable(format!(
            "Metadata document {} kept changing during {}",
            asset_id,
            op.name()
        )))
    }

    /// Applies `op` to an in-memory copy. Returns whether it changed.
    fn change(
        doc: &mut AssetMetadata,
        op: &MirrorOp,
        record_owner: Option<OwnerRef>,
        now: DateTime<Utc>,
    ) -> bool {
        match op {
            MirrorOp::Seed { owner, patch } => {
                if let Some(owner) = owner {
                    doc.add_owner(owner, now);
                }
                doc.apply_patch(patch);
                true
            }
            MirrorOp::Reseed(patch) => {
                let expected: Vec<OwnerRef> = record_owner.into_iter().collect();
                let owners_changed = doc.replace_owners(&expected, now);
                doc.fill_missing(patch) | owners_changed
            }
            MirrorOp::AddOwner(owner) => doc.add_owner(owner, now),
            MirrorOp::RemoveOwner(owner) => doc.remove_owner(owner, now),
            MirrorOp::ClearOwners => doc.replace_owners(&[], now),
            MirrorOp::SyncOwners => {
                let expected: Vec<OwnerRef> = record_owner.into_iter().collect();
                doc.replace_owners(&expected, now)
            }
            MirrorOp::MergeProvider(detail) => {
                doc.merge_provider(detail.clone());
                true
            }
            MirrorOp::Purge => false,
        }
    }

    async fn retry(&self, task: MirrorTask, policy: RetryPolicy, shutdown: CancellationToken) {
        for attempt in 1..=policy.max_attempts {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
            }

            let ctx = RequestContext::background();
            match ctx
                .guard("metadata repair", self.store_timeout, self.apply(task.asset_id, &task.op))
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        asset_id = %task.asset_id,
                        op = task.op.name(),
                        attempt,
                        "Metadata repaired"
                    );
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        asset_id = %task.asset_id,
                        op = task.op.name(),
                        attempt,
                        error = %err,
                        "Metadata repair attempt failed"
                    );
                }
            }
        }

        tracing::error!(
            asset_id = %task.asset_id,
            op = task.op.name(),
            attempts = policy.max_attempts,
            "Metadata repair exhausted retries; left for reconciliation sweep"
        );
    }
}

/// Tasks waiting per asset. An entry exists while that asset's lane runs.
type Lanes = Arc<Mutex<HashMap<Uuid, VecDeque<MirrorTask>>>>;

/// Drains the repair queue. Each asset gets one lane that retries its tasks
/// in the order they were queued; different assets retry concurrently.
pub fn spawn_mirror_worker(
    mirror: Arc<Mirror>,
    mut rx: mpsc::UnboundedReceiver<MirrorTask>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let lanes: Lanes = Arc::default();
        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let asset_id = task.asset_id;
            let start_lane = {
                let mut lanes = lanes.lock().await;
                match lanes.get_mut(&asset_id) {
                    Some(waiting) => {
                        waiting.push_back(task);
                        false
                    }
                    None => {
                        lanes.insert(asset_id, VecDeque::from([task]));
                        true
                    }
                }
            };
            if start_lane {
                tokio::spawn(drain_lane(
                    mirror.clone(),
                    lanes.clone(),
                    asset_id,
                    policy,
                    shutdown.clone(),
                ));
            }
        }
        tracing::info!("Mirror worker stopped");
    })
}

async fn drain_lane(
    mirror: Arc<Mirror>,
    lanes: Lanes,
    asset_id: Uuid,
    policy: RetryPolicy,
    shutdown: CancellationToken,
) {
    loop {
        let next = {
            let mut lanes = lanes.lock().await;
            let next = lanes.get_mut(&asset_id).and_then(VecDeque::pop_front);
            if next.is_none() {
                lanes.remove(&asset_id);
            }
            next
        };
        let Some(task) = next else {
            return;
        };
        mirror.retry(task, policy, shutdown.clone()).await;
        mirror.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
