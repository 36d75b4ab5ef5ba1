//! Reconciliation sweep: repairs metadata documents whose record-derived
//! fields (owners, provider id and status) drifted from the record store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::metadata::MetadataStore;
use crate::models::{AssetMetadata, AssetRecord, AssetState, OwnerRef};
use crate::store::{ListQuery, RecordStore, Scope};

const SWEEP_PAGE_SIZE: i64 = 200;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records examined.
    pub scanned: usize,
    /// Documents created or rewritten.
    pub repaired: usize,
    /// Documents that could not be repaired this round.
    pub failed: usize,
}

pub struct ReconciliationSweep {
    records: Arc<dyn RecordStore>,
    metadata: Arc<dyn MetadataStore>,
    store_timeout: Duration,
}

impl ReconciliationSweep {
    pub fn new(
        records: Arc<dyn RecordStore>,
        metadata: Arc<dyn MetadataStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            records,
            metadata,
            store_timeout,
        }
    }

    /// Walks every record once and rewrites diverged documents.
    ///
    /// Fails only when the record store cannot be listed; per-document
    /// failures are counted in the report.
    pub async fn run_once(&self, ctx: &RequestContext) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut offset = 0;

        loop {
            let query = ListQuery {
                scope: Scope::All,
                limit: SWEEP_PAGE_SIZE,
                offset,
                ..Default::default()
            };
            let page = ctx
                .guard("record listing", self.store_timeout, self.records.list(&query))
                .await?;
            if page.is_empty() {
                break;
            }

            let ids: Vec<_> = page.iter().map(|record| record.id).collect();
            let docs = match ctx
                .guard("metadata listing", self.store_timeout, self.metadata.list_by_keys(&ids))
                .await
            {
                Ok(docs) => docs,
                Err(err) => {
                    tracing::warn!(error = %err, "Sweep could not read metadata page");
                    report.scanned += page.len();
                    report.failed += page.len();
                    offset += page.len() as i64;
                    continue;
                }
            };
            let mut docs: HashMap<_, _> = docs.into_iter().map(|doc| (doc.asset_id, doc)).collect();

            for record in &page {
                report.scanned += 1;
                let Some(doc) = repaired_document(record, docs.remove(&record.id)) else {
                    continue;
                };
                match ctx
                    .guard("metadata repair", self.store_timeout, self.metadata.upsert(&doc))
                    .await
                {
                    Ok(true) => {
                        report.repaired += 1;
                        tracing::info!(asset_id = %record.id, "Sweep repaired metadata");
                    }
                    Ok(false) => {
                        report.failed += 1;
                        tracing::debug!(
                            asset_id = %record.id,
                            "Document changed during sweep; left for the next run"
                        );
                    }
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(asset_id = %record.id, error = %err, "Sweep repair failed");
                    }
                }
            }

            if (page.len() as i64) < SWEEP_PAGE_SIZE {
                break;
            }
            offset += page.len() as i64;
        }

        Ok(report)
    }

    /// Runs the sweep every `interval` until `shutdown` fires.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let ctx = RequestContext::background();
                match self.run_once(&ctx).await {
                    Ok(report) if report.repaired > 0 || report.failed > 0 => {
                        tracing::info!(
                            scanned = report.scanned,
                            repaired = report.repaired,
                            failed = report.failed,
                            "Reconciliation sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "Reconciliation sweep failed"),
                }
            }
        })
    }
}

/// Provider status a document should carry for a record in `state`.
fn provider_status(state: AssetState) -> Option<&'static str> {
    match state {
        AssetState::Pending => None,
        AssetState::Ready | AssetState::Archived => Some("ready"),
        AssetState::Broken => Some("errored"),
    }
}

/// The document to write for `record`, or `None` if `current` already agrees.
fn repaired_document(
    record: &AssetRecord,
    current: Option<AssetMetadata>,
) -> Option<AssetMetadata> {
    let is_new = current.is_none();
    let mut doc = current.unwrap_or_else(|| AssetMetadata::new(record.id));
    let now = Utc::now();

    let expected: Vec<OwnerRef> = record.owner().into_iter().collect();
    let mut changed = doc.replace_owners(&expected, now);
    if let Some(status) = provider_status(record.state) {
        changed |= doc.sync_provider(record.provider_asset_id.as_deref(), status);
    }

    if !changed && !is_new {
        return None;
    }
    doc.updated_at = now;
    Some(doc)
}
