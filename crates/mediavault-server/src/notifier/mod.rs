//! External notifier: downstream services told about ownership changes.
//!
//! Notification is advisory. Delivery failures are logged by the caller and
//! never retried or rolled back.

pub mod http;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{OwnerRef, OwnershipEvent};

pub use http::HttpNotifier;

#[async_trait]
pub trait OwnershipNotifier: Send + Sync {
    /// Whether the owning entity exists downstream.
    async fn owner_exists(&self, owner: &OwnerRef) -> AppResult<bool>;

    /// Delivers a committed ownership change.
    async fn notify(&self, event: &OwnershipEvent) -> AppResult<()>;
}

/// Notifier used when no downstream endpoint is configured: every owner
/// exists and events are only logged.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl OwnershipNotifier for LogNotifier {
    async fn owner_exists(&self, _owner: &OwnerRef) -> AppResult<bool> {
        Ok(true)
    }

    async fn notify(&self, event: &OwnershipEvent) -> AppResult<()> {
        tracing::info!(
            asset_id = %event.asset_id,
            owner_id = %event.owner_id,
            owner_type = %event.owner_type,
            kind = ?event.kind,
            "Ownership event"
        );
        Ok(())
    }
}
