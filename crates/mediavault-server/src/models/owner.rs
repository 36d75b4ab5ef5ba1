//! Owner references and ownership change events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Maximum length of an owner id or owner type.
const MAX_OWNER_FIELD_LEN: usize = 255;

/// An external entity that may own at most one active asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_id: String,
    pub owner_type: String,
}

impl OwnerRef {
    pub fn new(owner_id: impl Into<String>, owner_type: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            owner_type: owner_type.into(),
        }
    }

    /// Rejects empty, padded or oversized identifiers.
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, value) in [("owner_id", &self.owner_id), ("owner_type", &self.owner_type)] {
            if value.trim().is_empty() {
                return Err(AppError::InvalidArgument(format!("{} must not be empty", name)));
            }
            if value.trim() != value {
                return Err(AppError::InvalidArgument(format!(
                    "{} must not have surrounding whitespace",
                    name
                )));
            }
            if value.len() > MAX_OWNER_FIELD_LEN {
                return Err(AppError::InvalidArgument(format!(
                    "{} exceeds {} characters",
                    name, MAX_OWNER_FIELD_LEN
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}

/// Direction of an ownership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipEventKind {
    Associated,
    Deassociated,
}

/// A committed ownership change, sent to the external notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEvent {
    pub kind: OwnershipEventKind,
    pub asset_id: Uuid,
    pub owner_id: String,
    pub owner_type: String,
    pub occurred_at: DateTime<Utc>,
}

impl OwnershipEvent {
    pub fn associated(asset_id: Uuid, owner: &OwnerRef) -> Self {
        Self::new(OwnershipEventKind::Associated, asset_id, owner)
    }

    pub fn deassociated(asset_id: Uuid, owner: &OwnerRef) -> Self {
        Self::new(OwnershipEventKind::Deassociated, asset_id, owner)
    }

    fn new(kind: OwnershipEventKind, asset_id: Uuid, owner: &OwnerRef) -> Self {
        Self {
            kind,
            asset_id,
            owner_id: owner.owner_id.clone(),
            owner_type: owner.owner_type.clone(),
            occurred_at: Utc::now(),
        }
    }

    pub fn owner(&self) -> OwnerRef {
        OwnerRef::new(self.owner_id.clone(), self.owner_type.clone())
    }
}
