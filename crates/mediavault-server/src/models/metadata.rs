//! Metadata document: the schema-flexible mirror kept beside each record.
//!
//! `owners` mirrors the record's single owner. It is a list rather than an
//! option so a document that briefly diverges during reconciliation can still
//! be represented and repaired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::owner::OwnerRef;
use super::patch::Field;
use crate::error::AppError;

const MAX_TITLE_LEN: usize = 512;
const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_PASSTHROUGH_LEN: usize = 255;

/// Provider-reported detail for an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDetail {
    /// Provider asset id, when the provider has committed one.
    pub provider_asset_id: Option<String>,
    /// Provider status string (e.g. `ready`, `errored`).
    pub status: String,
    /// Raw provider payload (tracks, renditions, errors, ...).
    pub detail: serde_json::Value,
}

/// Direction recorded in the owner history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerAction {
    Associated,
    Deassociated,
}

/// One entry of the append-only owner history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerHistoryEntry {
    pub owner: OwnerRef,
    pub action: OwnerAction,
    pub at: DateTime<Utc>,
}

/// The metadata document stored per asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: Uuid,
    #[serde(default)]
    pub owners: Vec<OwnerRef>,
    #[serde(default)]
    pub owner_history: Vec<OwnerHistoryEntry>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub passthrough: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderDetail>,
    pub updated_at: DateTime<Utc>,
    /// Version of the stored copy this was read from; 0 when not stored yet.
    #[serde(skip)]
    pub version: i64,
}

/// Caller-editable descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Field::is_unchanged")]
    pub title: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unchanged")]
    pub description: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unchanged")]
    pub passthrough: Field<String>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_unchanged()
            && self.description.is_unchanged()
            && self.passthrough.is_unchanged()
    }

    /// Checks field lengths.
    pub fn validate(&self) -> Result<(), AppError> {
        let limits = [
            ("title", &self.title, MAX_TITLE_LEN),
            ("description", &self.description, MAX_DESCRIPTION_LEN),
            ("passthrough", &self.passthrough, MAX_PASSTHROUGH_LEN),
        ];
        for (name, field, max) in limits {
            if let Field::Set(value) = field {
                if value.chars().count() > max {
                    return Err(AppError::InvalidArgument(format!(
                        "{} exceeds {} characters",
                        name, max
                    )));
                }
            }
        }
        Ok(())
    }
}

impl AssetMetadata {
    /// Empty document for an asset.
    pub fn new(asset_id: Uuid) -> Self {
        Self {
            asset_id,
            owners: Vec::new(),
            owner_history: Vec::new(),
            title: None,
            description: None,
            passthrough: None,
            provider: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    /// Adds an owner unless already present. Returns whether it changed.
    pub fn add_owner(&mut self, owner: &OwnerRef, at: DateTime<Utc>) -> bool {
        if self.owners.contains(owner) {
            return false;
        }
        self.owners.push(owner.clone());
        self.record(owner, OwnerAction::Associated, at);
        true
    }

    /// Removes an owner if present. Returns whether it changed.
    pub fn remove_owner(&mut self, owner: &OwnerRef, at: DateTime<Utc>) -> bool {
        let before = self.owners.len();
        self.owners.retain(|existing| existing != owner);
        if self.owners.len() == before {
            return false;
        }
        self.record(owner, OwnerAction::Deassociated, at);
        true
    }

    /// Makes `owners` equal to `expected`, recording each change.
    /// Returns whether anything changed.
    pub fn replace_owners(&mut self, expected: &[OwnerRef], at: DateTime<Utc>) -> bool {
        let stale: Vec<OwnerRef> = self
            .owners
            .iter()
            .filter(|owner| !expected.contains(owner))
            .cloned()
            .collect();
        let mut changed = false;
        for owner in &stale {
            changed |= self.remove_owner(owner, at);
        }
        for owner in expected {
            changed |= self.add_owner(owner, at);
        }
        changed
    }

    /// Applies caller-editable fields.
    pub fn apply_patch(&mut self, patch: &MetadataPatch) {
        patch.title.apply_to(&mut self.title);
        patch.description.apply_to(&mut self.description);
        patch.passthrough.apply_to(&mut self.passthrough);
    }

    /// Sets only the fields the document does not hold yet. Returns whether
    /// anything changed.
    pub fn fill_missing(&mut self, patch: &MetadataPatch) -> bool {
        let mut changed = false;
        for (slot, field) in [
            (&mut self.title, &patch.title),
            (&mut self.description, &patch.description),
            (&mut self.passthrough, &patch.passthrough),
        ] {
            if let (true, Field::Set(value)) = (slot.is_none(), field) {
                *slot = Some(value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Replaces provider detail.
    pub fn merge_provider(&mut self, detail: ProviderDetail) {
        self.provider = Some(detail);
    }

    /// Aligns the provider id and status with what the record says, keeping
    /// any raw detail already stored. Returns whether anything changed.
    pub fn sync_provider(&mut self, provider_asset_id: Option<&str>, status: &str) -> bool {
        if let Some(current) = &self.provider {
            let same_id = current.provider_asset_id.as_deref() == provider_asset_id;
            if same_id && current.status == status {
                return false;
            }
        }
        let detail = self
            .provider
            .take()
            .map_or(serde_json::Value::Null, |current| current.detail);
        self.provider = Some(ProviderDetail {
            provider_asset_id: provider_asset_id.map(str::to_string),
            status: status.to_string(),
            detail,
        });
        true
    }

    fn record(&mut self, owner: &OwnerRef, action: OwnerAction, at: DateTime<Utc>) {
        self.owner_history.push(OwnerHistoryEntry {
            owner: owner.clone(),
            action,
            at,
        });
    }
}
