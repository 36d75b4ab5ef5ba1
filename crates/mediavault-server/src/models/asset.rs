//! Canonical asset record, the source of truth for existence and ownership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::owner::OwnerRef;

/// Kind of media, which selects the provider endpoints used for the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "asset_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Video hosted on the streaming provider.
    Video,
    /// Image hosted on the image CDN.
    Image,
}

impl AssetKind {
    /// Parse a kind from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "video" => Some(Self::Video),
            "image" => Some(Self::Image),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
        }
    }
}

/// Lifecycle state of an asset.
///
/// Soft deletion is tracked separately through `deleted_at`, so restoring an
/// asset returns it to whatever state it had before deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "asset_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    /// Upload target issued, waiting for the provider.
    Pending,
    /// Provider finished processing the asset.
    Ready,
    /// Provider reported a failure. Only cleared by deletion.
    Broken,
    /// Hidden from playback but retained.
    Archived,
}

impl AssetState {
    /// Parse a state from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "broken" => Some(Self::Broken),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Broken => "broken",
            Self::Archived => "archived",
        }
    }

    /// Whether `self -> next` is an allowed state transition.
    pub fn can_transition_to(&self, next: AssetState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready)
                | (Self::Pending, Self::Broken)
                | (Self::Ready, Self::Archived)
                | (Self::Archived, Self::Ready)
        )
    }

    /// Whether the provider has committed the asset.
    pub fn has_remote_asset(&self) -> bool {
        matches!(self, Self::Ready | Self::Archived)
    }
}

/// Represents an asset row in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AssetRecord {
    /// Unique identifier for this asset.
    pub id: Uuid,
    /// Media kind.
    pub kind: AssetKind,
    /// Upload id issued by the provider when the upload target was created.
    pub provider_upload_id: Option<String>,
    /// Provider asset id, set once the provider reports the asset ready.
    pub provider_asset_id: Option<String>,
    /// Owner id (set together with `owner_type`).
    pub owner_id: Option<String>,
    /// Owner type (set together with `owner_id`).
    pub owner_type: Option<String>,
    /// Current lifecycle state.
    pub state: AssetState,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
    /// When this record was last modified.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; null while the asset is active.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Data required to create a new asset record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssetRecord {
    pub id: Uuid,
    pub kind: AssetKind,
    pub provider_upload_id: String,
    pub owner: Option<OwnerRef>,
}

impl AssetRecord {
    /// Builds the in-memory representation of a freshly inserted row.
    pub fn from_new(new: &NewAssetRecord, now: DateTime<Utc>) -> Self {
        let (owner_id, owner_type) = match &new.owner {
            Some(owner) => (Some(owner.owner_id.clone()), Some(owner.owner_type.clone())),
            None => (None, None),
        };
        Self {
            id: new.id,
            kind: new.kind,
            provider_upload_id: Some(new.provider_upload_id.clone()),
            provider_asset_id: None,
            owner_id,
            owner_type,
            state: AssetState::Pending,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// The current owner, if both owner columns are set.
    pub fn owner(&self) -> Option<OwnerRef> {
        match (&self.owner_id, &self.owner_type) {
            (Some(owner_id), Some(owner_type)) => {
                Some(OwnerRef::new(owner_id.clone(), owner_type.clone()))
            }
            _ => None,
        }
    }

    /// Whether the asset is bound to the given owner.
    pub fn is_owned_by(&self, owner: &OwnerRef) -> bool {
        self.owner_id.as_deref() == Some(owner.owner_id.as_str())
            && self.owner_type.as_deref() == Some(owner.owner_type.as_str())
    }

    /// Whether the record carries the soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Both owner columns are set or both are null.
    pub fn owner_columns_consistent(&self) -> bool {
        self.owner_id.is_some() == self.owner_type.is_some()
    }

    /// Returns the URL path for this asset.
    pub fn url_path(&self) -> String {
        format!("/api/v1/assets/{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AssetRecord {
        AssetRecord::from_new(
            &NewAssetRecord {
                id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
                kind: AssetKind::Video,
                provider_upload_id: "up_1".to_string(),
                owner: Some(OwnerRef::new("42", "post")),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_state_transitions() {
        assert!(AssetState::Pending.can_transition_to(AssetState::Ready));
        assert!(AssetState::Pending.can_transition_to(AssetState::Broken));
        assert!(AssetState::Ready.can_transition_to(AssetState::Archived));
        assert!(AssetState::Archived.can_transition_to(AssetState::Ready));

        assert!(!AssetState::Broken.can_transition_to(AssetState::Ready));
        assert!(!AssetState::Broken.can_transition_to(AssetState::Archived));
        assert!(!AssetState::Ready.can_transition_to(AssetState::Pending));
        assert!(!AssetState::Pending.can_transition_to(AssetState::Archived));
        assert!(!AssetState::Ready.can_transition_to(AssetState::Broken));
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(AssetState::from_str("ready"), Some(AssetState::Ready));
        assert_eq!(AssetState::from_str("archived"), Some(AssetState::Archived));
        assert_eq!(AssetState::from_str("deleted"), None);
        assert_eq!(AssetState::Broken.as_str(), "broken");
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_string(&AssetKind::Image).unwrap(), "\"image\"");
        assert_eq!(AssetKind::from_str("video"), Some(AssetKind::Video));
        assert_eq!(AssetKind::from_str("audio"), None);
    }

    #[test]
    fn test_new_record_is_pending_and_owned() {
        let record = record();
        assert_eq!(record.state, AssetState::Pending);
        assert_eq!(record.provider_asset_id, None);
        assert_eq!(record.owner(), Some(OwnerRef::new("42", "post")));
        assert!(record.is_owned_by(&OwnerRef::new("42", "post")));
        assert!(!record.is_owned_by(&OwnerRef::new("42", "comment")));
        assert!(record.owner_columns_consistent());
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_half_set_owner_is_not_an_owner() {
        let mut record = record();
        record.owner_type = None;
        assert_eq!(record.owner(), None);
        assert!(!record.owner_columns_consistent());
    }

    #[test]
    fn test_url_path() {
        assert_eq!(
            record().url_path(),
            "/api/v1/assets/550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
