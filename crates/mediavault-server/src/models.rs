//! Domain models for media assets.

pub mod asset;
pub mod metadata;
pub mod owner;
pub mod patch;

pub use asset::{AssetKind, AssetRecord, AssetState, NewAssetRecord};
pub use metadata::{AssetMetadata, MetadataPatch, OwnerAction, OwnerHistoryEntry, ProviderDetail};
pub use owner::{OwnerRef, OwnershipEvent, OwnershipEventKind};
pub use patch::Field;
