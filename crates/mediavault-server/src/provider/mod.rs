//! Provider gateway: the remote media provider as an opaque capability.
//!
//! Every call is a single attempt. Retrying is the caller's business, and any
//! non-success surfaces as `AppError::Unavailable`.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mediavault_crypto::types::{AUDIENCE_IMAGE, AUDIENCE_VIDEO};
use mediavault_crypto::{key_id, sign_playback_token, PlaybackClaims};

use crate::error::{AppError, AppResult};
use crate::models::AssetKind;

pub use http::HttpProviderGateway;

/// Who may play an asset once it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPolicy {
    Public,
    #[default]
    Signed,
}

/// Parameters of a new direct upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRequest {
    /// Internal asset id, echoed back by the provider as passthrough.
    pub asset_id: Uuid,
    #[serde(skip)]
    pub kind: AssetKind,
    pub cors_origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<String>,
    pub playback_policy: PlaybackPolicy,
}

/// Where the caller sends the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub upload_id: String,
    pub url: String,
}

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn create_upload_target(&self, request: &UploadRequest) -> AppResult<UploadTarget>;

    /// Deletes a committed asset. An asset the provider no longer knows
    /// counts as deleted.
    async fn delete_remote_asset(&self, kind: AssetKind, provider_asset_id: &str) -> AppResult<()>;

    /// Mints a playback credential for `subject` valid until `expires_at`.
    fn sign_playback_credential(
        &self,
        kind: AssetKind,
        subject: &str,
        expires_at: DateTime<Utc>,
        claims: serde_json::Map<String, serde_json::Value>,
    ) -> AppResult<String>;
}

/// Ed25519 signer for playback credentials.
#[derive(Clone)]
pub struct PlaybackSigner {
    signing_key: SigningKey,
    kid: String,
}

impl std::fmt::Debug for PlaybackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSigner")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl PlaybackSigner {
    /// Uses `kid` when given, otherwise derives it from the public key.
    pub fn new(signing_key: SigningKey, kid: Option<String>) -> Self {
        let kid = kid.unwrap_or_else(|| key_id(&signing_key.verifying_key()));
        Self { signing_key, kid }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(
        &self,
        kind: AssetKind,
        subject: &str,
        expires_at: DateTime<Utc>,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> AppResult<String> {
        let audience = match kind {
            AssetKind::Video => AUDIENCE_VIDEO,
            AssetKind::Image => AUDIENCE_IMAGE,
        };
        let mut claims = PlaybackClaims::new(
            subject.to_string(),
            audience.to_string(),
            expires_at.timestamp(),
            self.kid.clone(),
        );
        for (key, value) in extra {
            // Reserved claims cannot be overridden by callers.
            if !matches!(key.as_str(), "sub" | "aud" | "exp" | "kid") {
                claims.extra.insert(key, value);
            }
        }
        sign_playback_token(&self.signing_key, &claims).map_err(|e| {
            AppError::Unavailable(format!("Failed to sign playback credential: {}", e))
        })
    }
}
