//! Claim types carried by signed playback credentials.

use serde::{Deserialize, Serialize};

/// Audience tag for video playback credentials.
pub const AUDIENCE_VIDEO: &str = "v";
/// Audience tag for image delivery credentials.
pub const AUDIENCE_IMAGE: &str = "i";

/// Claims of a playback credential.
///
/// The token body is the JCS canonical form of these claims, so any extra
/// claims are covered by the signature regardless of their order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackClaims {
    /// Provider-side identifier the credential grants access to.
    pub sub: String,
    /// Audience (`v` for video, `i` for images).
    pub aud: String,
    /// Expiry as unix seconds.
    pub exp: i64,
    /// Id of the key that signed the credential.
    pub kid: String,
    /// Caller-supplied claims (e.g. viewer id, playback restrictions).
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PlaybackClaims {
    /// Create claims with no extra fields.
    pub fn new(sub: String, aud: String, exp: i64, kid: String) -> Self {
        Self {
            sub,
            aud,
            exp,
            kid,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether the credential is expired at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}
