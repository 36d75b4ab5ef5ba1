// MediaVault Crypto - Signing primitives for the media asset service

pub mod hash;
pub mod keys;
pub mod playback;
pub mod types;
pub mod webhook;

pub use hash::{sha256_bytes, sha256_hex};
pub use keys::{decode_signing_key, encode_signing_key, generate_keypair, key_id};
pub use playback::{sign_playback_token, verify_playback_token};
pub use types::PlaybackClaims;
pub use webhook::{sign_webhook, signature_header, WebhookVerifier, DEFAULT_TOLERANCE_SECS};
