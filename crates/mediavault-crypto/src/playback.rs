// Playback credential signing and verification
//
// A credential is `<payload>.<signature>` where `payload` is the base64url
// (unpadded) JCS canonical JSON of the claims and `signature` is the base64url
// Ed25519 signature over the payload text.

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::types::PlaybackClaims;

fn canonical_claims(claims: &PlaybackClaims) -> Result<Vec<u8>> {
    let value = serde_json::to_value(claims)?;
    Ok(serde_jcs::to_string(&value)?.into_bytes())
}

/// Signs playback claims and returns the encoded credential.
pub fn sign_playback_token(signing_key: &SigningKey, claims: &PlaybackClaims) -> Result<String> {
    let payload = BASE64_URL.encode(canonical_claims(claims)?);
    let signature = signing_key.sign(payload.as_bytes());
    Ok(format!("{}.{}", payload, BASE64_URL.encode(signature.to_bytes())))
}

/// Verifies a credential and returns its claims.
///
/// Fails if the signature does not match `verifying_key` or the credential is
/// expired at `now` (unix seconds).
pub fn verify_playback_token(
    verifying_key: &VerifyingKey,
    token: &str,
    now: i64,
) -> Result<PlaybackClaims> {
    let (payload, signature_part) = token
        .split_once('.')
        .ok_or_else(|| anyhow!("Malformed playback token: missing signature"))?;

    let signature_bytes = BASE64_URL
        .decode(signature_part)
        .map_err(|e| anyhow!("Invalid token signature encoding: {}", e))?;
    let signature_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| anyhow!("Invalid signature length: expected 64 bytes"))?;

    verifying_key
        .verify(payload.as_bytes(), &Signature::from_bytes(&signature_array))
        .map_err(|_| anyhow!("Signature verification failed"))?;

    let claims_bytes = BASE64_URL
        .decode(payload)
        .map_err(|e| anyhow!("Invalid token payload encoding: {}", e))?;
    let claims: PlaybackClaims = serde_json::from_slice(&claims_bytes)?;

    if claims.is_expired_at(now) {
        return Err(anyhow!("Playback token expired at {}", claims.exp));
    }

    Ok(claims)
}
