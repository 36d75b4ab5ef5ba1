// Playback signing key handling

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::hash::sha256_bytes;

/// Number of digest bytes folded into a key id.
const KEY_ID_BYTES: usize = 12;

/// Generates a new Ed25519 keypair using secure random bytes from the OS.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Encodes the 32-byte seed of a signing key as standard base64.
pub fn encode_signing_key(signing_key: &SigningKey) -> String {
    BASE64_STANDARD.encode(signing_key.to_bytes())
}

/// Decodes a base64 32-byte seed into a signing key.
///
/// Surrounding whitespace is ignored so keys can be pasted from files.
pub fn decode_signing_key(encoded: &str) -> Result<SigningKey> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| anyhow!("Invalid base64 signing key: {}", e))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("Invalid signing key length: expected 32 bytes"))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Derives a short, stable key id for a verifying key.
///
/// The id is the base58 encoding of the leading bytes of the SHA-256 of the
/// public key, so rotating keys always yields a new id.
pub fn key_id(verifying_key: &VerifyingKey) -> String {
    let digest = sha256_bytes(verifying_key.as_bytes());
    bs58::encode(&digest[..KEY_ID_BYTES]).into_string()
}
