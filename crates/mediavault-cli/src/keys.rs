// Playback signing key files
//
// The server reads its playback signing key from PLAYBACK_SIGNING_KEY as the
// base64 seed. `keys generate` writes that seed to a file only the owner can
// read.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// A freshly generated signing key, ready to be stored or printed.
pub struct GeneratedKey {
    /// Base64 seed accepted by the server.
    pub signing_key: String,
    /// Key id embedded in every credential the key signs.
    pub key_id: String,
    /// Hex public key for players that verify credentials.
    pub public_key_hex: String,
}

pub fn generate() -> GeneratedKey {
    let (signing_key, verifying_key) = mediavault_crypto::generate_keypair();
    GeneratedKey {
        signing_key: mediavault_crypto::encode_signing_key(&signing_key),
        key_id: mediavault_crypto::key_id(&verifying_key),
        public_key_hex: hex_encode(verifying_key.as_bytes()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Writes the base64 seed to `path` with owner-only permissions.
///
/// # Arguments
/// * `path` - Destination file
/// * `encoded` - Base64 signing key seed
/// * `force` - Overwrite an existing file
pub fn write_key_file(path: &Path, encoded: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "'{}' already exists. Use --force to overwrite.",
            path.display()
        ));
    }

    std::fs::write(path, format!("{}\n", encoded))
        .with_context(|| format!("Failed to write key file '{}'", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict key file permissions")?;
    }

    Ok(())
}

/// Reads a key file back, checking it holds a usable key.
pub fn read_key_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file '{}'", path.display()))?;
    let encoded = content.trim().to_string();
    mediavault_crypto::decode_signing_key(&encoded)?;
    Ok(encoded)
}
