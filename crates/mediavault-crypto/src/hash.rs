// SHA-256 helpers

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of the input bytes.
pub fn sha256_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Computes the SHA-256 hash of the input bytes and returns it as a lowercase hex string.
///
/// Used to fingerprint webhook bodies in logs without echoing their content.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_hex_matches_raw_digest() {
        let raw = sha256_bytes(b"webhook body");
        assert_eq!(hex::encode(raw), sha256_hex(b"webhook body"));
    }
}
