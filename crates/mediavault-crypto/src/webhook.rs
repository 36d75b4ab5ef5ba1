// Webhook signature scheme
//
// The provider signs `"<timestamp>.<raw body>"` with HMAC-SHA256 and sends the
// hex digest as `v1=<hex>`. Several comma-separated `v1` entries may be
// present while a secret is being rotated.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted clock skew between the signed timestamp and now.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const SCHEME_V1: &str = "v1";

fn mac_for(secret: &[u8], timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow!("Invalid webhook secret: {}", e))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Computes the hex HMAC-SHA256 of `"<timestamp>.<body>"`.
pub fn sign_webhook(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<String> {
    let mac = mac_for(secret, &timestamp.to_string(), body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the full signature header value (`v1=<hex>`).
pub fn signature_header(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<String> {
    Ok(format!("{}={}", SCHEME_V1, sign_webhook(secret, timestamp, body)?))
}

/// Verifies inbound webhook signatures against a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    /// Create a verifier with the default tolerance window.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Override the accepted clock skew.
    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies a delivery.
    ///
    /// # Arguments
    /// * `timestamp` - Raw timestamp header (unix seconds)
    /// * `signature` - Raw signature header (`v1=<hex>[,v1=<hex>...]`)
    /// * `body` - Raw request body, exactly as received
    /// * `now` - Current unix time in seconds
    pub fn verify(&self, timestamp: &str, signature: &str, body: &[u8], now: i64) -> Result<()> {
        if self.secret.is_empty() {
            return Err(anyhow!("Webhook secret is not configured"));
        }

        let timestamp = timestamp.trim();
        let sent_at: i64 = timestamp
            .parse()
            .map_err(|_| anyhow!("Invalid webhook timestamp: '{}'", timestamp))?;

        let skew = now.abs_diff(sent_at);
        if skew > u64::try_from(self.tolerance_secs).unwrap_or(0) {
            return Err(anyhow!(
                "Webhook timestamp outside tolerance: {}s skew (max {}s)",
                skew,
                self.tolerance_secs
            ));
        }

        let candidates: Vec<Vec<u8>> = signature
            .split(',')
            .filter_map(|entry| entry.trim().split_once('='))
            .filter(|(scheme, _)| *scheme == SCHEME_V1)
            .filter_map(|(_, value)| hex::decode(value).ok())
            .collect();

        if candidates.is_empty() {
            return Err(anyhow!("No v1 signature present in header"));
        }

        for candidate in &candidates {
            let mac = mac_for(&self.secret, timestamp, body)?;
            if mac.verify_slice(candidate).is_ok() {
                return Ok(());
            }
        }

        Err(anyhow!("Signature verification failed"))
    }
}
