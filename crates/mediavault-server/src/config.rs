//! Server configuration. Every flag can also be set through its environment
//! variable.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use crate::context::CallTimeouts;
use crate::mirror::RetryPolicy;

/// Backing implementation of both stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Postgres,
    /// In-process stores; data is lost on restart.
    Memory,
}

/// MediaVault - media asset lifecycle service
#[derive(Parser, Debug, Clone)]
#[command(name = "mediavault-server")]
#[command(version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "postgres")]
    pub store_backend: StoreBackend,

    /// Record store connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Metadata store connection string (defaults to DATABASE_URL)
    #[arg(long, env = "METADATA_DATABASE_URL")]
    pub metadata_database_url: Option<String>,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    #[arg(long, env = "PROVIDER_BASE_URL", default_value = "https://api.media-provider.example")]
    pub provider_base_url: String,

    #[arg(long, env = "PROVIDER_TOKEN_ID", default_value = "")]
    pub provider_token_id: String,

    #[arg(long, env = "PROVIDER_TOKEN_SECRET", default_value = "", hide_env_values = true)]
    pub provider_token_secret: String,

    /// Base64 Ed25519 seed used to sign playback credentials
    #[arg(long, env = "PLAYBACK_SIGNING_KEY", hide_env_values = true)]
    pub playback_signing_key: Option<String>,

    /// Key id embedded in credentials (derived from the key when unset)
    #[arg(long, env = "PLAYBACK_KEY_ID")]
    pub playback_key_id: Option<String>,

    /// Shared secret for provider webhook signatures
    #[arg(long, env = "WEBHOOK_SECRET", default_value = "", hide_env_values = true)]
    pub webhook_secret: String,

    #[arg(
        long,
        env = "WEBHOOK_TOLERANCE_SECS",
        default_value_t = mediavault_crypto::DEFAULT_TOLERANCE_SECS
    )]
    pub webhook_tolerance_secs: i64,

    /// Ownership notifier base URL (log-only when unset)
    #[arg(long, env = "NOTIFIER_URL")]
    pub notifier_url: Option<String>,

    /// Bearer token sent to the notifier
    #[arg(long, env = "NOTIFIER_TOKEN", hide_env_values = true)]
    pub notifier_token: Option<String>,

    /// Accepted service tokens (comma separated); auth is off when empty
    #[arg(long, env = "SERVICE_TOKENS", value_delimiter = ',', hide_env_values = true)]
    pub service_tokens: Vec<String>,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 5_000)]
    pub store_timeout_ms: u64,

    #[arg(long, env = "PROVIDER_TIMEOUT_MS", default_value_t = 10_000)]
    pub provider_timeout_ms: u64,

    #[arg(long, env = "MIRROR_MAX_ATTEMPTS", default_value_t = 8)]
    pub mirror_max_attempts: u32,

    #[arg(long, env = "MIRROR_BASE_DELAY_MS", default_value_t = 200)]
    pub mirror_base_delay_ms: u64,

    #[arg(long, env = "MIRROR_MAX_DELAY_MS", default_value_t = 30_000)]
    pub mirror_max_delay_ms: u64,

    /// Seconds between reconciliation sweeps (0 disables)
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value_t = 300)]
    pub reconcile_interval_secs: u64,

    /// Origin allowed to upload directly to the provider
    #[arg(long, env = "UPLOAD_CORS_ORIGIN", default_value = "*")]
    pub upload_cors_origin: String,
}

impl ServerConfig {
    /// Rejects combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            bail!("DATABASE_URL is required with the postgres store backend");
        }
        if self.request_timeout_ms == 0 {
            bail!("REQUEST_TIMEOUT_MS must be positive");
        }
        if self.provider_timeout_ms >= self.request_timeout_ms {
            bail!(
                "PROVIDER_TIMEOUT_MS ({}) must be smaller than REQUEST_TIMEOUT_MS ({})",
                self.provider_timeout_ms,
                self.request_timeout_ms
            );
        }
        if self.store_timeout_ms >= self.request_timeout_ms {
            bail!(
                "STORE_TIMEOUT_MS ({}) must be smaller than REQUEST_TIMEOUT_MS ({})",
                self.store_timeout_ms,
                self.request_timeout_ms
            );
        }
        if self.mirror_max_attempts == 0 {
            bail!("MIRROR_MAX_ATTEMPTS must be at least 1");
        }
        if self.webhook_tolerance_secs <= 0 {
            bail!("WEBHOOK_TOLERANCE_SECS must be positive");
        }
        Ok(())
    }

    pub fn metadata_url(&self) -> Option<&str> {
        self.metadata_database_url
            .as_deref()
            .or(self.database_url.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            store: Duration::from_millis(self.store_timeout_ms),
            provider: Duration::from_millis(self.provider_timeout_ms),
            notifier: Duration::from_millis(self.provider_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.mirror_max_attempts,
            base_delay: Duration::from_millis(self.mirror_base_delay_ms),
            max_delay: Duration::from_millis(self.mirror_max_delay_ms),
        }
    }

    /// `None` when periodic sweeps are disabled.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        let secs = self.reconcile_interval_secs;
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Configured tokens with blanks dropped.
    pub fn service_tokens(&self) -> Vec<String> {
        self.service_tokens
            .iter()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect()
    }
}
