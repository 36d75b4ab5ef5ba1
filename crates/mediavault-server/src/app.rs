//! Assembles the service from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use mediavault_crypto::{decode_signing_key, generate_keypair, WebhookVerifier};

use crate::config::{ServerConfig, StoreBackend};
use crate::db;
use crate::lifecycle::{EngineConfig, LifecycleEngine};
use crate::metadata::{MemoryMetadataStore, MetadataStore, PgMetadataStore};
use crate::mirror::{Mirror, MirrorTask};
use crate::notifier::{HttpNotifier, LogNotifier, OwnershipNotifier};
use crate::provider::{HttpProviderGateway, PlaybackPolicy, PlaybackSigner, ProviderGateway};
use crate::routes::AppState;
use crate::store::{MemoryRecordStore, PgRecordStore, RecordStore};
use crate::sweep::ReconciliationSweep;
use crate::webhook::WebhookIngestor;

/// Everything `main` needs to start serving.
pub struct Services {
    pub state: AppState,
    pub mirror_rx: mpsc::UnboundedReceiver<MirrorTask>,
}

/// Builds the record and metadata stores for the configured backend.
pub async fn build_stores(
    config: &ServerConfig,
) -> Result<(Arc<dyn RecordStore>, Arc<dyn MetadataStore>)> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; data will not survive a restart");
            let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
            let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
            Ok((records, metadata))
        }
        StoreBackend::Postgres => {
            let acquire_timeout = Duration::from_millis(config.store_timeout_ms);
            let records_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required with the postgres store backend")?;
            let max_connections = config.database_max_connections;
            let records_pool = db::create_pool(records_url, max_connections, acquire_timeout)
                .await
                .context("failed to connect to record store")?;
            db::run_record_migrations(&records_pool)
                .await
                .context("failed to run record store migrations")?;

            let metadata_pool = match config.metadata_url() {
                Some(url) if url != records_url => {
                    db::create_pool(url, max_connections, acquire_timeout)
                        .await
                        .context("failed to connect to metadata store")?
                }
                _ => records_pool.clone(),
            };
            db::run_metadata_migrations(&metadata_pool)
                .await
                .context("failed to run metadata store migrations")?;
            tracing::info!("Database migrations applied");

            let records: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(records_pool));
            let metadata: Arc<dyn MetadataStore> = Arc::new(PgMetadataStore::new(metadata_pool));
            Ok((records, metadata))
        }
    }
}

fn build_signer(config: &ServerConfig) -> Result<PlaybackSigner> {
    let signing_key = match &config.playback_signing_key {
        Some(encoded) => decode_signing_key(encoded).context("invalid PLAYBACK_SIGNING_KEY")?,
        None => {
            tracing::warn!("No playback signing key configured; using an ephemeral key");
            generate_keypair().0
        }
    };
    let signer = PlaybackSigner::new(signing_key, config.playback_key_id.clone());
    tracing::info!(kid = signer.kid(), "Playback signer ready");
    Ok(signer)
}

/// Wires stores, collaborators and the engine into handler state.
pub async fn build(config: &ServerConfig) -> Result<Services> {
    let (records, metadata) = build_stores(config).await?;
    let timeouts = config.call_timeouts();

    let provider: Arc<dyn ProviderGateway> = Arc::new(
        HttpProviderGateway::new(
            config.provider_base_url.clone(),
            config.provider_token_id.clone(),
            config.provider_token_secret.clone(),
            timeouts.provider,
            build_signer(config)?,
        )
        .context("failed to build provider gateway")?,
    );

    let notifier: Arc<dyn OwnershipNotifier> = match &config.notifier_url {
        Some(url) => Arc::new(
            HttpNotifier::new(url.clone(), config.notifier_token.clone(), timeouts.notifier)
                .context("failed to build notifier")?,
        ),
        None => {
            tracing::info!("No NOTIFIER_URL configured; ownership events are only logged");
            Arc::new(LogNotifier)
        }
    };

    let (mirror, mirror_rx) = Mirror::new(records.clone(), metadata.clone(), timeouts.store);
    let engine = Arc::new(LifecycleEngine::new(
        records.clone(),
        metadata.clone(),
        provider,
        notifier,
        mirror,
        EngineConfig {
            timeouts,
            upload_cors_origin: config.upload_cors_origin.clone(),
            playback_policy: PlaybackPolicy::Signed,
        },
    ));

    if config.webhook_secret.is_empty() {
        tracing::warn!("WEBHOOK_SECRET is empty; every webhook will be rejected");
    }
    let verifier = WebhookVerifier::new(config.webhook_secret.as_bytes().to_vec())
        .with_tolerance(config.webhook_tolerance_secs);
    let ingestor = Arc::new(WebhookIngestor::new(verifier, engine.clone()));
    let sweep = Arc::new(ReconciliationSweep::new(records, metadata, timeouts.store));

    let service_tokens = config.service_tokens();
    if service_tokens.is_empty() {
        tracing::warn!("SERVICE_TOKENS is empty; asset and admin routes are unauthenticated");
    }

    Ok(Services {
        state: AppState {
            engine,
            ingestor,
            sweep,
            request_timeout: config.request_timeout(),
            service_tokens: Arc::new(service_tokens),
        },
        mirror_rx,
    })
}
