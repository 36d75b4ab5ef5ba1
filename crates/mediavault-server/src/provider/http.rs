//! HTTP provider gateway.
//!
//! Videos go to `{base}/video/v1/...`, images to `{base}/images/v1/...`. The
//! provider authenticates with HTTP basic auth using an access token pair.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{PlaybackSigner, ProviderGateway, UploadRequest, UploadTarget};
use crate::error::{AppError, AppResult};
use crate::models::AssetKind;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct HttpProviderGateway {
    client: reqwest::Client,
    base_url: String,
    token_id: String,
    token_secret: String,
    signer: PlaybackSigner,
}

impl HttpProviderGateway {
    pub fn new(
        base_url: impl Into<String>,
        token_id: impl Into<String>,
        token_secret: impl Into<String>,
        timeout: Duration,
        signer: PlaybackSigner,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_id: token_id.into(),
            token_secret: token_secret.into(),
            signer,
        })
    }

    fn product(kind: AssetKind) -> &'static str {
        match kind {
            AssetKind::Video => "video",
            AssetKind::Image => "images",
        }
    }

    fn url(&self, kind: AssetKind, path: &str) -> String {
        format!("{}/{}/v1/{}", self.base_url, Self::product(kind), path)
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    async fn create_upload_target(&self, request: &UploadRequest) -> AppResult<UploadTarget> {
        let response = self
            .client
            .post(self.url(request.kind, "uploads"))
            .basic_auth(&self.token_id, Some(&self.token_secret))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Unavailable(format!(
                "Provider returned {} creating upload",
                status
            )));
        }

        let envelope: Envelope<UploadData> = response.json().await?;
        tracing::debug!(
            asset_id = %request.asset_id,
            upload_id = %envelope.data.id,
            "Provider issued upload target"
        );
        Ok(UploadTarget {
            upload_id: envelope.data.id,
            url: envelope.data.url,
        })
    }

    async fn delete_remote_asset(&self, kind: AssetKind, provider_asset_id: &str) -> AppResult<()> {
        let mut url = reqwest::Url::parse(&self.url(kind, "assets"))
            .map_err(|e| AppError::Unavailable(format!("Invalid provider URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Unavailable("Provider URL cannot take a path".to_string()))?
            .push(provider_asset_id);

        let response = self
            .client
            .delete(url)
            .basic_auth(&self.token_id, Some(&self.token_secret))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::info!(provider_asset_id, "Remote asset already gone");
                Ok(())
            }
            status => Err(AppError::Unavailable(format!(
                "Provider returned {} deleting asset {}",
                status, provider_asset_id
            ))),
        }
    }

    fn sign_playback_credential(
        &self,
        kind: AssetKind,
        subject: &str,
        expires_at: DateTime<Utc>,
        claims: serde_json::Map<String, serde_json::Value>,
    ) -> AppResult<String> {
        self.signer.sign(kind, subject, expires_at, claims)
    }
}
