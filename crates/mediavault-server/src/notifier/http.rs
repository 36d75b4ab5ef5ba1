//! HTTP notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::OwnershipNotifier;
use crate::error::{AppError, AppResult};
use crate::models::{OwnerRef, OwnershipEvent};

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpNotifier {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl OwnershipNotifier for HttpNotifier {
    async fn owner_exists(&self, owner: &OwnerRef) -> AppResult<bool> {
        let url = format!(
            "{}/owners/{}/{}",
            self.base_url, owner.owner_type, owner.owner_id
        );
        let response = self.authorize(self.client.get(url)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(AppError::Unavailable(format!(
                "Notifier returned {} looking up owner {}",
                status, owner
            ))),
        }
    }

    async fn notify(&self, event: &OwnershipEvent) -> AppResult<()> {
        let url = format!("{}/ownership-events", self.base_url);
        let response = self.authorize(self.client.post(url)).json(event).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Unavailable(format!(
                "Notifier returned {} for {:?} event",
                status, event.kind
            )));
        }
        Ok(())
    }
}
