//! Contract consumed from the remote inventory authority, plus its HTTP
//! implementation.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{PatchId, ServerId},
    error::ApiError,
    protocol::{Patch, Server},
};
use url::Url;

use crate::config::ClientSettings;

#[async_trait]
pub trait InventoryGateway: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<Server>>;
    async fn list_patches(&self, server_id: ServerId) -> Result<Vec<Patch>>;
    /// Returns the authority's updated record, or the reason it refused.
    async fn apply_patch(&self, server_id: ServerId, patch_id: PatchId) -> Result<Patch>;
}

pub struct MissingInventoryGateway;

#[async_trait]
impl InventoryGateway for MissingInventoryGateway {
    async fn list_servers(&self) -> Result<Vec<Server>> {
        Err(anyhow!("inventory authority is not configured"))
    }

    async fn list_patches(&self, server_id: ServerId) -> Result<Vec<Patch>> {
        Err(anyhow!(
            "inventory authority is not configured (patches for server {})",
            server_id.0
        ))
    }

    async fn apply_patch(&self, server_id: ServerId, patch_id: PatchId) -> Result<Patch> {
        Err(anyhow!(
            "inventory authority is not configured (apply patch {} on server {})",
            patch_id.0,
            server_id.0
        ))
    }
}

pub struct HttpInventoryGateway {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpInventoryGateway {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("invalid inventory base url '{base_url}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "inventory base url must start with http:// or https://, got '{base_url}'"
            ));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build inventory http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: None,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let mut gateway = Self::new(&settings.server_url, settings.request_timeout())?;
        gateway.api_token = settings.api_token.clone();
        Ok(gateway)
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<T> {
        let response = self
            .authorize(request)
            .send()
            .await
            .with_context(|| format!("{operation}: inventory authority unreachable"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{operation}: {status}: {}",
                failure_reason(&body, status)
            ));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("{operation}: malformed response body"))
    }
}

/// Prefers the authority's `ApiError.detail`, then the raw body, then the
/// status text.
fn failure_reason(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(api_error) = serde_json::from_str::<ApiError>(body) {
        return api_error.detail;
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

#[async_trait]
impl InventoryGateway for HttpInventoryGateway {
    async fn list_servers(&self) -> Result<Vec<Server>> {
        let request = self.http.get(format!("{}/servers", self.base_url));
        self.send_json(request, "list servers").await
    }

    async fn list_patches(&self, server_id: ServerId) -> Result<Vec<Patch>> {
        let request = self
            .http
            .get(format!("{}/servers/{}/patches", self.base_url, server_id.0));
        self.send_json(request, "list patches").await
    }

    async fn apply_patch(&self, server_id: ServerId, patch_id: PatchId) -> Result<Patch> {
        let request = self.http.post(format!(
            "{}/servers/{}/patches/{}/apply",
            self.base_url, server_id.0, patch_id.0
        ));
        self.send_json(request, "apply patch").await
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
