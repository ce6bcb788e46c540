//! Remote mutation client
//!
//! One call per mutating domain. Calls must be safe to repeat: a pass that
//! is interrupted after the server accepted a change will send it again.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::RemoteSettings;
use crate::error::{RemoteError, Result, SyncError};
use crate::types::{CheckinPayload, MutationPayload, NutritionDayPayload};

#[async_trait]
pub trait RemoteMutationClient: Send + Sync {
    /// Create or update the check-in for `payload.date`
    async fn create_checkin(
        &self,
        payload: &CheckinPayload,
    ) -> std::result::Result<(), RemoteError>;

    /// Create or replace the nutrition totals for `payload.date`
    async fn upsert_nutrition_day(
        &self,
        payload: &NutritionDayPayload,
    ) -> std::result::Result<(), RemoteError>;
}

/// Route a queued payload to the matching client call
pub async fn dispatch(
    client: &dyn RemoteMutationClient,
    payload: &MutationPayload,
) -> std::result::Result<(), RemoteError> {
    match payload {
        MutationPayload::Checkin(checkin) => client.create_checkin(checkin).await,
        MutationPayload::NutritionDay(day) => client.upsert_nutrition_day(day).await,
    }
}

/// HTTP client for the coaching API
///
/// # Example
///
/// ```rust,ignore
/// let client = HttpMutationClient::new(&RemoteSettings {
///     base_url: "https://api.example.com".into(),
///     api_token: Some(token),
///     ..Default::default()
/// })?;
/// client.create_checkin(&CheckinPayload::new(date).with_weight(81.5)).await?;
/// ```
pub struct HttpMutationClient {
    base_url: String,
    api_token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpMutationClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.url(path);

        let mut request = self.http_client.post(&url).json(body);
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(
                status.as_u16(),
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        debug!(url = %url, status = status.as_u16(), "Remote accepted mutation");
        Ok(())
    }
}

#[async_trait]
impl RemoteMutationClient for HttpMutationClient {
    async fn create_checkin(
        &self,
        payload: &CheckinPayload,
    ) -> std::result::Result<(), RemoteError> {
        self.post("/checkins", payload).await
    }

    async fn upsert_nutrition_day(
        &self,
        payload: &NutritionDayPayload,
    ) -> std::result::Result<(), RemoteError> {
        self.post("/nutrition/day", payload).await
    }
}
