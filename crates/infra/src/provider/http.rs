//! HTTP client for the screening provider's submission API.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use mediawatch_core::CorrelationId;

use super::{ProviderError, ScreeningProvider, SubmissionRequest, SubmissionResponse};
use crate::config::ProviderConfig;

#[derive(Debug, Clone)]
pub struct HttpScreeningProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpScreeningProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ScreeningProvider for HttpScreeningProvider {
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id), err)]
    async fn submit(&self, request: &SubmissionRequest) -> Result<CorrelationId, ProviderError> {
        let url = format!("{}/searches", self.base_url);
        let mut req = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(ProviderError::Rejected {
                status,
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: SubmissionResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        debug!(correlation_id = %body.correlation_id, "provider accepted search");
        Ok(body.correlation_id)
    }
}
