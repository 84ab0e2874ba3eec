use super::{GatewayCredentials, OutboundSms, SmsGateway};
use crate::errors::{AppError, AppResult};
use crate::models::SmsReceipt;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const FALLBACK_ERROR: &str = "Failed to send SMS";

#[derive(Debug, Deserialize)]
struct MessageCreated {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayErrors {
    #[serde(default)]
    errors: Vec<GatewayErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorEntry {
    #[serde(default)]
    description: Option<String>,
}

/// MessageBird REST client. One POST per message, no retries.
#[derive(Debug, Clone)]
pub struct MessageBirdGateway {
    http: Client,
    endpoint: String,
}

impl MessageBirdGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("Failed to create HTTP client: {}", err)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SmsGateway for MessageBirdGateway {
    async fn send(&self, credentials: &GatewayCredentials, message: &OutboundSms) -> AppResult<SmsReceipt> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("AccessKey {}", credentials.api_key))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let description = serde_json::from_str::<GatewayErrors>(&body)
                .ok()
                .and_then(|parsed| parsed.errors.into_iter().next())
                .and_then(|entry| entry.description)
                .filter(|description| !description.is_empty())
                .unwrap_or_else(|| FALLBACK_ERROR.to_string());
            tracing::debug!(http_status = %status, "sms gateway rejected message");
            return Err(AppError::Gateway(description));
        }

        let created: MessageCreated = response.json().await?;
        Ok(SmsReceipt {
            message_id: created.id,
            status: created.status.unwrap_or_else(|| "sent".to_string()),
        })
    }
}
