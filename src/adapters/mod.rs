pub mod messagebird;

use crate::errors::AppResult;
use crate::models::SmsReceipt;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCredentials {
    pub api_key: String,
    pub originator: String,
}

/// A fully formatted message, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundSms {
    pub recipients: Vec<String>,
    pub originator: String,
    pub body: String,
}

/// Delivery seam for text messages. Implementations make exactly one
/// attempt and report the gateway's verdict.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, credentials: &GatewayCredentials, message: &OutboundSms) -> AppResult<SmsReceipt>;
}
