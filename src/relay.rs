use crate::adapters::{GatewayCredentials, OutboundSms, SmsGateway};
use crate::config::SmsConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{SmsReceipt, SmsRequest};
use crate::redaction::Redactor;
use std::sync::Arc;

const ELLIPSIS: &str = "...";
const COMPLAINT_REF_CHARS: usize = 8;
pub const MISSING_CREDENTIALS: &str = "Missing MessageBird credentials";

/// Turns a status-change event into one outbound text message.
#[derive(Clone)]
pub struct NotificationRelay {
    gateway: Arc<dyn SmsGateway>,
    credentials: Option<GatewayCredentials>,
    country_code: String,
    helpline: String,
    max_message_chars: usize,
    redactor: Redactor,
}

impl NotificationRelay {
    pub fn new(gateway: Arc<dyn SmsGateway>, config: &SmsConfig) -> Self {
        let credentials = match (&config.api_key, &config.originator) {
            (Some(api_key), Some(originator)) if !api_key.is_empty() && !originator.is_empty() => {
                Some(GatewayCredentials {
                    api_key: api_key.clone(),
                    originator: originator.clone(),
                })
            }
            _ => None,
        };
        Self {
            gateway,
            credentials,
            country_code: config.country_code.clone(),
            helpline: config.helpline.clone(),
            max_message_chars: config.max_message_chars.max(ELLIPSIS.len() + 1),
            redactor: Redactor::new(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub async fn send(&self, request: &SmsRequest) -> AppResult<SmsReceipt> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(AppError::Gateway(MISSING_CREDENTIALS.to_string()));
        };

        let (Some(to), Some(complaint_id), Some(status)) = (
            present(request.to.as_deref()),
            present(request.complaint_id.as_deref()),
            present(request.status.as_deref()),
        ) else {
            return Err(AppError::Validation("Missing required parameters".to_string()));
        };

        let message = OutboundSms {
            recipients: vec![self.normalize_recipient(to)],
            originator: credentials.originator.clone(),
            body: self.format_body(complaint_id, status, request.message.as_deref()),
        };

        match self.gateway.send(credentials, &message).await {
            Ok(receipt) => {
                tracing::info!(
                    recipient = %self.redactor.mask_phone(to),
                    message_id = %receipt.message_id,
                    "status sms sent"
                );
                Ok(receipt)
            }
            Err(error) => {
                tracing::warn!(
                    recipient = %self.redactor.mask_phone(to),
                    error = %self.redactor.redact(&error.to_string()),
                    "status sms failed"
                );
                Err(error)
            }
        }
    }

    pub fn normalize_recipient(&self, to: &str) -> String {
        if to.starts_with('+') {
            to.to_string()
        } else {
            format!("{}{}", self.country_code, to)
        }
    }

    pub fn truncate_message(&self, message: &str) -> String {
        if message.chars().count() <= self.max_message_chars {
            return message.to_string();
        }
        let kept: String = message
            .chars()
            .take(self.max_message_chars - ELLIPSIS.len())
            .collect();
        format!("{}{}", kept, ELLIPSIS)
    }

    pub fn format_body(&self, complaint_id: &str, status: &str, message: Option<&str>) -> String {
        let reference: String = complaint_id.chars().take(COMPLAINT_REF_CHARS).collect();
        let mut body = format!("Complaint #{} Status: {}", reference, status);
        if let Some(message) = message.filter(|message| !message.is_empty()) {
            body.push('\n');
            body.push_str(&self.truncate_message(message));
        }
        body.push_str("\nContact: ");
        body.push_str(&self.helpline);
        body
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::NotificationRelay;
    use crate::adapters::{GatewayCredentials, OutboundSms, SmsGateway};
    use crate::config::SmsConfig;
    use crate::errors::{AppError, AppResult};
    use crate::models::{SmsReceipt, SmsRequest};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<OutboundSms>>,
        reject_with: Option<String>,
    }

    #[async_trait]
    impl SmsGateway for RecordingGateway {
        async fn send(&self, _credentials: &GatewayCredentials, message: &OutboundSms) -> AppResult<SmsReceipt> {
            self.sent.lock().expect("lock").push(message.clone());
            if let Some(error) = &self.reject_with {
                return Err(AppError::Gateway(error.clone()));
            }
            Ok(SmsReceipt {
                message_id: "mb-1".to_string(),
                status: "sent".to_string(),
            })
        }
    }

    fn configured() -> SmsConfig {
        SmsConfig {
            api_key: Some("test_key".to_string()),
            originator: Some("KeralaGov".to_string()),
            ..SmsConfig::default()
        }
    }

    fn request(to: &str, message: Option<&str>) -> SmsRequest {
        SmsRequest {
            to: Some(to.to_string()),
            complaint_id: Some("3f2a9c1e-0000-4000-8000-000000000000".to_string()),
            status: Some("resolved".to_string()),
            message: message.map(ToString::to_string),
        }
    }

    #[tokio::test]
    async fn missing_credentials_never_reach_the_gateway() {
        let gateway = Arc::new(RecordingGateway::default());
        let relay = NotificationRelay::new(gateway.clone(), &SmsConfig::default());

        let result = relay.send(&request("9876543210", None)).await;
        assert!(matches!(result, Err(AppError::Gateway(ref message)) if message == "Missing MessageBird credentials"));
        assert!(gateway.sent.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_sending() {
        let gateway = Arc::new(RecordingGateway::default());
        let relay = NotificationRelay::new(gateway.clone(), &configured());

        let mut incomplete = request("9876543210", None);
        incomplete.status = None;
        let result = relay.send(&incomplete).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(gateway.sent.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn local_numbers_get_country_code_and_body_is_templated() {
        let gateway = Arc::new(RecordingGateway::default());
        let relay = NotificationRelay::new(gateway.clone(), &configured());

        let receipt = relay.send(&request("9876543210", Some("Fixed"))).await.expect("sent");
        assert_eq!(receipt.message_id, "mb-1");

        let sent = gateway.sent.lock().expect("lock");
        assert_eq!(sent[0].recipients, vec!["+919876543210".to_string()]);
        assert_eq!(sent[0].originator, "KeralaGov");
        assert_eq!(
            sent[0].body,
            "Complaint #3f2a9c1e Status: resolved\nFixed\nContact: 1800-425-1456"
        );
    }

    #[tokio::test]
    async fn international_numbers_pass_through() {
        let gateway = Arc::new(RecordingGateway::default());
        let relay = NotificationRelay::new(gateway.clone(), &configured());
        relay.send(&request("+447700900123", None)).await.expect("sent");
        let sent = gateway.sent.lock().expect("lock");
        assert_eq!(sent[0].recipients, vec!["+447700900123".to_string()]);
        assert_eq!(sent[0].body, "Complaint #3f2a9c1e Status: resolved\nContact: 1800-425-1456");
    }

    #[test]
    fn long_messages_keep_97_characters_and_an_ellipsis() {
        let relay = NotificationRelay::new(Arc::new(RecordingGateway::default()), &configured());
        let long: String = "ക".repeat(150);
        let truncated = relay.truncate_message(&long);
        assert_eq!(truncated.chars().count(), 100);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().take(97).collect::<String>(), "ക".repeat(97));

        let exact = "a".repeat(100);
        assert_eq!(relay.truncate_message(&exact), exact);
    }

    #[tokio::test]
    async fn gateway_rejection_is_reported() {
        let gateway = Arc::new(RecordingGateway {
            reject_with: Some("originator is invalid".to_string()),
            ..RecordingGateway::default()
        });
        let relay = NotificationRelay::new(gateway, &configured());
        let result = relay.send(&request("9876543210", None)).await;
        assert!(matches!(result, Err(AppError::Gateway(ref message)) if message == "originator is invalid"));
    }
}
