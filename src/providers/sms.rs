use async_trait::async_trait;
use serde_json::json;

use crate::model::{Notification, NotificationType};

use super::{Provider, ProviderResult, ValidationError};

/// Generic SMS adapter (stands in for Twilio/SNS-style vendors).
pub struct SmsProvider {
    client: reqwest::Client,
    endpoint_url: String,
    max_body_bytes: usize,
    types: [NotificationType; 1],
}

impl SmsProvider {
    pub fn new(client: reqwest::Client, max_body_bytes: usize) -> Self {
        SmsProvider {
            client,
            endpoint_url: "http://localhost:0/providers/sms".to_string(),
            max_body_bytes,
            types: [NotificationType::Sms],
        }
    }
}

#[async_trait]
impl Provider for SmsProvider {
    fn name(&self) -> &str {
        "sms"
    }

    fn notification_types(&self) -> &[NotificationType] {
        &self.types
    }

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError> {
        if notification.recipient.phone.is_none() {
            return Err(ValidationError::MissingField("recipient.phone".to_string()));
        }
        if notification.content.body.is_none() && notification.content.short_body.is_none() {
            return Err(ValidationError::MissingField("content.body".to_string()));
        }
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> ProviderResult {
        if let Err(e) = self.validate(notification) {
            return ProviderResult::failure("VALIDATION_ERROR", e.to_string(), false);
        }

        let body = match notification.content.sms_body(self.max_body_bytes) {
            Some(b) => b,
            None => {
                return ProviderResult::failure("VALIDATION_ERROR", "empty SMS body", false);
            }
        };

        let payload = json!({
            "to": notification.recipient.phone,
            "body": body,
        });

        match self.client.post(&self.endpoint_url).json(&payload).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                ProviderResult::from_http_status(status, &text)
            }
            Err(e) => ProviderResult::failure("CONNECTION_ERROR", e.to_string(), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, NotificationStatus, Priority, Recipient};
    use std::collections::VecDeque;

    fn base_notification(body: &str) -> Notification {
        Notification {
            notification_id: crate::ids::NotificationId::new(),
            notification_type: NotificationType::Sms,
            category: "alerts".to_string(),
            priority: Priority::Normal,
            recipient: Recipient {
                user_id: crate::ids::UserId("u1".to_string()),
                email: None,
                phone: Some("+15551234567".to_string()),
                device_tokens: vec![],
            },
            content: Content {
                body: Some(body.to_string()),
                ..Default::default()
            },
            status: NotificationStatus::Pending,
            attempts: VecDeque::new(),
            max_attempts: 3,
            scheduled_at: None,
            send_after: None,
            expires_at: None,
            sent_at: None,
            template_id: None,
            group_id: None,
            thread_id: None,
            tenant_id: crate::ids::TenantId("t1".to_string()),
        }
    }

    #[test]
    fn validate_requires_phone_and_body() {
        let provider = SmsProvider::new(reqwest::Client::new(), 160);
        let mut n = base_notification("hello");
        n.recipient.phone = None;
        assert!(provider.validate(&n).is_err());
    }

    #[test]
    fn validate_passes_with_phone_and_body() {
        let provider = SmsProvider::new(reqwest::Client::new(), 160);
        assert!(provider.validate(&base_notification("hello")).is_ok());
    }
}
