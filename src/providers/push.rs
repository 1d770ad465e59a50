use async_trait::async_trait;
use serde_json::json;

use crate::model::{Notification, NotificationType};

use super::{Provider, ProviderResult, ValidationError};

/// Generic push adapter (stands in for FCM/APNS).
pub struct PushProvider {
    client: reqwest::Client,
    endpoint_url: String,
    types: [NotificationType; 1],
}

impl PushProvider {
    pub fn new(client: reqwest::Client) -> Self {
        PushProvider {
            client,
            endpoint_url: "http://localhost:0/providers/push".to_string(),
            types: [NotificationType::Push],
        }
    }
}

#[async_trait]
impl Provider for PushProvider {
    fn name(&self) -> &str {
        "push"
    }

    fn notification_types(&self) -> &[NotificationType] {
        &self.types
    }

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError> {
        if notification.recipient.device_tokens.is_empty() {
            return Err(ValidationError::MissingField("recipient.device_tokens".to_string()));
        }
        if notification.content.title.is_none() {
            return Err(ValidationError::MissingField("content.title".to_string()));
        }
        if notification.content.body.is_none() {
            return Err(ValidationError::MissingField("content.body".to_string()));
        }
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> ProviderResult {
        if let Err(e) = self.validate(notification) {
            return ProviderResult::failure("VALIDATION_ERROR", e.to_string(), false);
        }

        let payload = json!({
            "device_tokens": notification.recipient.device_tokens,
            "title": notification.content.title,
            "body": notification.content.body,
            "data": notification.content.data,
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

    fn base_notification() -> Notification {
        Notification {
            notification_id: crate::ids::NotificationId::new(),
            notification_type: NotificationType::Push,
            category: "alerts".to_string(),
            priority: Priority::Normal,
            recipient: Recipient {
                user_id: crate::ids::UserId("u1".to_string()),
                email: None,
                phone: None,
                device_tokens: vec!["token-1".to_string()],
            },
            content: Content {
                title: Some("Heads up".to_string()),
                body: Some("Something happened".to_string()),
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
    fn validate_requires_device_tokens() {
        let provider = PushProvider::new(reqwest::Client::new());
        let mut n = base_notification();
        n.recipient.device_tokens.clear();
        assert!(provider.validate(&n).is_err());
    }

    #[test]
    fn validate_passes() {
        let provider = PushProvider::new(reqwest::Client::new());
        assert!(provider.validate(&base_notification()).is_ok());
    }
}
