use async_trait::async_trait;
use serde_json::json;

use crate::model::{Notification, NotificationType};

use super::{Provider, ProviderResult, ValidationError};

/// Generic email adapter. The concrete vendor (SMTP relay, SendGrid, SES)
/// is a deployment detail selected by `endpoint_url`; this crate posts a
/// vendor-neutral JSON envelope since wire formats are out of scope (§1).
pub struct EmailProvider {
    client: reqwest::Client,
    endpoint_url: String,
    types: [NotificationType; 1],
}

impl EmailProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, "http://localhost:0/providers/email".to_string())
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint_url: String) -> Self {
        EmailProvider {
            client,
            endpoint_url,
            types: [NotificationType::Email],
        }
    }
}

#[async_trait]
impl Provider for EmailProvider {
    fn name(&self) -> &str {
        "email"
    }

    fn notification_types(&self) -> &[NotificationType] {
        &self.types
    }

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError> {
        if notification.recipient.email.is_none() {
            return Err(ValidationError::MissingField("recipient.email".to_string()));
        }
        if notification.content.subject.is_none() {
            return Err(ValidationError::MissingField("content.subject".to_string()));
        }
        if notification.content.body.is_none() && notification.content.html_body.is_none() {
            return Err(ValidationError::MissingField(
                "content.body or content.html_body".to_string(),
            ));
        }
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> ProviderResult {
        if let Err(e) = self.validate(notification) {
            return ProviderResult::failure("VALIDATION_ERROR", e.to_string(), false);
        }

        let body = json!({
            "to": notification.recipient.email,
            "subject": notification.content.subject,
            "body": notification.content.body,
            "html_body": notification.content.html_body,
        });

        match self.client.post(&self.endpoint_url).json(&body).send().await {
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
    use crate::model::{Content, Priority, Recipient};
    use std::collections::VecDeque;

    fn notification_missing(field: &str) -> Notification {
        let mut recipient = Recipient {
            user_id: crate::ids::UserId("u1".to_string()),
            email: Some("a@example.com".to_string()),
            phone: None,
            device_tokens: vec![],
        };
        let mut content = Content {
            subject: Some("hi".to_string()),
            body: Some("body".to_string()),
            ..Default::default()
        };
        if field == "email" {
            recipient.email = None;
        }
        if field == "subject" {
            content.subject = None;
        }
        if field == "body" {
            content.body = None;
            content.html_body = None;
        }
        Notification {
            notification_id: crate::ids::NotificationId::new(),
            notification_type: NotificationType::Email,
            category: "test".to_string(),
            priority: Priority::Normal,
            recipient,
            content,
            status: crate::model::NotificationStatus::Pending,
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
    fn validate_requires_email() {
        let provider = EmailProvider::new(reqwest::Client::new());
        assert!(provider.validate(&notification_missing("email")).is_err());
    }

    #[test]
    fn validate_requires_subject() {
        let provider = EmailProvider::new(reqwest::Client::new());
        assert!(provider.validate(&notification_missing("subject")).is_err());
    }

    #[test]
    fn validate_requires_body_or_html() {
        let provider = EmailProvider::new(reqwest::Client::new());
        assert!(provider.validate(&notification_missing("body")).is_err());
    }

    #[test]
    fn validate_passes_with_all_fields() {
        let provider = EmailProvider::new(reqwest::Client::new());
        assert!(provider.validate(&notification_missing("")).is_ok());
    }
}
