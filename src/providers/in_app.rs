use async_trait::async_trait;

use crate::model::{Notification, NotificationType};

use super::{Provider, ProviderResult, ValidationError};

/// In-app notifications have no external transport: the notification
/// record itself *is* the delivered artifact, so `send` is a synchronous
/// success once validation passes.
pub struct InAppProvider {
    types: [NotificationType; 1],
}

impl InAppProvider {
    pub fn new() -> Self {
        InAppProvider {
            types: [NotificationType::InApp],
        }
    }
}

impl Default for InAppProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for InAppProvider {
    fn name(&self) -> &str {
        "in_app"
    }

    fn notification_types(&self) -> &[NotificationType] {
        &self.types
    }

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError> {
        if notification.recipient.user_id.0.is_empty() {
            return Err(ValidationError::MissingField("recipient.user_id".to_string()));
        }
        if notification.content.title.is_none() && notification.content.body.is_none() {
            return Err(ValidationError::MissingField(
                "content.title or content.body".to_string(),
            ));
        }
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> ProviderResult {
        match self.validate(notification) {
            Ok(()) => ProviderResult::ok(notification.notification_id.to_string()),
            Err(e) => ProviderResult::failure("VALIDATION_ERROR", e.to_string(), false),
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
            notification_type: NotificationType::InApp,
            category: "alerts".to_string(),
            priority: Priority::Normal,
            recipient: Recipient {
                user_id: crate::ids::UserId("u1".to_string()),
                email: None,
                phone: None,
                device_tokens: vec![],
            },
            content: Content {
                title: Some("hi".to_string()),
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

    #[tokio::test]
    async fn send_succeeds_when_valid() {
        let provider = InAppProvider::new();
        let result = provider.send(&base_notification()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn send_fails_when_no_content() {
        let provider = InAppProvider::new();
        let mut n = base_notification();
        n.content.title = None;
        let result = provider.send(&n).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }
}
