pub mod email;
pub mod in_app;
pub mod push;
pub mod sms;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::NotificationConfig;
use crate::model::{Notification, NotificationType};

/// Outcome of a single provider invocation (§4.E). Validation failures are
/// non-retryable; 5xx/429/connection errors are retryable; other 4xx are
/// not.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retryable: bool,
}

impl ProviderResult {
    pub fn ok(message_id: impl Into<String>) -> Self {
        ProviderResult {
            success: true,
            provider_message_id: Some(message_id.into()),
            error_code: None,
            error_message: None,
            retryable: false,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        ProviderResult {
            success: false,
            provider_message_id: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            retryable,
        }
    }

    /// Classifies an HTTP status code into the retryable/non-retryable
    /// buckets fixed by §4.E: 5xx and 429 retryable, other 4xx not.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        if (200..300).contains(&status) {
            return ProviderResult::ok(body.to_string());
        }
        let retryable = status >= 500 || status == 429;
        ProviderResult::failure(status.to_string(), body.to_string(), retryable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    MissingField(String),
}

/// A channel adapter implementing the capability set from §9's
/// re-architecture note (generalizing the teacher's `Notifier` trait over
/// Telegram/Discord into SMTP/SendGrid/SES/Twilio/SNS/FCM/APNS/InApp).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn notification_types(&self) -> &[NotificationType];
    fn enabled(&self) -> bool {
        true
    }
    fn validate(&self, notification: &Notification) -> Result<(), ValidationError>;
    async fn send(&self, notification: &Notification) -> ProviderResult;
    async fn send_batch(&self, notifications: &[Notification]) -> Vec<ProviderResult> {
        let mut results = Vec::with_capacity(notifications.len());
        for n in notifications {
            results.push(self.send(n).await);
        }
        results
    }
    async fn check_status(&self, _provider_message_id: &str) -> Option<ProviderResult> {
        None
    }
}

/// Channel → ordered list of providers, with `get_provider` falling back
/// to the first enabled provider registered for the type (§4.E).
pub struct ProviderRegistry {
    by_type: HashMap<NotificationType, Vec<Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            by_type: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        for ty in provider.notification_types() {
            self.by_type.entry(*ty).or_default().push(provider.clone());
        }
    }

    pub fn get_provider(&self, notification_type: NotificationType) -> Option<Arc<dyn Provider>> {
        self.by_type
            .get(&notification_type)?
            .iter()
            .find(|p| p.enabled())
            .cloned()
    }

    pub fn from_config(config: &NotificationConfig, client: reqwest::Client) -> Self {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(email::EmailProvider::new(client.clone())));
        registry.register(Arc::new(sms::SmsProvider::new(client.clone(), config.sms_max_body_bytes)));
        registry.register(Arc::new(push::PushProvider::new(client.clone())));
        registry.register(Arc::new(in_app::InAppProvider::new()));
        registry
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
