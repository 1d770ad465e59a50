use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::NotificationConfig;
use crate::error::{BackboneError, BackboneResult};
use crate::events::EventBus;
use crate::ids::{NotificationId, TemplateId, TenantId, UserId};
use crate::model::{
    AttemptOutcome, Content, Notification, NotificationAttempt, NotificationStatus, NotificationTemplate,
    NotificationType,
};
use crate::preferences::should_send;
use crate::providers::{ProviderRegistry, ProviderResult};
use crate::store::rate_limit::RateLimitUnit;
use crate::store::{NotificationStore, RateLimitStore};
use crate::template;

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    rate_limits: Arc<RateLimitStore>,
    providers: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        rate_limits: Arc<RateLimitStore>,
        providers: Arc<ProviderRegistry>,
        events: Arc<EventBus>,
        config: NotificationConfig,
    ) -> Self {
        NotificationService {
            store,
            rate_limits,
            providers,
            events,
            config,
        }
    }

    /// §4.H: rate-limit gate -> preference gate -> persist -> scheduled
    /// deferral -> provider dispatch -> attempt logging -> status
    /// transition -> event emission.
    pub async fn send(&self, mut notification: Notification, check_preferences: bool) -> BackboneResult<Notification> {
        if !self.prepare(&mut notification, check_preferences).await? {
            return Ok(notification);
        }

        let dispatch_result = self.dispatch(&mut notification).await;
        self.store.update(notification.clone()).await?;
        dispatch_result?;
        Ok(notification)
    }

    /// Rate-limit gate -> preference gate -> persist -> rate-limit
    /// increment. Returns `Ok(true)` if the notification still needs
    /// dispatching, `Ok(false)` if it was deferred to a future
    /// `scheduled_at`. Shared by `send` and `send_bulk`.
    async fn prepare(&self, notification: &mut Notification, check_preferences: bool) -> BackboneResult<bool> {
        let now = Utc::now();
        let user_id = notification.recipient.user_id.clone();

        let prefs = self.store.get_preferences(&user_id).await;
        let hour_limit = prefs
            .channels
            .get(&notification.notification_type)
            .and_then(|c| c.max_per_hour)
            .unwrap_or(self.config.max_per_user_per_hour);
        let day_limit = prefs
            .channels
            .get(&notification.notification_type)
            .and_then(|c| c.max_per_day)
            .unwrap_or(self.config.max_per_user_per_day);

        let hour_count = self.rate_limits.count(&user_id, RateLimitUnit::Hour, now).await;
        let day_count = self.rate_limits.count(&user_id, RateLimitUnit::Day, now).await;
        if hour_count >= hour_limit || day_count >= day_limit {
            return Err(BackboneError::RateLimitExceeded(user_id.0));
        }

        if check_preferences {
            let allowed = should_send(&prefs, notification.notification_type, &notification.category, notification.priority);
            if !allowed {
                return Err(BackboneError::PreferencesBlocked(format!(
                    "{} blocked for user {}",
                    notification.category, user_id.0
                )));
            }
        }

        self.store.create(notification.clone()).await?;
        self.rate_limits.increment(&user_id, now).await;

        Ok(!notification.is_scheduled(now))
    }

    /// Invokes the provider and records the outcome; shared by `send` and
    /// the background pending-notification processor. On success the
    /// notification's status/attempts are updated in place; the caller is
    /// responsible for persisting it regardless of the returned `Result`.
    async fn dispatch(&self, notification: &mut Notification) -> BackboneResult<()> {
        let Some(provider) = self.providers.get_provider(notification.notification_type) else {
            notification.status = NotificationStatus::Failed;
            return Err(BackboneError::ProviderNotConfigured(format!(
                "{:?}",
                notification.notification_type
            )));
        };

        let result = provider.send(notification).await;
        self.apply_provider_result(notification, result, Utc::now());
        Ok(())
    }

    /// Invokes a single provider's batch path over a same-type group and
    /// applies the resulting `ProviderResult`s the same way `dispatch`
    /// would for one notification at a time. Pairs each notification with
    /// its own outcome so a missing provider still maps to one error per
    /// item rather than failing the whole group silently.
    async fn dispatch_batch(&self, notifications: Vec<Notification>) -> Vec<(Notification, BackboneResult<()>)> {
        let Some(first) = notifications.first() else {
            return Vec::new();
        };
        let notification_type = first.notification_type;

        let Some(provider) = self.providers.get_provider(notification_type) else {
            return notifications
                .into_iter()
                .map(|mut n| {
                    n.status = NotificationStatus::Failed;
                    let err = BackboneError::ProviderNotConfigured(format!("{notification_type:?}"));
                    (n, Err(err))
                })
                .collect();
        };

        let now = Utc::now();
        let outcomes = provider.send_batch(&notifications).await;
        notifications
            .into_iter()
            .zip(outcomes)
            .map(|(mut n, result)| {
                self.apply_provider_result(&mut n, result, now);
                (n, Ok(()))
            })
            .collect()
    }

    fn apply_provider_result(&self, notification: &mut Notification, result: ProviderResult, now: DateTime<Utc>) {
        let attempt = NotificationAttempt {
            attempted_at: now,
            outcome: if result.success {
                AttemptOutcome::Success
            } else if result.retryable {
                AttemptOutcome::RetryableFailure
            } else {
                AttemptOutcome::PermanentFailure
            },
            provider_message_id: result.provider_message_id.clone(),
            error_code: result.error_code.clone(),
            error_message: result.error_message.clone(),
        };
        notification.push_attempt(attempt, self.config.max_history);

        if result.success {
            notification.status = NotificationStatus::Sent;
            notification.sent_at = Some(now);
            self.events.publish(
                "notification.sent",
                serde_json::json!({
                    "notification_id": notification.notification_id.to_string(),
                    "notification_type": notification.notification_type,
                }),
            );
        } else if result.retryable && notification.can_retry(now) {
            notification.status = NotificationStatus::Pending;
        } else {
            notification.status = NotificationStatus::Failed;
            self.events.publish(
                "notification.failed",
                serde_json::json!({
                    "notification_id": notification.notification_id.to_string(),
                    "error_code": result.error_code,
                }),
            );
        }
    }

    /// Groups by notification type to use each provider's batch path,
    /// pausing `batch_delay_ms` between chunks of `batch_size` (§4.H).
    pub async fn send_bulk(&self, mut notifications: Vec<Notification>, check_preferences: bool) -> Vec<BackboneResult<Notification>> {
        let batch_size = self.config.batch_size.max(1);
        let total = notifications.len();
        let mut results: Vec<Option<BackboneResult<Notification>>> = (0..total).map(|_| None).collect();

        let mut offset = 0;
        while offset < total {
            let end = (offset + batch_size).min(total);

            let mut pending: Vec<usize> = Vec::new();
            for local_i in 0..(end - offset) {
                let global_i = offset + local_i;
                match self.prepare(&mut notifications[global_i], check_preferences).await {
                    Ok(true) => pending.push(local_i),
                    Ok(false) => results[global_i] = Some(Ok(notifications[global_i].clone())),
                    Err(e) => results[global_i] = Some(Err(e)),
                }
            }

            let mut groups: HashMap<NotificationType, Vec<usize>> = HashMap::new();
            for local_i in pending {
                let global_i = offset + local_i;
                groups.entry(notifications[global_i].notification_type).or_default().push(local_i);
            }

            for (_, local_indices) in groups {
                let group: Vec<Notification> = local_indices.iter().map(|&li| notifications[offset + li].clone()).collect();
                let dispatched = self.dispatch_batch(group).await;
                for (local_i, (notification, dispatch_result)) in local_indices.into_iter().zip(dispatched) {
                    let global_i = offset + local_i;
                    let _ = self.store.update(notification.clone()).await;
                    results[global_i] = Some(dispatch_result.map(|()| notification));
                }
            }

            offset = end;
            if self.config.batch_delay_ms > 0 && offset < total {
                tokio::time::sleep(StdDuration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        results
            .into_iter()
            .map(|r| r.expect("every index is filled by prepare or dispatch_batch above"))
            .collect()
    }

    pub async fn send_from_template(
        &self,
        template_id: &TemplateId,
        mut notification: Notification,
        variables: &std::collections::HashMap<String, serde_json::Value>,
        check_preferences: bool,
    ) -> BackboneResult<Notification> {
        let template = self.store.get_template(template_id).await?;
        let body = template::render(&template.body_template, variables);
        let subject = template
            .subject_template
            .as_ref()
            .map(|t| template::render(t, variables));

        notification.template_id = Some(*template_id);
        notification.content = Content {
            body: Some(body),
            subject,
            ..notification.content
        };

        self.send(notification, check_preferences).await
    }

    pub async fn cancel(&self, id: &NotificationId) -> BackboneResult<()> {
        let mut notification = self.store.get(id).await?;
        notification.status = NotificationStatus::Cancelled;
        self.store.update(notification).await
    }

    /// `read` is reachable only from {sent, delivered, pending} (§9 Open
    /// Question resolution).
    pub async fn mark_as_read(&self, id: &NotificationId) -> BackboneResult<()> {
        let mut notification = self.store.get(id).await?;
        if !notification.mark_read() {
            return Err(BackboneError::InvalidPayload(format!(
                "notification {id} cannot transition to read from its current status"
            )));
        }
        self.store.update(notification).await
    }

    pub async fn list(
        &self,
        user_id: Option<&UserId>,
        status: Option<NotificationStatus>,
        offset: usize,
        limit: usize,
    ) -> Vec<Notification> {
        self.store.list(user_id, status, offset, limit.min(100)).await
    }

    pub async fn create_template(&self, template: NotificationTemplate) -> BackboneResult<()> {
        self.store.create_template(template).await
    }

    pub async fn get_template(&self, id: &TemplateId) -> BackboneResult<NotificationTemplate> {
        self.store.get_template(id).await
    }

    pub async fn update_template(&self, template: NotificationTemplate) -> BackboneResult<()> {
        self.store.update_template(template).await
    }

    pub async fn delete_template(&self, id: &TemplateId) -> BackboneResult<()> {
        self.store.delete_template(id).await
    }

    pub async fn list_templates(&self, tenant_id: &TenantId) -> Vec<NotificationTemplate> {
        self.store.list_templates(tenant_id).await
    }

    pub async fn get_preferences(&self, user_id: &UserId) -> crate::model::UserPreferences {
        self.store.get_preferences(user_id).await
    }

    pub async fn update_preferences(&self, user_id: &UserId, prefs: crate::model::UserPreferences) -> BackboneResult<()> {
        self.store.update_preferences(user_id, prefs).await
    }

    pub async fn register_device_token(&self, user_id: &UserId, token: String) -> BackboneResult<()> {
        self.store.register_device_token(user_id, token).await
    }

    pub async fn unregister_device_token(&self, user_id: &UserId, token: &str) -> BackboneResult<()> {
        self.store.unregister_device_token(user_id, token).await
    }

    // ---- Background pending processor (§4.H "Background processor") ----

    pub fn spawn_pending_processor(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("notification pending processor shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(StdDuration::from_secs(self.config.poll_interval_seconds)) => {
                        if shutdown_rx.try_recv().is_ok() {
                            break;
                        }
                        self.process_pending().await;
                    }
                }
            }
        })
    }

    pub async fn process_pending(&self) {
        let now = Utc::now();
        let due = self.store.due_pending(now).await;
        for mut notification in due {
            let _ = self.dispatch(&mut notification).await;
            let _ = self.store.update(notification).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationType, Priority, Recipient};
    use std::collections::VecDeque;

    fn make_service() -> NotificationService {
        let store: Arc<dyn NotificationStore> = Arc::new(crate::store::InMemoryNotificationStore::new());
        let rate_limits = Arc::new(RateLimitStore::new());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(crate::providers::in_app::InAppProvider::new()));
        let providers = Arc::new(registry);
        let events = Arc::new(EventBus::default());
        let config = NotificationConfig {
            poll_interval_seconds: 5,
            default_max_attempts: 3,
            max_per_user_per_hour: 5,
            max_per_user_per_day: 200,
            batch_size: 50,
            batch_delay_ms: 0,
            max_history: 50,
            sms_max_body_bytes: 160,
        };
        NotificationService::new(store, rate_limits, providers, events, config)
    }

    fn base_notification(notification_type: NotificationType, priority: Priority) -> Notification {
        Notification {
            notification_id: NotificationId::new(),
            notification_type,
            category: "alerts".to_string(),
            priority,
            recipient: Recipient {
                user_id: UserId("u1".to_string()),
                email: Some("u1@example.com".to_string()),
                phone: None,
                device_tokens: vec![],
            },
            content: Content {
                title: Some("hi".to_string()),
                body: Some("body".to_string()),
                subject: Some("subj".to_string()),
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
            tenant_id: TenantId("t1".to_string()),
        }
    }

    #[tokio::test]
    async fn no_provider_configured_marks_failed_and_raises_error() {
        let service = make_service();
        let n = base_notification(NotificationType::Email, Priority::Normal);
        let notification_id = n.notification_id;
        let result = service.send(n, true).await;
        assert!(matches!(result, Err(BackboneError::ProviderNotConfigured(_))));

        let persisted = service.store.get(&notification_id).await.unwrap();
        assert_eq!(persisted.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn preferences_block_in_app_then_urgent_overrides() {
        let service = make_service();
        let user_id = UserId("u2".to_string());
        let mut prefs = crate::model::UserPreferences::default();
        prefs.channels.insert(
            NotificationType::InApp,
            crate::model::ChannelPreference {
                enabled: false,
                ..Default::default()
            },
        );
        service.update_preferences(&user_id, prefs).await.unwrap();

        let mut n = base_notification(NotificationType::InApp, Priority::Normal);
        n.recipient.user_id = user_id.clone();
        let blocked = service.send(n.clone(), true).await;
        assert!(matches!(blocked, Err(BackboneError::PreferencesBlocked(_))));

        let mut urgent = n;
        urgent.priority = Priority::Urgent;
        let sent = service.send(urgent, true).await.unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn send_bulk_groups_by_type_and_reports_per_item_outcomes() {
        let service = make_service();
        let mut n1 = base_notification(NotificationType::InApp, Priority::Normal);
        n1.recipient.user_id = UserId("bulk1".to_string());
        let mut n2 = base_notification(NotificationType::InApp, Priority::Normal);
        n2.recipient.user_id = UserId("bulk2".to_string());
        let mut n3 = base_notification(NotificationType::Email, Priority::Normal);
        n3.recipient.user_id = UserId("bulk3".to_string());

        let results = service.send_bulk(vec![n1, n2, n3], false).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().status, NotificationStatus::Sent);
        assert_eq!(results[1].as_ref().unwrap().status, NotificationStatus::Sent);
        assert!(matches!(results[2], Err(BackboneError::ProviderNotConfigured(_))));
    }

    #[tokio::test]
    async fn sixth_send_in_one_hour_raises_rate_limit_error() {
        let service = make_service();
        let user_id = UserId("u3".to_string());
        for _ in 0..5 {
            let mut n = base_notification(NotificationType::InApp, Priority::Normal);
            n.recipient.user_id = user_id.clone();
            service.send(n, false).await.unwrap();
        }
        let mut sixth = base_notification(NotificationType::InApp, Priority::Normal);
        sixth.recipient.user_id = user_id;
        let result = service.send(sixth, false).await;
        assert!(matches!(result, Err(BackboneError::RateLimitExceeded(_))));
    }
}
