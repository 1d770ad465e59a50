use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{BackboneError, BackboneResult};
use crate::ids::{NotificationId, TemplateId, TenantId, UserId};
use crate::model::{Notification, NotificationStatus, NotificationTemplate, UserPreferences};

use super::Index;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: Notification) -> BackboneResult<()>;
    async fn get(&self, id: &NotificationId) -> BackboneResult<Notification>;
    async fn update(&self, notification: Notification) -> BackboneResult<()>;
    async fn list(
        &self,
        user_id: Option<&UserId>,
        status: Option<NotificationStatus>,
        offset: usize,
        limit: usize,
    ) -> Vec<Notification>;
    /// Notifications deferred to the background processor that are now
    /// due (§4.H step 4 / §4.C pending-queue scan).
    async fn due_pending(&self, now: DateTime<Utc>) -> Vec<Notification>;

    async fn create_template(&self, template: NotificationTemplate) -> BackboneResult<()>;
    async fn get_template(&self, id: &TemplateId) -> BackboneResult<NotificationTemplate>;
    async fn update_template(&self, template: NotificationTemplate) -> BackboneResult<()>;
    async fn delete_template(&self, id: &TemplateId) -> BackboneResult<()>;
    async fn list_templates(&self, tenant_id: &TenantId) -> Vec<NotificationTemplate>;

    /// Loads a user's preferences, auto-creating the defaults on first
    /// access (§4.H step 2).
    async fn get_preferences(&self, user_id: &UserId) -> UserPreferences;
    async fn update_preferences(&self, user_id: &UserId, preferences: UserPreferences) -> BackboneResult<()>;
    async fn register_device_token(&self, user_id: &UserId, token: String) -> BackboneResult<()>;
    async fn unregister_device_token(&self, user_id: &UserId, token: &str) -> BackboneResult<()>;
}

#[derive(Default)]
struct NotificationIndexes {
    by_user: Index<UserId, NotificationId>,
    by_status: Index<NotificationStatusKey, NotificationId>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
struct NotificationStatusKey(u8);

impl From<NotificationStatus> for NotificationStatusKey {
    fn from(s: NotificationStatus) -> Self {
        NotificationStatusKey(s as u8)
    }
}

struct Inner {
    items: HashMap<NotificationId, Notification>,
    indexes: NotificationIndexes,
    templates: HashMap<TemplateId, NotificationTemplate>,
    preferences: HashMap<UserId, UserPreferences>,
}

pub struct InMemoryNotificationStore {
    inner: Mutex<Inner>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        InMemoryNotificationStore {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                indexes: NotificationIndexes::default(),
                templates: HashMap::new(),
                preferences: HashMap::new(),
            }),
        }
    }

    fn index(indexes: &mut NotificationIndexes, n: &Notification) {
        indexes.by_user.insert(n.recipient.user_id.clone(), n.notification_id);
        indexes.by_status.insert(n.status.into(), n.notification_id);
    }

    fn unindex(indexes: &mut NotificationIndexes, n: &Notification) {
        indexes.by_user.remove(&n.recipient.user_id, &n.notification_id);
        indexes.by_status.remove(&n.status.into(), &n.notification_id);
    }
}

impl Default for InMemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(&self, notification: Notification) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        Self::index(&mut inner.indexes, &notification);
        inner.items.insert(notification.notification_id, notification);
        Ok(())
    }

    async fn get(&self, id: &NotificationId) -> BackboneResult<Notification> {
        let inner = self.inner.lock().await;
        inner
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| BackboneError::NotFound(format!("notification {id}")))
    }

    async fn update(&self, notification: Notification) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.items.get(&notification.notification_id).cloned() {
            Self::unindex(&mut inner.indexes, &old);
        }
        Self::index(&mut inner.indexes, &notification);
        inner.items.insert(notification.notification_id, notification);
        Ok(())
    }

    async fn list(
        &self,
        user_id: Option<&UserId>,
        status: Option<NotificationStatus>,
        offset: usize,
        limit: usize,
    ) -> Vec<Notification> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&Notification> = inner.items.values().collect();
        if let Some(user_id) = user_id {
            candidates.retain(|n| &n.recipient.user_id == user_id);
        }
        if let Some(status) = status {
            candidates.retain(|n| n.status == status);
        }
        candidates.sort_by_key(|n| n.notification_id);
        candidates.into_iter().skip(offset).take(limit).cloned().collect()
    }

    async fn due_pending(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let inner = self.inner.lock().await;
        let mut due: Vec<Notification> = inner
            .items
            .values()
            .filter(|n| n.status == NotificationStatus::Pending)
            .filter(|n| !n.is_scheduled(now))
            .filter(|n| !n.is_expired(now))
            .cloned()
            .collect();
        due.sort_by_key(|n| n.scheduled_at.or(n.send_after));
        due
    }

    async fn create_template(&self, template: NotificationTemplate) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        inner.templates.insert(template.template_id, template);
        Ok(())
    }

    async fn get_template(&self, id: &TemplateId) -> BackboneResult<NotificationTemplate> {
        let inner = self.inner.lock().await;
        inner
            .templates
            .get(id)
            .cloned()
            .ok_or_else(|| BackboneError::NotFound(format!("template {id}")))
    }

    async fn update_template(&self, template: NotificationTemplate) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        inner.templates.insert(template.template_id, template);
        Ok(())
    }

    async fn delete_template(&self, id: &TemplateId) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .templates
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackboneError::NotFound(format!("template {id}")))
    }

    async fn list_templates(&self, tenant_id: &TenantId) -> Vec<NotificationTemplate> {
        let inner = self.inner.lock().await;
        inner
            .templates
            .values()
            .filter(|t| &t.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    async fn get_preferences(&self, user_id: &UserId) -> UserPreferences {
        let mut inner = self.inner.lock().await;
        inner.preferences.entry(user_id.clone()).or_default().clone()
    }

    async fn update_preferences(&self, user_id: &UserId, preferences: UserPreferences) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        inner.preferences.insert(user_id.clone(), preferences);
        Ok(())
    }

    async fn register_device_token(&self, user_id: &UserId, token: String) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        let prefs = inner.preferences.entry(user_id.clone()).or_default();
        if !prefs.device_tokens.contains(&token) {
            prefs.device_tokens.push(token);
        }
        Ok(())
    }

    async fn unregister_device_token(&self, user_id: &UserId, token: &str) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        let prefs = inner.preferences.entry(user_id.clone()).or_default();
        prefs.device_tokens.retain(|t| t != token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_preferences_auto_creates_defaults() {
        let store = InMemoryNotificationStore::new();
        let user = UserId("u1".to_string());
        let prefs = store.get_preferences(&user).await;
        assert!(prefs.notifications_enabled);
        assert!(prefs.channels.is_empty());
    }

    #[tokio::test]
    async fn update_preferences_persists() {
        let store = InMemoryNotificationStore::new();
        let user = UserId("u1".to_string());
        let mut prefs = store.get_preferences(&user).await;
        prefs.notifications_enabled = false;
        store.update_preferences(&user, prefs).await.unwrap();
        assert!(!store.get_preferences(&user).await.notifications_enabled);
    }

    #[tokio::test]
    async fn device_token_register_is_idempotent_and_unregister_removes() {
        let store = InMemoryNotificationStore::new();
        let user = UserId("u1".to_string());
        store.register_device_token(&user, "tok-1".to_string()).await.unwrap();
        store.register_device_token(&user, "tok-1".to_string()).await.unwrap();
        let prefs = store.get_preferences(&user).await;
        assert_eq!(prefs.device_tokens, vec!["tok-1".to_string()]);

        store.unregister_device_token(&user, "tok-1").await.unwrap();
        assert!(store.get_preferences(&user).await.device_tokens.is_empty());
    }
}
