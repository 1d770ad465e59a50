use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{BackboneError, BackboneResult};
use crate::ids::{DeliveryId, OwnerId, TenantId, WebhookId};
use crate::model::{DeliveryStatus, WebhookDelivery, WebhookEndpoint};

use super::Index;

#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn create_endpoint(&self, endpoint: WebhookEndpoint) -> BackboneResult<()>;
    async fn get_endpoint(&self, id: &WebhookId) -> BackboneResult<WebhookEndpoint>;
    async fn update_endpoint(&self, endpoint: WebhookEndpoint) -> BackboneResult<()>;
    async fn delete_endpoint(&self, id: &WebhookId) -> BackboneResult<()>;
    async fn list_endpoints(
        &self,
        owner_id: Option<&OwnerId>,
        tenant_id: Option<&TenantId>,
        offset: usize,
        limit: usize,
    ) -> Vec<WebhookEndpoint>;
    /// Endpoints subscribed to `event_type` or the `*` wildcard.
    async fn endpoints_for_event(&self, event_type: &str) -> Vec<WebhookEndpoint>;

    async fn create_delivery(&self, delivery: WebhookDelivery) -> BackboneResult<()>;
    async fn get_delivery(&self, id: &DeliveryId) -> BackboneResult<WebhookDelivery>;
    async fn update_delivery(&self, delivery: WebhookDelivery) -> BackboneResult<()>;
    async fn list_deliveries(
        &self,
        webhook_id: Option<&WebhookId>,
        offset: usize,
        limit: usize,
    ) -> Vec<WebhookDelivery>;
    /// Deliveries due for another attempt, ordered by `next_attempt_at`.
    async fn due_deliveries(&self, now: DateTime<Utc>) -> Vec<WebhookDelivery>;
}

#[derive(Default)]
struct EndpointIndexes {
    by_owner: Index<OwnerId, WebhookId>,
    by_tenant: Index<TenantId, WebhookId>,
    by_event: Index<String, WebhookId>,
}

struct Inner {
    endpoints: HashMap<WebhookId, WebhookEndpoint>,
    endpoint_indexes: EndpointIndexes,
    deliveries: HashMap<DeliveryId, WebhookDelivery>,
    deliveries_by_webhook: Index<WebhookId, DeliveryId>,
}

pub struct InMemoryWebhookStore {
    inner: Mutex<Inner>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        InMemoryWebhookStore {
            inner: Mutex::new(Inner {
                endpoints: HashMap::new(),
                endpoint_indexes: EndpointIndexes::default(),
                deliveries: HashMap::new(),
                deliveries_by_webhook: Index::new(),
            }),
        }
    }

    fn index_endpoint(indexes: &mut EndpointIndexes, endpoint: &WebhookEndpoint) {
        indexes.by_owner.insert(endpoint.owner_id.clone(), endpoint.webhook_id);
        indexes.by_tenant.insert(endpoint.tenant_id.clone(), endpoint.webhook_id);
        for event in &endpoint.events {
            indexes.by_event.insert(event.clone(), endpoint.webhook_id);
        }
    }

    fn unindex_endpoint(indexes: &mut EndpointIndexes, endpoint: &WebhookEndpoint) {
        indexes.by_owner.remove(&endpoint.owner_id, &endpoint.webhook_id);
        indexes.by_tenant.remove(&endpoint.tenant_id, &endpoint.webhook_id);
        for event in &endpoint.events {
            indexes.by_event.remove(event, &endpoint.webhook_id);
        }
    }
}

impl Default for InMemoryWebhookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn create_endpoint(&self, endpoint: WebhookEndpoint) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        Self::index_endpoint(&mut inner.endpoint_indexes, &endpoint);
        inner.endpoints.insert(endpoint.webhook_id, endpoint);
        Ok(())
    }

    async fn get_endpoint(&self, id: &WebhookId) -> BackboneResult<WebhookEndpoint> {
        let inner = self.inner.lock().await;
        inner
            .endpoints
            .get(id)
            .cloned()
            .ok_or_else(|| BackboneError::NotFound(format!("webhook endpoint {id}")))
    }

    async fn update_endpoint(&self, endpoint: WebhookEndpoint) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.endpoints.get(&endpoint.webhook_id).cloned() {
            Self::unindex_endpoint(&mut inner.endpoint_indexes, &old);
        }
        Self::index_endpoint(&mut inner.endpoint_indexes, &endpoint);
        inner.endpoints.insert(endpoint.webhook_id, endpoint);
        Ok(())
    }

    async fn delete_endpoint(&self, id: &WebhookId) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        let endpoint = inner
            .endpoints
            .remove(id)
            .ok_or_else(|| BackboneError::NotFound(format!("webhook endpoint {id}")))?;
        Self::unindex_endpoint(&mut inner.endpoint_indexes, &endpoint);
        let delivery_ids = inner.deliveries_by_webhook.get(id);
        for delivery_id in delivery_ids {
            inner.deliveries.remove(&delivery_id);
            inner.deliveries_by_webhook.remove(id, &delivery_id);
        }
        Ok(())
    }

    async fn list_endpoints(
        &self,
        owner_id: Option<&OwnerId>,
        tenant_id: Option<&TenantId>,
        offset: usize,
        limit: usize,
    ) -> Vec<WebhookEndpoint> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&WebhookEndpoint> = inner.endpoints.values().collect();
        if let Some(owner_id) = owner_id {
            candidates.retain(|e| &e.owner_id == owner_id);
        }
        if let Some(tenant_id) = tenant_id {
            candidates.retain(|e| &e.tenant_id == tenant_id);
        }
        candidates.sort_by_key(|e| e.webhook_id);
        candidates.into_iter().skip(offset).take(limit).cloned().collect()
    }

    async fn endpoints_for_event(&self, event_type: &str) -> Vec<WebhookEndpoint> {
        let inner = self.inner.lock().await;
        let mut ids = inner.endpoint_indexes.by_event.get(&event_type.to_string());
        ids.extend(inner.endpoint_indexes.by_event.get(&"*".to_string()));
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| inner.endpoints.get(&id).cloned())
            .collect()
    }

    async fn create_delivery(&self, delivery: WebhookDelivery) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        inner.deliveries_by_webhook.insert(delivery.webhook_id, delivery.delivery_id);
        inner.deliveries.insert(delivery.delivery_id, delivery);
        Ok(())
    }

    async fn get_delivery(&self, id: &DeliveryId) -> BackboneResult<WebhookDelivery> {
        let inner = self.inner.lock().await;
        inner
            .deliveries
            .get(id)
            .cloned()
            .ok_or_else(|| BackboneError::NotFound(format!("delivery {id}")))
    }

    async fn update_delivery(&self, delivery: WebhookDelivery) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        inner.deliveries.insert(delivery.delivery_id, delivery);
        Ok(())
    }

    async fn list_deliveries(
        &self,
        webhook_id: Option<&WebhookId>,
        offset: usize,
        limit: usize,
    ) -> Vec<WebhookDelivery> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&WebhookDelivery> = inner.deliveries.values().collect();
        if let Some(webhook_id) = webhook_id {
            candidates.retain(|d| &d.webhook_id == webhook_id);
        }
        candidates.sort_by_key(|d| d.created_at);
        candidates.into_iter().skip(offset).take(limit).cloned().collect()
    }

    async fn due_deliveries(&self, now: DateTime<Utc>) -> Vec<WebhookDelivery> {
        let inner = self.inner.lock().await;
        let mut due: Vec<WebhookDelivery> = inner
            .deliveries
            .values()
            .filter(|d| matches!(d.status, DeliveryStatus::Pending | DeliveryStatus::Retrying))
            .filter(|d| d.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_attempt_at);
        due
    }
}
