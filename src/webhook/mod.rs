use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::{BackboneError, BackboneResult};
use crate::ids::{DeliveryId, OwnerId, TenantId, WebhookId};
use crate::model::{
    backoff_seconds, DeliveryAttempt, DeliveryStatus, Event, EventMetadata, WebhookDelivery,
    WebhookEndpoint, WebhookStatus, RESERVED_HEADER_NAMES,
};
use crate::signer;
use crate::store::WebhookStore;

pub struct WebhookService {
    store: Arc<dyn WebhookStore>,
    client: reqwest::Client,
    config: WebhookConfig,
}

pub struct TestPingResult {
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl WebhookService {
    pub fn new(store: Arc<dyn WebhookStore>, config: WebhookConfig, client: reqwest::Client) -> Self {
        WebhookService { store, client, config }
    }

    // ---- Management layer (§6.3 / §4.K) ----

    pub async fn create_endpoint(&self, mut endpoint: WebhookEndpoint) -> BackboneResult<WebhookEndpoint> {
        for header in endpoint.custom_headers.keys() {
            if RESERVED_HEADER_NAMES.contains(&header.to_ascii_lowercase().as_str()) {
                return Err(BackboneError::InvalidPayload(format!(
                    "header '{header}' is reserved for protocol use"
                )));
            }
        }
        if endpoint.secret.is_empty() {
            endpoint.secret = signer::generate_secret();
        }
        self.store.create_endpoint(endpoint.clone()).await?;
        Ok(endpoint)
    }

    pub async fn get_endpoint(&self, id: &WebhookId) -> BackboneResult<WebhookEndpoint> {
        self.store.get_endpoint(id).await
    }

    pub async fn update_endpoint(&self, endpoint: WebhookEndpoint) -> BackboneResult<()> {
        for header in endpoint.custom_headers.keys() {
            if RESERVED_HEADER_NAMES.contains(&header.to_ascii_lowercase().as_str()) {
                return Err(BackboneError::InvalidPayload(format!(
                    "header '{header}' is reserved for protocol use"
                )));
            }
        }
        self.store.update_endpoint(endpoint).await
    }

    pub async fn delete_endpoint(&self, id: &WebhookId) -> BackboneResult<()> {
        self.store.delete_endpoint(id).await
    }

    pub async fn pause_endpoint(&self, id: &WebhookId) -> BackboneResult<()> {
        let mut endpoint = self.store.get_endpoint(id).await?;
        endpoint.status = WebhookStatus::Paused;
        self.store.update_endpoint(endpoint).await
    }

    pub async fn resume_endpoint(&self, id: &WebhookId) -> BackboneResult<()> {
        let mut endpoint = self.store.get_endpoint(id).await?;
        endpoint.reenable();
        self.store.update_endpoint(endpoint).await
    }

    /// Rotates the secret atomically; any delivery already in flight
    /// signed its payload with the old secret and is unaffected (§4.B).
    pub async fn rotate_secret(&self, id: &WebhookId) -> BackboneResult<String> {
        let mut endpoint = self.store.get_endpoint(id).await?;
        let new_secret = signer::generate_secret();
        endpoint.secret = new_secret.clone();
        self.store.update_endpoint(endpoint).await?;
        Ok(new_secret)
    }

    pub async fn list_endpoints(
        &self,
        owner_id: Option<&OwnerId>,
        tenant_id: Option<&TenantId>,
        offset: usize,
        limit: usize,
    ) -> Vec<WebhookEndpoint> {
        self.store.list_endpoints(owner_id, tenant_id, offset, limit.min(100)).await
    }

    pub async fn list_deliveries(
        &self,
        webhook_id: Option<&WebhookId>,
        offset: usize,
        limit: usize,
    ) -> Vec<WebhookDelivery> {
        self.store.list_deliveries(webhook_id, offset, limit.min(100)).await
    }

    /// Resets the delivery to `retrying` and immediately performs one more
    /// attempt, without resetting the attempt counter (§4.G).
    pub async fn retry_delivery(&self, id: &DeliveryId) -> BackboneResult<WebhookDelivery> {
        let mut delivery = self.store.get_delivery(id).await?;
        if delivery.status == DeliveryStatus::Delivered {
            return Err(BackboneError::InvalidPayload("cannot retry a delivered delivery".to_string()));
        }
        delivery.status = DeliveryStatus::Retrying;
        delivery.next_attempt_at = Utc::now();
        self.store.update_delivery(delivery.clone()).await?;
        let endpoint = self.store.get_endpoint(&delivery.webhook_id).await?;
        let (delivery, endpoint) = self.attempt_delivery(delivery, endpoint).await;
        self.store.update_delivery(delivery.clone()).await?;
        self.store.update_endpoint(endpoint).await?;
        Ok(delivery)
    }

    /// Synthetic `system.health` event posted out-of-band, no persisted
    /// delivery (§4.G "Test ping").
    pub async fn test_ping(&self, id: &WebhookId) -> BackboneResult<TestPingResult> {
        let endpoint = self.store.get_endpoint(id).await?;
        let event = Event {
            event_id: Uuid::new_v4(),
            event_type: "system.health".to_string(),
            timestamp: Utc::now(),
            source: "delivery_backbone".to_string(),
            version: "1".to_string(),
            data: serde_json::json!({}),
            metadata: EventMetadata::default(),
        };
        let body = serde_json::to_vec(&event).map_err(|e| BackboneError::InvalidPayload(e.to_string()))?;

        let headers = build_headers(&endpoint, &event, &body, 1, &self.config, true)?;
        let mut request = self
            .client
            .post(&endpoint.url)
            .timeout(StdDuration::from_secs(endpoint.timeout_seconds));
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let start = Instant::now();
        match request.body(body).send().await {
            Ok(response) => Ok(TestPingResult {
                status_code: Some(response.status().as_u16()),
                response_time_ms: start.elapsed().as_millis() as u64,
                error: None,
            }),
            Err(e) => Ok(TestPingResult {
                status_code: None,
                response_time_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            }),
        }
    }

    // ---- Publish (§4.G "Publish") ----

    pub async fn publish(&self, event_type: &str, data: serde_json::Value, metadata: EventMetadata) -> BackboneResult<usize> {
        let event = Event {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            source: "delivery_backbone".to_string(),
            version: "1".to_string(),
            data,
            metadata,
        };

        let endpoints = self.store.endpoints_for_event(event_type).await;
        let mut created = 0;
        for endpoint in endpoints {
            if endpoint.status != WebhookStatus::Active {
                continue;
            }
            if !endpoint.matches_filters(&event.data) {
                continue;
            }
            let delivery = WebhookDelivery {
                delivery_id: DeliveryId::new(),
                webhook_id: endpoint.webhook_id,
                event: event.clone(),
                status: DeliveryStatus::Pending,
                attempts: Default::default(),
                max_attempts: endpoint.max_retries.max(1),
                next_attempt_at: Utc::now(),
                created_at: Utc::now(),
                completed_at: None,
            };
            self.store.create_delivery(delivery).await?;
            created += 1;
        }
        Ok(created)
    }

    // ---- Delivery loop (§4.G "Delivery loop") ----

    pub fn spawn_delivery_loop(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("webhook delivery loop shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(StdDuration::from_secs(self.config.poll_interval_seconds)) => {
                        if shutdown_rx.try_recv().is_ok() {
                            break;
                        }
                        self.process_due_deliveries().await;
                    }
                }
            }
        })
    }

    pub async fn process_due_deliveries(&self) {
        let now = Utc::now();
        let due = self.store.due_deliveries(now).await;
        for delivery in due {
            let endpoint = match self.store.get_endpoint(&delivery.webhook_id).await {
                Ok(e) => e,
                Err(_) => continue,
            };

            if endpoint.status != WebhookStatus::Active {
                let mut delivery = delivery;
                delivery.status = DeliveryStatus::Expired;
                delivery.completed_at = Some(Utc::now());
                let _ = self.store.update_delivery(delivery).await;
                continue;
            }

            let (delivery, endpoint) = self.attempt_delivery(delivery, endpoint).await;
            let _ = self.store.update_delivery(delivery).await;
            let _ = self.store.update_endpoint(endpoint).await;
        }
    }

    async fn attempt_delivery(
        &self,
        mut delivery: WebhookDelivery,
        mut endpoint: WebhookEndpoint,
    ) -> (WebhookDelivery, WebhookEndpoint) {
        let attempt_number = delivery.attempt_count() + 1;
        let body = match serde_json::to_vec(&delivery.event) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize webhook event");
                return (delivery, endpoint);
            }
        };

        let headers = match build_headers(&endpoint, &delivery.event, &body, attempt_number, &self.config, false) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "failed to build webhook headers");
                return (delivery, endpoint);
            }
        };

        let mut request = self
            .client
            .post(&endpoint.url)
            .timeout(StdDuration::from_secs(endpoint.timeout_seconds));
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let start = Instant::now();
        let (status_code, response_body, error) = match request.body(body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                let truncated: String = text.chars().take(self.config.response_body_truncate_bytes).collect();
                (Some(status), Some(truncated), None)
            }
            Err(e) => (None, None, Some(e.to_string())),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let attempt = DeliveryAttempt {
            attempt_number,
            started_at: Utc::now(),
            duration_ms,
            status_code,
            response_body,
            error,
        };
        let succeeded = attempt.succeeded();
        delivery.push_attempt(attempt, self.config.max_history);

        if succeeded {
            delivery.status = DeliveryStatus::Delivered;
            delivery.completed_at = Some(Utc::now());
            endpoint.record_success();
        } else if delivery.attempt_count() < delivery.max_attempts {
            delivery.status = DeliveryStatus::Retrying;
            delivery.next_attempt_at = Utc::now() + Duration::seconds(backoff_seconds(delivery.attempt_count()));
            endpoint.record_failure(self.config.max_consecutive_failures);
        } else {
            delivery.status = DeliveryStatus::Expired;
            delivery.completed_at = Some(Utc::now());
            endpoint.record_failure(self.config.max_consecutive_failures);
        }

        (delivery, endpoint)
    }
}

/// Builds the outbound header set per the §9 redesign: custom endpoint
/// headers merge first, protocol headers are inserted after and take
/// precedence, so a custom header cannot shadow a protocol name.
fn build_headers(
    endpoint: &WebhookEndpoint,
    event: &Event,
    body: &[u8],
    attempt_number: u32,
    config: &WebhookConfig,
    is_test: bool,
) -> BackboneResult<Vec<(String, String)>> {
    let now = Utc::now().timestamp();
    let signature = signer::sign(&endpoint.secret, body, now)
        .map_err(|e| BackboneError::InvalidPayload(e.to_string()))?;

    let protocol_headers: Vec<(String, String)> = {
        let mut h = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (config.signature_header.clone(), signature),
            (config.timestamp_header.clone(), now.to_string()),
            ("X-Webhook-ID".to_string(), endpoint.webhook_id.to_string()),
            ("X-Event-ID".to_string(), event.event_id.to_string()),
            ("X-Event-Type".to_string(), event.event_type.clone()),
            ("X-Delivery-ID".to_string(), Uuid::new_v4().to_string()),
            ("X-Attempt-Number".to_string(), attempt_number.to_string()),
        ];
        if is_test {
            h.push(("X-Webhook-Test".to_string(), "true".to_string()));
        }
        h
    };

    let mut headers: Vec<(String, String)> = endpoint
        .custom_headers
        .iter()
        .filter(|(k, _)| {
            !protocol_headers
                .iter()
                .any(|(pk, _)| pk.eq_ignore_ascii_case(k))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.extend(protocol_headers);

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterValue, WebhookStatus};
    use std::collections::{HashMap, HashSet};

    fn base_endpoint() -> WebhookEndpoint {
        WebhookEndpoint {
            webhook_id: WebhookId::new(),
            url: "https://example.com/hook".to_string(),
            secret: "secret".to_string(),
            owner_id: OwnerId("o1".to_string()),
            tenant_id: TenantId("t1".to_string()),
            status: WebhookStatus::Active,
            events: HashSet::from(["goal.completed".to_string()]),
            filters: HashMap::new(),
            custom_headers: HashMap::new(),
            timeout_seconds: 30,
            max_retries: 5,
            total_deliveries: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            consecutive_failures: 0,
            last_triggered_at: None,
        }
    }

    #[test]
    fn filter_rejects_missing_key_match() {
        let mut endpoint = base_endpoint();
        endpoint
            .filters
            .insert("goal_id".to_string(), FilterValue::Scalar(serde_json::json!("g2")));
        let data = serde_json::json!({"goal_id": "g1"});
        assert!(!endpoint.matches_filters(&data));
    }

    #[test]
    fn backoff_schedule_matches_spec() {
        assert_eq!(backoff_seconds(1), 60);
        assert_eq!(backoff_seconds(2), 120);
        assert_eq!(backoff_seconds(3), 240);
        assert_eq!(backoff_seconds(4), 480);
    }

    #[test]
    fn custom_headers_cannot_shadow_protocol_headers() {
        let mut endpoint = base_endpoint();
        endpoint
            .custom_headers
            .insert("X-Webhook-Signature".to_string(), "forged".to_string());
        let event = Event {
            event_id: Uuid::new_v4(),
            event_type: "goal.completed".to_string(),
            timestamp: Utc::now(),
            source: "test".to_string(),
            version: "1".to_string(),
            data: serde_json::json!({}),
            metadata: EventMetadata::default(),
        };
        let config = WebhookConfig {
            poll_interval_seconds: 10,
            default_timeout_seconds: 30,
            default_max_retries: 5,
            max_consecutive_failures: 50,
            signature_header: "X-Webhook-Signature".to_string(),
            timestamp_header: "X-Webhook-Timestamp".to_string(),
            max_history: 50,
            response_body_truncate_bytes: 1000,
        };
        let headers = build_headers(&endpoint, &event, b"{}", 1, &config, false).unwrap();
        let sig_values: Vec<&str> = headers
            .iter()
            .filter(|(k, _)| k == "X-Webhook-Signature")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(sig_values.len(), 1);
        assert_ne!(sig_values[0], "forged");
    }
}
