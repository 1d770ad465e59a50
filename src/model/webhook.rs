use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{DeliveryId, OwnerId, TenantId, WebhookId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookStatus {
    Active,
    Paused,
    Disabled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterValue {
    Scalar(serde_json::Value),
    List(Vec<serde_json::Value>),
}

impl FilterValue {
    pub fn matches(&self, actual: Option<&serde_json::Value>) -> bool {
        let Some(actual) = actual else { return false };
        match self {
            FilterValue::Scalar(expected) => expected == actual,
            FilterValue::List(expected) => expected.contains(actual),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub webhook_id: WebhookId,
    pub url: String,
    pub secret: String,
    pub owner_id: OwnerId,
    pub tenant_id: TenantId,
    pub status: WebhookStatus,
    /// Subscribed event types, or the literal `"*"` wildcard.
    pub events: HashSet<String>,
    pub filters: HashMap<String, FilterValue>,
    pub custom_headers: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub consecutive_failures: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Header names the protocol itself owns; rejected in `custom_headers` at
/// endpoint-creation time so they can never shadow the real values (§9
/// header-precedence redesign).
pub const RESERVED_HEADER_NAMES: &[&str] = &[
    "content-type",
    "x-webhook-signature",
    "x-webhook-timestamp",
    "x-webhook-id",
    "x-event-id",
    "x-event-type",
    "x-delivery-id",
    "x-attempt-number",
    "x-webhook-test",
];

impl WebhookEndpoint {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.contains("*") || self.events.contains(event_type)
    }

    pub fn matches_filters(&self, data: &serde_json::Value) -> bool {
        self.filters
            .iter()
            .all(|(key, expected)| expected.matches(data.get(key)))
    }

    pub fn record_success(&mut self) {
        self.total_deliveries += 1;
        self.successful_deliveries += 1;
        self.consecutive_failures = 0;
        self.last_triggered_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self, max_consecutive_failures: u32) {
        self.total_deliveries += 1;
        self.failed_deliveries += 1;
        self.consecutive_failures += 1;
        self.last_triggered_at = Some(Utc::now());
        if self.consecutive_failures >= max_consecutive_failures {
            self.status = WebhookStatus::Failed;
        }
    }

    pub fn reenable(&mut self) {
        self.status = WebhookStatus::Active;
        self.consecutive_failures = 0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Retrying,
    Expired,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Expired)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.status_code, Some(code) if (200..300).contains(&code))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: DeliveryId,
    pub webhook_id: WebhookId,
    pub event: Event,
    pub status: DeliveryStatus,
    pub attempts: VecDeque<DeliveryAttempt>,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn push_attempt(&mut self, attempt: DeliveryAttempt, max_history: usize) {
        self.attempts.push_back(attempt);
        while self.attempts.len() > max_history {
            self.attempts.pop_front();
        }
    }
}

/// Backoff offset in seconds for the Nth delivery attempt (1-indexed),
/// per §4.G: 60 · 2^(n-1) → 60, 120, 240, 480, 960, ...
pub fn backoff_seconds(attempt_number: u32) -> i64 {
    60i64 * 2i64.pow(attempt_number.saturating_sub(1))
}
