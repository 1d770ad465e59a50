use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, TemplateId, TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    Email,
    Sms,
    Push,
    InApp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Read,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub device_tokens: Vec<String>,
}

/// Channel-polymorphic content. Every field is optional at the struct
/// level; each provider's `validate` enforces which combination it needs
/// (§4.E).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    pub subject: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub short_body: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl Content {
    /// The body actually transmitted over SMS: `short_body` if present,
    /// otherwise `body`, truncated to 160 bytes with a trailing ellipsis
    /// (§4.E / §3.6).
    pub fn sms_body(&self, max_bytes: usize) -> Option<String> {
        let raw = self.short_body.clone().or_else(|| self.body.clone())?;
        if raw.len() <= max_bytes {
            Some(raw)
        } else {
            let keep = max_bytes.saturating_sub(3);
            let truncated: String = raw.chars().take(keep).collect();
            Some(format!("{truncated}..."))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    PermanentFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: NotificationId,
    pub notification_type: NotificationType,
    pub category: String,
    pub priority: Priority,
    pub recipient: Recipient,
    pub content: Content,
    pub status: NotificationStatus,
    pub attempts: VecDeque<NotificationAttempt>,
    pub max_attempts: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub send_after: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub template_id: Option<TemplateId>,
    pub group_id: Option<String>,
    pub thread_id: Option<String>,
    pub tenant_id: TenantId,
}

impl Notification {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Whether this notification is deferred to the background processor
    /// rather than dispatched inline (§4.H step 4).
    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at > now) || self.send_after.is_some_and(|at| at > now)
    }

    pub fn can_retry(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, NotificationStatus::Failed | NotificationStatus::Pending)
            && self.attempt_count() < self.max_attempts
            && !self.is_expired(now)
    }

    pub fn push_attempt(&mut self, attempt: NotificationAttempt, max_history: usize) {
        self.attempts.push_back(attempt);
        while self.attempts.len() > max_history {
            self.attempts.pop_front();
        }
    }

    /// `read` is reachable only from {sent, delivered, pending} — the Open
    /// Question in §9 resolved against silently allowing `failed -> read`.
    pub fn mark_read(&mut self) -> bool {
        match self.status {
            NotificationStatus::Sent
            | NotificationStatus::Delivered
            | NotificationStatus::Pending => {
                self.status = NotificationStatus::Read;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub template_id: TemplateId,
    pub name: String,
    pub notification_type: NotificationType,
    pub subject_template: Option<String>,
    pub body_template: String,
    pub tenant_id: TenantId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(body: &str) -> Content {
        Content {
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn sms_body_prefers_short_body() {
        let c = Content {
            short_body: Some("short".to_string()),
            body: Some("long version".to_string()),
            ..Default::default()
        };
        assert_eq!(c.sms_body(160).as_deref(), Some("short"));
    }

    #[test]
    fn sms_body_truncates_with_ellipsis() {
        let long = "a".repeat(200);
        let c = content(&long);
        let truncated = c.sms_body(160).unwrap();
        assert_eq!(truncated.len(), 160);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn sms_body_short_enough_is_untouched() {
        let c = content("hello");
        assert_eq!(c.sms_body(160).as_deref(), Some("hello"));
    }
}
