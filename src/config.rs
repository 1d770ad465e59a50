use std::env;

use serde::Deserialize;

/// Typed, env-backed configuration for the three subsystems. Mirrors the
/// teacher's env-var-with-default pattern rather than a config-file loader.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub webhook: WebhookConfig,
    pub notification: NotificationConfig,
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval for the tick loop (§4.F default 1s).
    pub poll_interval_seconds: u64,
    /// Default handler timeout when a task does not specify one.
    pub default_timeout_seconds: u64,
    /// Default retry budget when a task does not specify one.
    pub default_max_retries: u32,
    pub default_retry_delay_seconds: u64,
    /// Cap on the bounded `executions` log kept per task.
    pub max_history: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Poll interval for the delivery loop (§4.G default 10s).
    pub poll_interval_seconds: u64,
    pub default_timeout_seconds: u64,
    pub default_max_retries: u32,
    /// Consecutive failures before an endpoint auto-disables (§3.4 invariant).
    pub max_consecutive_failures: u32,
    pub signature_header: String,
    pub timestamp_header: String,
    pub max_history: usize,
    /// Cap applied to a delivery attempt's stored response body (§4.G).
    pub response_body_truncate_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Poll interval for the pending-notification processor.
    pub poll_interval_seconds: u64,
    pub default_max_attempts: u32,
    pub max_per_user_per_hour: u32,
    pub max_per_user_per_day: u32,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_history: usize,
    pub sms_max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// Clock-skew tolerance used by `verify` (§4.B default 300s).
    pub tolerance_seconds: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            scheduler: SchedulerConfig {
                poll_interval_seconds: env_parse("SCHEDULER_POLL_INTERVAL_SECONDS", 1)?,
                default_timeout_seconds: env_parse("SCHEDULER_DEFAULT_TIMEOUT_SECONDS", 30)?,
                default_max_retries: env_parse("SCHEDULER_DEFAULT_MAX_RETRIES", 3)?,
                default_retry_delay_seconds: env_parse(
                    "SCHEDULER_DEFAULT_RETRY_DELAY_SECONDS",
                    60,
                )?,
                max_history: env_parse("SCHEDULER_MAX_HISTORY", 50)?,
            },
            webhook: WebhookConfig {
                poll_interval_seconds: env_parse("WEBHOOK_POLL_INTERVAL_SECONDS", 10)?,
                default_timeout_seconds: env_parse("WEBHOOK_DEFAULT_TIMEOUT_SECONDS", 30)?,
                default_max_retries: env_parse("WEBHOOK_DEFAULT_MAX_RETRIES", 5)?,
                max_consecutive_failures: env_parse("WEBHOOK_MAX_CONSECUTIVE_FAILURES", 50)?,
                signature_header: env::var("WEBHOOK_SIGNATURE_HEADER")
                    .unwrap_or_else(|_| "X-Webhook-Signature".to_string()),
                timestamp_header: env::var("WEBHOOK_TIMESTAMP_HEADER")
                    .unwrap_or_else(|_| "X-Webhook-Timestamp".to_string()),
                max_history: env_parse("WEBHOOK_MAX_HISTORY", 50)?,
                response_body_truncate_bytes: env_parse(
                    "WEBHOOK_RESPONSE_BODY_TRUNCATE_BYTES",
                    1000,
                )?,
            },
            notification: NotificationConfig {
                poll_interval_seconds: env_parse("NOTIFICATION_POLL_INTERVAL_SECONDS", 5)?,
                default_max_attempts: env_parse("NOTIFICATION_DEFAULT_MAX_ATTEMPTS", 3)?,
                max_per_user_per_hour: env_parse("NOTIFICATION_MAX_PER_USER_PER_HOUR", 20)?,
                max_per_user_per_day: env_parse("NOTIFICATION_MAX_PER_USER_PER_DAY", 200)?,
                batch_size: env_parse("NOTIFICATION_BATCH_SIZE", 50)?,
                batch_delay_ms: env_parse("NOTIFICATION_BATCH_DELAY_MS", 250)?,
                max_history: env_parse("NOTIFICATION_MAX_HISTORY", 50)?,
                sms_max_body_bytes: env_parse("NOTIFICATION_SMS_MAX_BODY_BYTES", 160)?,
            },
            signer: SignerConfig {
                tolerance_seconds: env_parse("SIGNER_TOLERANCE_SECONDS", 300)?,
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scheduler: SchedulerConfig {
                poll_interval_seconds: 1,
                default_timeout_seconds: 30,
                default_max_retries: 3,
                default_retry_delay_seconds: 60,
                max_history: 50,
            },
            webhook: WebhookConfig {
                poll_interval_seconds: 10,
                default_timeout_seconds: 30,
                default_max_retries: 5,
                max_consecutive_failures: 50,
                signature_header: "X-Webhook-Signature".to_string(),
                timestamp_header: "X-Webhook-Timestamp".to_string(),
                max_history: 50,
                response_body_truncate_bytes: 1000,
            },
            notification: NotificationConfig {
                poll_interval_seconds: 5,
                default_max_attempts: 3,
                max_per_user_per_hour: 20,
                max_per_user_per_day: 200,
                batch_size: 50,
                batch_delay_ms: 250,
                max_history: 50,
                sms_max_body_bytes: 160,
            },
            signer: SignerConfig {
                tolerance_seconds: 300,
            },
        }
    }
}
