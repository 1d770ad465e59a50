use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::TaskPayload;

#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

/// A registered callback invoked by the scheduler to execute a task whose
/// payload is not the intrinsically-handled `http` variant (§3.3, §4.F).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, payload: &TaskPayload) -> HandlerOutcome;
}

/// Maps a payload kind (`"function"`, `"command"`, `"goal"`,
/// `"notification"`) to its registered handler. `http` never needs an
/// entry here — it is executed by the scheduler's built-in HTTP executor.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &'static str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }
}

fn payload_kind(payload: &TaskPayload) -> &'static str {
    match payload {
        TaskPayload::Function { .. } => "function",
        TaskPayload::Http { .. } => "http",
        TaskPayload::Command { .. } => "command",
        TaskPayload::Goal { .. } => "goal",
        TaskPayload::Notification { .. } => "notification",
    }
}

/// The default executor for `TaskPayload::Http`: performs the request and
/// classifies the response the same way the webhook dispatcher does.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        HttpExecutor { client }
    }

    pub async fn execute(&self, payload: &TaskPayload, timeout: Duration) -> HandlerOutcome {
        let TaskPayload::Http {
            url,
            method,
            headers,
            body,
        } = payload
        else {
            return HandlerOutcome::Failed("HttpExecutor invoked on non-http payload".to_string());
        };

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut request = self.client.request(method, url).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    HandlerOutcome::Completed(serde_json::json!({
                        "status": status.as_u16(),
                        "body": text,
                    }))
                } else {
                    HandlerOutcome::Failed(format!("http status {status}: {text}"))
                }
            }
            Err(e) => HandlerOutcome::Failed(e.to_string()),
        }
    }
}

pub fn dispatch_kind(payload: &TaskPayload) -> &'static str {
    payload_kind(payload)
}
