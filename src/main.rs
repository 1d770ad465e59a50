use std::sync::Arc;

use reqwest::Client;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use delivery_backbone::config::Config;
use delivery_backbone::events::EventBus;
use delivery_backbone::notification::NotificationService;
use delivery_backbone::providers::ProviderRegistry;
use delivery_backbone::scheduler::SchedulerService;
use delivery_backbone::store::{InMemoryNotificationStore, InMemoryTaskStore, InMemoryWebhookStore, RateLimitStore};
use delivery_backbone::webhook::WebhookService;

/// Wires the three subsystems against the in-memory stores and runs their
/// background loops until interrupted. A real deployment swaps the
/// `InMemory*Store` types for implementations backed by its own database
/// and drives the services from its own ingress layer; this binary exists
/// to exercise the crate end to end.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let client = Client::new();

    let task_store = Arc::new(InMemoryTaskStore::new());
    let webhook_store = Arc::new(InMemoryWebhookStore::new());
    let notification_store = Arc::new(InMemoryNotificationStore::new());
    let rate_limits = Arc::new(RateLimitStore::new());
    let providers = Arc::new(ProviderRegistry::from_config(&config.notification, client.clone()));
    let events = Arc::new(EventBus::default());

    let scheduler = Arc::new(SchedulerService::new(
        task_store,
        config.scheduler.clone(),
        client.clone(),
    ));
    let webhooks = Arc::new(WebhookService::new(webhook_store, config.webhook.clone(), client.clone()));
    let notifications = Arc::new(NotificationService::new(
        notification_store,
        rate_limits,
        providers,
        events,
        config.notification.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler_task = scheduler.clone().spawn_tick_loop(shutdown_tx.subscribe());
    let webhook_task = webhooks.clone().spawn_delivery_loop(shutdown_tx.subscribe());
    let notification_task = notifications.clone().spawn_pending_processor(shutdown_tx.subscribe());

    tracing::info!("delivery backbone running, press ctrl+c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    let _ = tokio::join!(scheduler_task, webhook_task, notification_task);

    Ok(())
}
