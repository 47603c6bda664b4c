//! Lifecycle events of strategy instances and their delivery.
//!
//! Every instance reports `created`, `reversed` and `placed` events to an
//! [`EventPublisher`]. With a webhook configured they are POSTed as
//! `{type, id, symbol, message}`; delivery failures are logged and dropped.

use crate::config::StrategyConfig;
use crate::strategy::DepthQuotes;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What happened to an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Created,
    Reversed,
    Placed(DepthQuotes),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Reversed => "reversed",
            EventKind::Placed(_) => "placed",
        }
    }
}

/// Event emitted by a running strategy instance.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub id: String,
    pub kind: EventKind,
    pub config: StrategyConfig,
}

impl LifecycleEvent {
    pub fn new(id: impl Into<String>, kind: EventKind, config: &StrategyConfig) -> Self {
        Self {
            id: id.into(),
            kind,
            config: config.clone(),
        }
    }

    /// Human readable summary. Never contains credentials.
    pub fn message(&self) -> String {
        let c = &self.config;
        match &self.kind {
            EventKind::Created => format!(
                "{} started: quantity {} total {} reduce {} arbitrage {} leverage {}x",
                c.symbol, c.quantity, c.total, c.reduce, c.arbitrage, c.leverage
            ),
            EventKind::Reversed => format!(
                "{} direction reversed, rebuilding with quantity {}",
                c.symbol, c.quantity
            ),
            EventKind::Placed(quotes) => format!("{} order placed: {}", c.symbol, quotes),
        }
    }
}

impl fmt::Display for DepthQuotes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BUSD bid {}@{} ask {}@{} / USDT bid {}@{} ask {}@{}",
            self.busd.bid_size,
            self.busd.bid,
            self.busd.ask_size,
            self.busd.ask,
            self.usdt.bid_size,
            self.usdt.bid,
            self.usdt.ask_size,
            self.usdt.ask,
        )
    }
}

/// Webhook wire payload.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    id: &'a str,
    symbol: &'a str,
    message: String,
}

/// Sink for lifecycle events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, event: &LifecycleEvent) {
        debug!(id = %event.id, kind = event.kind.name(), "No webhook configured");
    }
}

/// POSTs events to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    http: Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn deliver(&self, event: &LifecycleEvent) -> Result<()> {
        let payload = WebhookPayload {
            kind: event.kind.name(),
            id: &event.id,
            symbol: &event.config.symbol,
            message: event.message(),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send webhook")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Webhook returned {}", status);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &LifecycleEvent) {
        if let Err(e) = self.deliver(event).await {
            warn!(id = %event.id, kind = event.kind.name(), "Webhook delivery failed: {:#}", e);
        }
    }
}

/// Keeps events in memory, for paper runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.kind.name() == name)
            .count()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &LifecycleEvent) {
        self.events.lock().await.push(event.clone());
    }
}

/// Publisher for an instance: webhook when configured, otherwise a no-op.
pub fn publisher_for(config: &StrategyConfig) -> Result<Arc<dyn EventPublisher>> {
    match config.webhook.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookPublisher::new(url)?)),
        _ => Ok(Arc::new(NullPublisher)),
    }
}
