//! Builds engines from strategy settings.

use super::engine::StrategyEngine;
use crate::config::{BinanceConfig, Config, Credentials, StrategyConfig, StrategyDefaults};
use crate::events::{publisher_for, EventPublisher};
use crate::exchange::{BinanceClient, FuturesGateway, PremiumFeedClient, SignalSource};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creates the gateway for one set of credentials.
pub type GatewayFactory = Arc<dyn Fn(&Credentials) -> Result<Arc<dyn FuturesGateway>> + Send + Sync>;

/// Shared wiring for every instance: one feed client, one gateway per
/// instance credentials.
#[derive(Clone)]
pub struct Launcher {
    defaults: StrategyDefaults,
    feed: Arc<dyn SignalSource>,
    gateways: GatewayFactory,
}

impl Launcher {
    /// Live wiring against Binance and the premium feed.
    pub fn new(config: &Config) -> Result<Self> {
        let feed = PremiumFeedClient::new(&config.feed)?;
        let binance: BinanceConfig = config.binance.clone();

        Ok(Self {
            defaults: config.defaults.clone(),
            feed: Arc::new(feed),
            gateways: Arc::new(move |credentials: &Credentials| {
                let client = BinanceClient::new(&binance, credentials)?;
                Ok(Arc::new(client) as Arc<dyn FuturesGateway>)
            }),
        })
    }

    /// Custom wiring, e.g. the in-memory mocks.
    pub fn with_parts(
        defaults: StrategyDefaults,
        feed: Arc<dyn SignalSource>,
        gateways: GatewayFactory,
    ) -> Self {
        Self {
            defaults,
            feed,
            gateways,
        }
    }

    pub fn defaults(&self) -> &StrategyDefaults {
        &self.defaults
    }

    /// Engine for `config`, validated against the defaults.
    pub fn build(
        &self,
        id: &str,
        config: StrategyConfig,
        cancel: CancellationToken,
    ) -> Result<StrategyEngine> {
        let gateway = (self.gateways)(&config.credentials())
            .with_context(|| format!("Failed to create gateway for {}", config.symbol))?;
        let publisher: Arc<dyn EventPublisher> = publisher_for(&config)?;

        StrategyEngine::new(
            id,
            config,
            &self.defaults,
            gateway,
            self.feed.clone(),
            publisher,
            cancel,
        )
        .with_context(|| format!("Invalid strategy settings for instance {}", id))
    }
}
