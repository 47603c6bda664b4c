//! Seams between the strategy engine and the outside world.
//!
//! The engine only talks to the exchange and the premium feed through these
//! traits, so a live [`BinanceClient`](super::BinanceClient) and the in-memory
//! mocks are interchangeable.

use super::types::{BatchOrder, BatchOrderResult, OrderBookDepth, PositionRisk, PremiumSnapshot};
use async_trait::async_trait;

/// Signed futures REST calls used by one strategy instance.
#[async_trait]
pub trait FuturesGateway: Send + Sync {
    /// Set leverage for a contract.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()>;

    /// Open position entries for a contract.
    async fn position_risk(&self, symbol: &str) -> anyhow::Result<Vec<PositionRisk>>;

    /// Order book snapshot for a contract, `limit` levels per side.
    async fn depth(&self, symbol: &str, limit: u32) -> anyhow::Result<OrderBookDepth>;

    /// Submit all legs in a single batch request.
    async fn place_batch_orders(
        &self,
        orders: &[BatchOrder],
    ) -> anyhow::Result<Vec<BatchOrderResult>>;
}

/// Source of per-symbol premium snapshots, polled once per tick.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn snapshots(&self) -> anyhow::Result<Vec<PremiumSnapshot>>;
}
